//! Print the encoder arguments for a render.

use sunder_common::config::AppConfig;
use sunder_render_control::{bytes_to_mb, SizeLimit};

use super::{size_limit, SettingsArgs};

pub fn run(
    args: SettingsArgs,
    max_size_mb: Option<f64>,
    config: &AppConfig,
    json: bool,
) -> anyhow::Result<()> {
    let mut settings = args.into_settings()?;

    if let Some(mb) = max_size_mb {
        let limit: SizeLimit = size_limit(mb, None, None, config);
        limit.validate()?;
        settings = settings.seeded_for(&limit)?;
        tracing::debug!(
            max_size_mb = bytes_to_mb(limit.max_size),
            target_kbps = settings.target_bitrate,
            "Seeded bitrate from size limit"
        );
    }

    let compiled = settings.compile()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&compiled)?);
        return Ok(());
    }

    let s = compiled.settings();
    println!("Codec: {} ({})", s.video_codec.descriptor().friendly_name, s.rate_control);
    println!("  Container: {}", s.video_codec.descriptor().container);
    println!(
        "  Bitrate: {:.1} kbps (min {:.1}, max {:.1})",
        s.target_bitrate, s.min_bitrate, s.max_bitrate
    );
    println!("  Audio: {}", s.audio_codec.friendly_name());
    println!();
    println!("ffmpeg {}", shell_join(&compiled.encoder_args()));
    Ok(())
}

fn shell_join(args: &[String]) -> String {
    args.iter()
        .map(|arg| {
            if arg.is_empty() || arg.contains([' ', '[', ']', ';', '"', '\'']) {
                format!("'{}'", arg.replace('\'', r"'\''"))
            } else {
                arg.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
