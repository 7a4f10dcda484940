pub mod compile;
pub mod config;
pub mod replay;
pub mod simulate;

use std::path::PathBuf;

use sunder_common::config::AppConfig;
use sunder_render_control::{
    mb_to_bytes, AudioCodec, RateControl, RenderSettings, SizeLimit, VideoCodec,
};

/// Render settings shared by the commands that build a job.
#[derive(clap::Args)]
pub struct SettingsArgs {
    /// Input media file
    #[arg(short, long)]
    pub input: PathBuf,

    /// Output file path
    #[arg(short, long)]
    pub output: PathBuf,

    /// Video codec: h264|h265|av1|gif|vp9
    #[arg(long, default_value = "h264")]
    pub codec: String,

    /// Audio codec: aac|mp3|ogg|vorbis|opus|flac|alac
    #[arg(long, default_value = "aac")]
    pub audio_codec: String,

    /// Rate control: cbr|vbr|abr|crf
    #[arg(long, default_value = "cbr")]
    pub rate_control: String,

    /// Target video bitrate (kbps)
    #[arg(long, default_value = "6000")]
    pub bitrate: f64,

    /// Minimum video bitrate (kbps)
    #[arg(long, default_value = "0")]
    pub min_bitrate: f64,

    /// Maximum video bitrate (kbps), defaults to the target
    #[arg(long)]
    pub max_bitrate: Option<f64>,

    /// Rate-control buffer size (kbits), defaults to twice the target
    #[arg(long)]
    pub buf_size: Option<f64>,

    /// Constant-quality value, defaults to the codec's default
    #[arg(long)]
    pub crf: Option<u32>,

    /// Trim start (seconds)
    #[arg(long, default_value = "0")]
    pub start: f64,

    /// Trim end (seconds)
    #[arg(long)]
    pub end: f64,

    /// Audio stream index to keep (repeatable)
    #[arg(long = "audio-track")]
    pub audio_tracks: Vec<u32>,

    /// Fail instead of overwriting an existing output
    #[arg(long)]
    pub no_overwrite: bool,
}

impl SettingsArgs {
    pub fn into_settings(self) -> anyhow::Result<RenderSettings> {
        let video_codec = VideoCodec::parse(&self.codec).ok_or_else(|| {
            anyhow::anyhow!(
                "Unknown codec: {}. Use: {}",
                self.codec,
                names(VideoCodec::ALL.iter().map(|c| c.as_str()))
            )
        })?;
        let audio_codec = AudioCodec::parse(&self.audio_codec).ok_or_else(|| {
            anyhow::anyhow!(
                "Unknown audio codec: {}. Use: {}",
                self.audio_codec,
                names(AudioCodec::ALL.iter().map(|c| c.as_str()))
            )
        })?;
        let rate_control = RateControl::parse(&self.rate_control).ok_or_else(|| {
            anyhow::anyhow!(
                "Unknown rate control: {}. Use: {}",
                self.rate_control,
                names(RateControl::ALL.iter().map(|m| m.as_str()))
            )
        })?;

        Ok(RenderSettings {
            video_codec,
            audio_codec,
            rate_control,
            target_bitrate: self.bitrate,
            min_bitrate: self.min_bitrate,
            max_bitrate: self.max_bitrate.unwrap_or(self.bitrate),
            crf_value: self
                .crf
                .or_else(|| video_codec.descriptor().crf.map(|range| range.default))
                .unwrap_or(0),
            buf_size: self.buf_size.unwrap_or(self.bitrate * 2.0),
            trim_start: self.start,
            trim_end: self.end,
            input_path: self.input,
            output_path: self.output,
            audio_tracks: self.audio_tracks,
            override_file: !self.no_overwrite,
        })
    }
}

/// Size limit from a megabyte target, with the rest taken from the config.
pub fn size_limit(
    max_size_mb: f64,
    attempts: Option<u32>,
    threshold: Option<f64>,
    config: &AppConfig,
) -> SizeLimit {
    SizeLimit {
        max_size: mb_to_bytes(max_size_mb),
        max_attempts: attempts.unwrap_or(config.render.max_attempts),
        retry_threshold: threshold.unwrap_or(config.render.retry_threshold),
    }
}

fn names<'a>(values: impl Iterator<Item = &'a str>) -> String {
    values.collect::<Vec<_>>().join(", ")
}
