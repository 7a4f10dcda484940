//! Render settings and the settings compiler.
//!
//! [`RenderSettings`] is a plain value. Changing a bitrate produces a new
//! value through [`RenderSettings::with_bitrates`], and the encoder only ever
//! sees a [`CompiledSettings`], which can only be built by compiling the
//! current settings. The rate-control arguments therefore always match the
//! bitrate fields they were generated from.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sunder_common::error::{SunderError, SunderResult};

use crate::codecs::{AudioCodec, Placeholder, RateControl, VideoCodec};

/// Lowest bitrate (kbps) the search will ever hand to the encoder.
pub const MIN_BITRATE_KBPS: f64 = 0.01;

/// User-chosen encode settings for one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderSettings {
    pub video_codec: VideoCodec,
    pub audio_codec: AudioCodec,
    pub rate_control: RateControl,

    /// Target bitrate in kbps.
    pub target_bitrate: f64,
    /// Minimum bitrate in kbps.
    pub min_bitrate: f64,
    /// Maximum bitrate in kbps.
    pub max_bitrate: f64,
    pub crf_value: u32,
    /// Rate-control buffer size in kbits.
    pub buf_size: f64,

    /// Start of the trimmed range in seconds.
    pub trim_start: f64,
    /// End of the trimmed range in seconds.
    pub trim_end: f64,

    pub input_path: PathBuf,
    pub output_path: PathBuf,

    /// Audio stream indices merged into the output track.
    pub audio_tracks: Vec<u32>,

    /// Overwrite an existing output file.
    pub override_file: bool,
}

/// Optional policy constraining the output file size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SizeLimit {
    /// Target ceiling in bytes.
    pub max_size: u64,
    /// Attempts allowed, at least 1.
    pub max_attempts: u32,
    /// Acceptable undershoot as a fraction of `max_size`.
    pub retry_threshold: f64,
}

/// Facts about the media being rendered.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RenderMeta {
    /// Length of the trimmed range in seconds.
    pub total_duration: f64,
}

/// The three bitrate fields the size search rewrites between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BitrateTriple {
    pub target: f64,
    pub min: f64,
    pub max: f64,
}

/// Settings plus the rate-control arguments generated from them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledSettings {
    settings: RenderSettings,
    rate_control_args: Vec<String>,
}

impl RenderSettings {
    /// Length of the trimmed range in seconds.
    pub fn duration(&self) -> f64 {
        self.trim_end - self.trim_start
    }

    pub fn bitrates(&self) -> BitrateTriple {
        BitrateTriple {
            target: self.target_bitrate,
            min: self.min_bitrate,
            max: self.max_bitrate,
        }
    }

    /// Copy of these settings with the bitrate fields replaced.
    pub fn with_bitrates(&self, bitrates: BitrateTriple) -> Self {
        Self {
            target_bitrate: bitrates.target,
            min_bitrate: bitrates.min,
            max_bitrate: bitrates.max,
            ..self.clone()
        }
    }

    /// Seed the bitrate fields with the constant bitrate that would exactly
    /// fill `limit.max_size` over the trimmed duration.
    pub fn seeded_for(&self, limit: &SizeLimit) -> SunderResult<Self> {
        let duration = self.duration();
        if duration <= 0.0 {
            return Err(SunderError::invalid_settings(
                "trim_end must be greater than trim_start",
            ));
        }
        let kbps = limit.max_size as f64 * 8.0 / duration / 1000.0;
        Ok(self.with_bitrates(BitrateTriple {
            target: kbps,
            min: 0.0,
            max: kbps,
        }))
    }

    pub fn validate(&self) -> SunderResult<()> {
        if !(self.trim_end > self.trim_start) {
            return Err(SunderError::invalid_settings(format!(
                "trim_end ({}) must be greater than trim_start ({})",
                self.trim_end, self.trim_start
            )));
        }
        if self.trim_start < 0.0 {
            return Err(SunderError::invalid_settings("trim_start must not be negative"));
        }

        let descriptor = self.video_codec.descriptor();
        if !descriptor.supports(self.rate_control) {
            return Err(SunderError::unsupported_rate_control(
                self.video_codec.as_str(),
                self.rate_control.as_str(),
            ));
        }

        if self.rate_control == RateControl::Crf {
            if let Some(range) = descriptor.crf {
                if !range.contains(self.crf_value) {
                    return Err(SunderError::invalid_settings(format!(
                        "crf {} outside {}..={} for {}",
                        self.crf_value, range.min, range.max, descriptor.friendly_name
                    )));
                }
            }
        }

        for (name, value) in [
            ("target_bitrate", self.target_bitrate),
            ("min_bitrate", self.min_bitrate),
            ("max_bitrate", self.max_bitrate),
            ("buf_size", self.buf_size),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(SunderError::invalid_settings(format!(
                    "{name} must be a non-negative number, got {value}"
                )));
            }
        }

        if self.input_path.as_os_str().is_empty() || self.output_path.as_os_str().is_empty() {
            return Err(SunderError::invalid_settings(
                "input and output paths are required",
            ));
        }
        Ok(())
    }

    /// Rate-control arguments for the current values, or `None` if the codec
    /// does not support the selected mode.
    pub fn rate_control_args(&self) -> Option<Vec<String>> {
        let template = self
            .video_codec
            .descriptor()
            .rate_control(self.rate_control)?;

        let mut args = Vec::with_capacity(template.len());
        for token in template {
            match self.substitute(token) {
                Some(arg) => args.push(arg),
                None => {
                    tracing::warn!(token, codec = %self.video_codec, "Dropping argument with unknown placeholder");
                }
            }
        }
        Some(args)
    }

    /// Validate and compile these settings.
    pub fn compile(self) -> SunderResult<CompiledSettings> {
        self.validate()?;
        let rate_control_args = self.rate_control_args().ok_or_else(|| {
            SunderError::unsupported_rate_control(
                self.video_codec.as_str(),
                self.rate_control.as_str(),
            )
        })?;
        Ok(CompiledSettings {
            settings: self,
            rate_control_args,
        })
    }

    fn placeholder_value(&self, placeholder: Placeholder) -> String {
        match placeholder {
            Placeholder::TargetBitrate => format_number(self.target_bitrate),
            Placeholder::MinBitrate => format_number(self.min_bitrate),
            Placeholder::MaxBitrate => format_number(self.max_bitrate),
            Placeholder::CrfValue => self.crf_value.to_string(),
            Placeholder::BufSize => format_number(self.buf_size),
        }
    }

    fn substitute(&self, token: &str) -> Option<String> {
        let Some(open) = token.find('{') else {
            return Some(token.to_string());
        };
        let close = open + token[open..].find('}')?;
        let placeholder = Placeholder::from_name(&token[open + 1..close])?;
        let mut arg = String::with_capacity(token.len() + 8);
        arg.push_str(&token[..open]);
        arg.push_str(&self.placeholder_value(placeholder));
        arg.push_str(&token[close + 1..]);
        Some(arg)
    }
}

impl SizeLimit {
    pub fn validate(&self) -> SunderResult<()> {
        if self.max_size == 0 {
            return Err(SunderError::invalid_settings("max_size must be positive"));
        }
        if self.max_attempts == 0 {
            return Err(SunderError::invalid_settings("max_attempts must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.retry_threshold) {
            return Err(SunderError::invalid_settings(
                "retry_threshold must be between 0 and 1",
            ));
        }
        Ok(())
    }

    /// Target size in megabytes.
    pub fn max_size_mb(&self) -> f64 {
        bytes_to_mb(self.max_size)
    }
}

impl CompiledSettings {
    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    pub fn rate_control_args(&self) -> &[String] {
        &self.rate_control_args
    }

    pub fn output_path(&self) -> &Path {
        &self.settings.output_path
    }

    /// Recompile with new bitrate fields.
    pub fn with_bitrates(&self, bitrates: BitrateTriple) -> SunderResult<Self> {
        self.settings.with_bitrates(bitrates).compile()
    }

    /// Full encoder command line (without the program name).
    pub fn encoder_args(&self) -> Vec<String> {
        let s = &self.settings;
        let mut args: Vec<String> = vec![
            "-hide_banner".to_string(),
            "-nostats".to_string(),
            if s.override_file { "-y" } else { "-n" }.to_string(),
            "-ss".to_string(),
            format_number(s.trim_start),
            "-t".to_string(),
            format_number(s.duration()),
            "-i".to_string(),
            s.input_path.display().to_string(),
            "-map".to_string(),
            "0:v:0".to_string(),
            "-c:v".to_string(),
            s.video_codec.descriptor().cpu_encoder.to_string(),
        ];

        match s.audio_tracks.as_slice() {
            [] => args.push("-an".to_string()),
            [track] => {
                args.push("-map".to_string());
                args.push(format!("0:{track}"));
                args.push("-c:a".to_string());
                args.push(s.audio_codec.encoder_id().to_string());
            }
            tracks => {
                let inputs: String = tracks.iter().map(|t| format!("[0:{t}]")).collect();
                args.push("-filter_complex".to_string());
                args.push(format!("{inputs}amerge=inputs={}[a]", tracks.len()));
                args.push("-ac".to_string());
                args.push("2".to_string());
                args.push("-map".to_string());
                args.push("[a]".to_string());
                args.push("-c:a".to_string());
                args.push(s.audio_codec.encoder_id().to_string());
            }
        }

        args.extend(self.rate_control_args.iter().cloned());
        args.push("-progress".to_string());
        args.push("pipe:1".to_string());
        args.push(s.output_path.display().to_string());
        args
    }
}

/// Bytes to decimal megabytes.
pub fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / 1_000_000.0
}

/// Decimal megabytes to bytes.
pub fn mb_to_bytes(mb: f64) -> u64 {
    (mb * 1_000_000.0).round().max(0.0) as u64
}

/// Stringify a numeric field for the encoder, trimmed to three decimals.
fn format_number(value: f64) -> String {
    let rounded = (value * 1000.0).round() / 1000.0;
    format!("{rounded}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_settings() -> RenderSettings {
        RenderSettings {
            video_codec: VideoCodec::H264,
            audio_codec: AudioCodec::Aac,
            rate_control: RateControl::Cbr,
            target_bitrate: 2500.0,
            min_bitrate: 0.0,
            max_bitrate: 2500.0,
            crf_value: 23,
            buf_size: 5000.0,
            trim_start: 2.0,
            trim_end: 12.0,
            input_path: PathBuf::from("/media/in.mkv"),
            output_path: PathBuf::from("/media/out.mp4"),
            audio_tracks: vec![1],
            override_file: true,
        }
    }

    #[test]
    fn test_cbr_substitutes_all_placeholders() {
        let compiled = sample_settings().compile().unwrap();
        assert_eq!(
            compiled.rate_control_args(),
            [
                "-x264-params",
                "nal-hrd=cbr",
                "-b:v",
                "2500k",
                "-minrate",
                "0k",
                "-maxrate",
                "2500k",
                "-bufsize",
                "5000k"
            ]
        );
    }

    #[test]
    fn test_unsupported_mode_yields_no_args() {
        let mut settings = sample_settings();
        settings.rate_control = RateControl::Vbr;
        assert!(settings.rate_control_args().is_none());
        assert!(matches!(
            settings.compile(),
            Err(SunderError::UnsupportedRateControl { .. })
        ));
    }

    #[test]
    fn test_recompile_tracks_bitrate_changes() {
        let compiled = sample_settings().compile().unwrap();
        let next = compiled
            .with_bitrates(BitrateTriple {
                target: 1234.5678,
                min: 0.01,
                max: 1500.0,
            })
            .unwrap();
        assert_eq!(next.settings().target_bitrate, 1234.5678);
        assert!(next.rate_control_args().contains(&"1234.568k".to_string()));
        assert!(next.rate_control_args().contains(&"0.01k".to_string()));
        assert!(next.rate_control_args().contains(&"1500k".to_string()));
    }

    #[test]
    fn test_crf_uses_crf_value() {
        let mut settings = sample_settings();
        settings.video_codec = VideoCodec::Vp9;
        settings.rate_control = RateControl::Crf;
        settings.crf_value = 31;
        let compiled = settings.compile().unwrap();
        assert_eq!(compiled.rate_control_args(), ["-crf", "31", "-b:v", "0"]);
    }

    #[test]
    fn test_crf_out_of_range_is_rejected() {
        let mut settings = sample_settings();
        settings.rate_control = RateControl::Crf;
        settings.crf_value = 60;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_trim_window_must_be_positive() {
        let mut settings = sample_settings();
        settings.trim_end = settings.trim_start;
        assert!(matches!(
            settings.validate(),
            Err(SunderError::InvalidSettings { .. })
        ));
    }

    #[test]
    fn test_seeded_bitrate_fills_target_size() {
        let limit = SizeLimit {
            max_size: 10_000_000,
            max_attempts: 3,
            retry_threshold: 0.1,
        };
        // 10 MB over 10 s = 8000 kbps
        let seeded = sample_settings().seeded_for(&limit).unwrap();
        assert!((seeded.target_bitrate - 8000.0).abs() < 1e-9);
        assert!((seeded.max_bitrate - 8000.0).abs() < 1e-9);
        assert_eq!(seeded.min_bitrate, 0.0);
    }

    #[test]
    fn test_encoder_args_merge_multiple_audio_tracks() {
        let mut settings = sample_settings();
        settings.audio_tracks = vec![1, 2, 3];
        let args = settings.compile().unwrap().encoder_args();

        let filter_pos = args.iter().position(|a| a == "-filter_complex").unwrap();
        assert_eq!(args[filter_pos + 1], "[0:1][0:2][0:3]amerge=inputs=3[a]");
        assert!(args.windows(2).any(|w| w[0] == "-t" && w[1] == "10"));
        assert_eq!(args.last().map(String::as_str), Some("/media/out.mp4"));
        assert!(args.windows(2).any(|w| w[0] == "-progress" && w[1] == "pipe:1"));
    }

    #[test]
    fn test_encoder_args_without_audio() {
        let mut settings = sample_settings();
        settings.audio_tracks.clear();
        settings.override_file = false;
        let args = settings.compile().unwrap().encoder_args();
        assert!(args.contains(&"-an".to_string()));
        assert!(args.contains(&"-n".to_string()));
        assert!(!args.contains(&"-c:a".to_string()));
    }
}
