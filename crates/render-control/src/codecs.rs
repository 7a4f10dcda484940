//! Codec descriptor table.
//!
//! Maps each `(video codec, rate-control mode)` pair to the ordered
//! argument template the encoder expects. Templates may embed one of the
//! placeholders in [`Placeholder`]; the settings compiler substitutes the
//! live numeric value when the settings are compiled.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Supported video codecs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    H264,
    H265,
    Av1,
    Gif,
    Vp9,
}

/// Rate-control strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateControl {
    /// Constant bitrate.
    Cbr,
    /// Variable bitrate bounded by min/max rates.
    Vbr,
    /// Average bitrate.
    Abr,
    /// Constant quality.
    Crf,
}

/// Supported audio codecs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    Aac,
    Mp3,
    Ogg,
    Vorbis,
    Opus,
    Flac,
    Alac,
}

/// Valid CRF values for a codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrfRange {
    pub default: u32,
    pub min: u32,
    pub max: u32,
}

impl CrfRange {
    pub fn contains(&self, value: u32) -> bool {
        (self.min..=self.max).contains(&value)
    }
}

/// Static description of a video codec.
#[derive(Debug, Clone, Copy)]
pub struct CodecDescriptor {
    pub codec: VideoCodec,
    /// Output container extension.
    pub container: &'static str,
    /// Software encoder name.
    pub cpu_encoder: &'static str,
    pub friendly_name: &'static str,
    pub crf: Option<CrfRange>,
    cbr: Option<&'static [&'static str]>,
    vbr: Option<&'static [&'static str]>,
    abr: Option<&'static [&'static str]>,
    crf_args: Option<&'static [&'static str]>,
}

/// Numeric settings fields that argument templates may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    TargetBitrate,
    MinBitrate,
    MaxBitrate,
    CrfValue,
    BufSize,
}

impl Placeholder {
    pub const ALL: [Placeholder; 5] = [
        Placeholder::TargetBitrate,
        Placeholder::MinBitrate,
        Placeholder::MaxBitrate,
        Placeholder::CrfValue,
        Placeholder::BufSize,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.name() == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            Placeholder::TargetBitrate => "TARGET_BITRATE",
            Placeholder::MinBitrate => "MIN_BITRATE",
            Placeholder::MaxBitrate => "MAX_BITRATE",
            Placeholder::CrfValue => "CRF_VALUE",
            Placeholder::BufSize => "BUF_SIZE",
        }
    }
}

const H264: CodecDescriptor = CodecDescriptor {
    codec: VideoCodec::H264,
    container: "mp4",
    cpu_encoder: "libx264",
    friendly_name: "H.264",
    crf: Some(CrfRange {
        default: 23,
        min: 0,
        max: 51,
    }),
    cbr: Some(&[
        "-x264-params",
        "nal-hrd=cbr",
        "-b:v",
        "{TARGET_BITRATE}k",
        "-minrate",
        "{MIN_BITRATE}k",
        "-maxrate",
        "{MAX_BITRATE}k",
        "-bufsize",
        "{BUF_SIZE}k",
    ]),
    vbr: None,
    abr: Some(&["-b:v", "{TARGET_BITRATE}k"]),
    crf_args: Some(&["-crf", "{CRF_VALUE}"]),
};

const H265: CodecDescriptor = CodecDescriptor {
    codec: VideoCodec::H265,
    container: "mp4",
    cpu_encoder: "libx265",
    friendly_name: "H.265",
    crf: Some(CrfRange {
        default: 28,
        min: 0,
        max: 51,
    }),
    cbr: None,
    vbr: Some(&[]),
    abr: Some(&["-b:v", "{TARGET_BITRATE}k"]),
    crf_args: Some(&["-crf", "{CRF_VALUE}"]),
};

const AV1: CodecDescriptor = CodecDescriptor {
    codec: VideoCodec::Av1,
    container: "mp4",
    cpu_encoder: "libaom-av1",
    friendly_name: "AV1",
    crf: Some(CrfRange {
        default: 30,
        min: 0,
        max: 64,
    }),
    cbr: None,
    vbr: Some(&[
        "-b:v",
        "{TARGET_BITRATE}k",
        "-minrate",
        "{MIN_BITRATE}k",
        "-maxrate",
        "{MAX_BITRATE}k",
    ]),
    abr: Some(&["-b:v", "{TARGET_BITRATE}k"]),
    crf_args: Some(&["-crf", "{CRF_VALUE}"]),
};

const GIF: CodecDescriptor = CodecDescriptor {
    codec: VideoCodec::Gif,
    container: "gif",
    cpu_encoder: "gif",
    friendly_name: "GIF",
    crf: None,
    cbr: Some(&[]),
    vbr: Some(&[]),
    abr: Some(&["-b:v", "{TARGET_BITRATE}k"]),
    crf_args: None,
};

const VP9: CodecDescriptor = CodecDescriptor {
    codec: VideoCodec::Vp9,
    container: "webm",
    cpu_encoder: "libvpx-vp9",
    friendly_name: "VP9",
    crf: Some(CrfRange {
        default: 30,
        min: 0,
        max: 63,
    }),
    cbr: Some(&[
        "-b:v",
        "{TARGET_BITRATE}k",
        "-minrate",
        "{TARGET_BITRATE}k",
        "-maxrate",
        "{TARGET_BITRATE}k",
    ]),
    vbr: Some(&[
        "-b:v",
        "{TARGET_BITRATE}k",
        "-minrate",
        "{MIN_BITRATE}k",
        "-maxrate",
        "{MAX_BITRATE}k",
    ]),
    abr: Some(&["-b:v", "{TARGET_BITRATE}k"]),
    crf_args: Some(&["-crf", "{CRF_VALUE}", "-b:v", "0"]),
};

impl VideoCodec {
    pub const ALL: [VideoCodec; 5] = [
        VideoCodec::H264,
        VideoCodec::H265,
        VideoCodec::Av1,
        VideoCodec::Gif,
        VideoCodec::Vp9,
    ];

    pub fn descriptor(self) -> &'static CodecDescriptor {
        match self {
            VideoCodec::H264 => &H264,
            VideoCodec::H265 => &H265,
            VideoCodec::Av1 => &AV1,
            VideoCodec::Gif => &GIF,
            VideoCodec::Vp9 => &VP9,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            VideoCodec::H264 => "h264",
            VideoCodec::H265 => "h265",
            VideoCodec::Av1 => "av1",
            VideoCodec::Gif => "gif",
            VideoCodec::Vp9 => "vp9",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == value)
    }
}

impl CodecDescriptor {
    /// Argument template for a rate-control mode, or `None` when the codec
    /// does not support that mode. An empty template means the mode is
    /// supported but needs no extra arguments.
    pub fn rate_control(&self, mode: RateControl) -> Option<&'static [&'static str]> {
        match mode {
            RateControl::Cbr => self.cbr,
            RateControl::Vbr => self.vbr,
            RateControl::Abr => self.abr,
            RateControl::Crf => self.crf_args,
        }
    }

    pub fn supports(&self, mode: RateControl) -> bool {
        self.rate_control(mode).is_some()
    }

    /// Whether the template for `mode` sets the video bitrate, so that
    /// changing the bitrate fields changes the output size.
    pub fn is_bitrate_driven(&self, mode: RateControl) -> bool {
        let bitrate_tokens = [Placeholder::TargetBitrate, Placeholder::MaxBitrate]
            .map(|p| format!("{{{}}}", p.name()));
        self.rate_control(mode).is_some_and(|template| {
            template
                .iter()
                .any(|token| bitrate_tokens.iter().any(|t| token.contains(t.as_str())))
        })
    }

    /// Rate-control modes this codec accepts.
    pub fn supported_modes(&self) -> Vec<RateControl> {
        RateControl::ALL
            .into_iter()
            .filter(|mode| self.supports(*mode))
            .collect()
    }
}

impl RateControl {
    pub const ALL: [RateControl; 4] = [
        RateControl::Cbr,
        RateControl::Vbr,
        RateControl::Abr,
        RateControl::Crf,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RateControl::Cbr => "cbr",
            RateControl::Vbr => "vbr",
            RateControl::Abr => "abr",
            RateControl::Crf => "crf",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.as_str() == value)
    }
}

impl AudioCodec {
    pub const ALL: [AudioCodec; 7] = [
        AudioCodec::Aac,
        AudioCodec::Mp3,
        AudioCodec::Ogg,
        AudioCodec::Vorbis,
        AudioCodec::Opus,
        AudioCodec::Flac,
        AudioCodec::Alac,
    ];

    /// Encoder name passed to `-c:a`.
    pub fn encoder_id(self) -> &'static str {
        match self {
            AudioCodec::Aac => "aac",
            AudioCodec::Mp3 => "libmp3lame",
            AudioCodec::Ogg => "ogg",
            AudioCodec::Vorbis => "vorbis",
            AudioCodec::Opus => "opus",
            AudioCodec::Flac => "flac",
            AudioCodec::Alac => "alac",
        }
    }

    pub fn friendly_name(self) -> &'static str {
        match self {
            AudioCodec::Aac => "AAC",
            AudioCodec::Mp3 => "MP3",
            AudioCodec::Ogg => "OGG",
            AudioCodec::Vorbis => "Vorbis",
            AudioCodec::Opus => "Opus",
            AudioCodec::Flac => "FLAC (lossless)",
            AudioCodec::Alac => "ALAC (lossless)",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AudioCodec::Aac => "aac",
            AudioCodec::Mp3 => "mp3",
            AudioCodec::Ogg => "ogg",
            AudioCodec::Vorbis => "vorbis",
            AudioCodec::Opus => "opus",
            AudioCodec::Flac => "flac",
            AudioCodec::Alac => "alac",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == value)
    }
}

impl fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for RateControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for AudioCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
