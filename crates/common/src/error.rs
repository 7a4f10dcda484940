//! Error types shared across Sunder crates.

use std::path::PathBuf;

/// Top-level error type for Sunder operations.
#[derive(Debug, thiserror::Error)]
pub enum SunderError {
    /// The external encoder could not be started.
    #[error("Failed to launch render: {message}")]
    Launch { message: String },

    /// The encoder reported an error through its progress stream.
    #[error("Encoder error: {message}")]
    Encoder { message: String },

    /// The output file stayed locked after every removal attempt.
    #[error("Output file {path} is still in use after {attempts} removal attempts")]
    FileContention { path: PathBuf, attempts: u32 },

    #[error("Codec {codec} does not support {mode} rate control")]
    UnsupportedRateControl { codec: String, mode: String },

    #[error("Invalid render settings: {message}")]
    InvalidSettings { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using SunderError.
pub type SunderResult<T> = Result<T, SunderError>;

impl SunderError {
    pub fn launch(msg: impl Into<String>) -> Self {
        Self::Launch {
            message: msg.into(),
        }
    }

    pub fn encoder(msg: impl Into<String>) -> Self {
        Self::Encoder {
            message: msg.into(),
        }
    }

    pub fn invalid_settings(msg: impl Into<String>) -> Self {
        Self::InvalidSettings {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn unsupported_rate_control(codec: impl Into<String>, mode: impl Into<String>) -> Self {
        Self::UnsupportedRateControl {
            codec: codec.into(),
            mode: mode.into(),
        }
    }

    /// Whether this error should be shown to the user as a failed render
    /// rather than an internal fault.
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            Self::Launch { .. } | Self::Encoder { .. } | Self::FileContention { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = SunderError::unsupported_rate_control("h264", "vbr");
        assert_eq!(err.to_string(), "Codec h264 does not support vbr rate control");

        let err = SunderError::FileContention {
            path: PathBuf::from("/tmp/out.mp4"),
            attempts: 10,
        };
        assert!(err.to_string().contains("after 10 removal attempts"));
    }

    #[test]
    fn test_user_visible_classification() {
        assert!(SunderError::launch("spawn failed").is_user_visible());
        assert!(SunderError::encoder("bad input").is_user_visible());
        assert!(!SunderError::config("bad").is_user_visible());
    }
}
