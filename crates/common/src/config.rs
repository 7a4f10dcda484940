//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{SunderError, SunderResult};

/// Global application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Defaults applied to size-limited renders.
    pub render: RenderDefaults,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Default parameters for the size-targeting render loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderDefaults {
    /// Attempts allowed when a size limit is set.
    pub max_attempts: u32,

    /// Acceptable undershoot as a fraction of the target size.
    pub retry_threshold: f64,

    /// Gain applied to the change in size error when sizing the next step.
    pub step_gain: f64,

    /// How the stale output of a rejected attempt is removed.
    pub output_removal: RetryPolicy,
}

/// Bounded retry with a delay between tries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total number of tries, including the first.
    pub max_tries: u32,

    /// Delay before the second try.
    pub delay_ms: u64,

    /// How the delay grows between tries.
    pub backoff: Backoff,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Backoff {
    Fixed,
    Exponential { factor: f64 },
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "sunder=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for RenderDefaults {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_threshold: 0.1,
            step_gain: 42.0,
            output_removal: RetryPolicy::default(),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_tries: 10,
            delay_ms: 1000,
            backoff: Backoff::Fixed,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the given failed try (1-based).
    pub fn delay_after(&self, try_number: u32) -> Duration {
        let base = self.delay_ms as f64;
        let ms = match self.backoff {
            Backoff::Fixed => base,
            Backoff::Exponential { factor } => {
                base * factor.max(1.0).powi(try_number.saturating_sub(1) as i32)
            }
        };
        Duration::from_millis(ms.round() as u64)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(content) => match serde_json::from_str::<AppConfig>(&content) {
                    Ok(config) => match config.validate() {
                        Ok(()) => return config,
                        Err(e) => {
                            tracing::warn!("Ignoring config at {:?}: {}", config_path, e);
                        }
                    },
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<PathBuf, std::io::Error> {
        let config_path = config_file_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(&config_path, json)?;
        Ok(config_path)
    }

    /// Reject values the render loop cannot work with.
    pub fn validate(&self) -> SunderResult<()> {
        let render = &self.render;
        if render.max_attempts == 0 {
            return Err(SunderError::config("render.max_attempts must be at least 1"));
        }
        if !(0.0..=1.0).contains(&render.retry_threshold) {
            return Err(SunderError::config(
                "render.retry_threshold must be between 0 and 1",
            ));
        }
        if !render.step_gain.is_finite() || render.step_gain < 0.0 {
            return Err(SunderError::config("render.step_gain must be non-negative"));
        }
        if render.output_removal.max_tries == 0 {
            return Err(SunderError::config(
                "render.output_removal.max_tries must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("sunder").join("config.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.render.output_removal.max_tries, 10);
        assert_eq!(
            config.render.output_removal.delay_after(3),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn test_exponential_backoff_delay() {
        let policy = RetryPolicy {
            max_tries: 5,
            delay_ms: 100,
            backoff: Backoff::Exponential { factor: 2.0 },
        };
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(3), Duration::from_millis(400));
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"render":{"max_attempts":5}}"#).unwrap();
        assert_eq!(config.render.max_attempts, 5);
        assert!((config.render.retry_threshold - 0.1).abs() < f64::EPSILON);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let mut config = AppConfig::default();
        config.render.max_attempts = 0;
        assert!(config.validate().is_err());
    }
}
