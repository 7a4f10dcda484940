//! Bitrate search for size-limited renders.
//!
//! After each attempt the measured output size is compared with the size
//! limit. Overshooting attempts tighten an upper bound, undershooting ones
//! raise a lower bound. While only one bound is known the bitrate is scaled
//! by the size error; once both are known the search stays inside the
//! bracket. The last permitted attempt reuses the best configuration seen.

use serde::{Deserialize, Serialize};

use crate::settings::{bytes_to_mb, BitrateTriple, SizeLimit, MIN_BITRATE_KBPS};

/// Default gain on the change in size error between attempts.
pub const DEFAULT_STEP_GAIN: f64 = 42.0;

/// Fraction of the bracket width kept clear at each end, so a bracketed
/// step never lands on a bound that is already known to miss.
const BRACKET_MARGIN: f64 = 0.05;

/// Bounds learned across the attempts of one job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchMemory {
    /// Tightest bitrate known to overshoot the limit.
    pub max_set_bitrate: Option<f64>,
    /// Loosest bitrate known to undershoot the limit.
    pub min_set_bitrate: Option<f64>,
    /// Signed size error of the previous attempt.
    pub last_percent_diff: f64,
}

/// Best attempt seen so far.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BestAttempt {
    pub bitrate: BitrateTriple,
    pub size_bytes: u64,
}

/// One completed attempt, for display.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    /// Target bitrate in kbps.
    pub bitrate: f64,
    pub size_mb: f64,
}

impl AttemptRecord {
    pub fn new(attempt: u32, bitrate: f64, size_bytes: u64) -> Self {
        Self {
            attempt,
            bitrate,
            size_mb: bytes_to_mb(size_bytes),
        }
    }
}

/// Decision after an attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Adjustment {
    /// Output is within tolerance; stop.
    Accept,
    /// Try again with these bitrates.
    Retry(BitrateTriple),
}

/// Bitrate search state for one size-limited job.
#[derive(Debug, Clone)]
pub struct BitrateSearch {
    limit: SizeLimit,
    step_gain: f64,
    memory: SearchMemory,
    best: Option<BestAttempt>,
}

impl BitrateSearch {
    pub fn new(limit: SizeLimit) -> Self {
        Self::with_step_gain(limit, DEFAULT_STEP_GAIN)
    }

    pub fn with_step_gain(limit: SizeLimit, step_gain: f64) -> Self {
        Self {
            limit,
            step_gain,
            memory: SearchMemory::default(),
            best: None,
        }
    }

    pub fn limit(&self) -> &SizeLimit {
        &self.limit
    }

    pub fn memory(&self) -> &SearchMemory {
        &self.memory
    }

    pub fn best(&self) -> Option<&BestAttempt> {
        self.best.as_ref()
    }

    /// Signed size error: positive over the limit, negative under.
    pub fn percent_diff(&self, size_bytes: u64) -> f64 {
        size_bytes as f64 / self.limit.max_size as f64 - 1.0
    }

    /// Offer an attempt as the new best. Returns whether it was taken.
    pub fn record_attempt(&mut self, bitrate: BitrateTriple, size_bytes: u64) -> bool {
        let target = self.limit.max_size;
        let better = match &self.best {
            None => true,
            Some(best) if size_bytes <= target => {
                bitrate.target > best.bitrate.target || best.size_bytes > target
            }
            Some(best) => size_bytes < best.size_bytes,
        };
        if better {
            self.best = Some(BestAttempt {
                bitrate,
                size_bytes,
            });
        }
        better
    }

    /// Decide what to do after an attempt that used `current` and produced
    /// `size_bytes`. `final_attempt` is set when the next attempt is the
    /// last one the budget allows.
    pub fn adjust(
        &mut self,
        current: BitrateTriple,
        size_bytes: u64,
        final_attempt: bool,
    ) -> Adjustment {
        let percent_diff = self.percent_diff(size_bytes);

        if percent_diff == 0.0
            || (percent_diff <= 0.0 && percent_diff.abs() < self.limit.retry_threshold)
        {
            tracing::debug!(percent_diff, "Output size within tolerance");
            return Adjustment::Accept;
        }

        if percent_diff > 0.0 {
            let bound = self
                .memory
                .max_set_bitrate
                .map_or(current.max, |known| known.min(current.max));
            self.memory.max_set_bitrate = Some(bound);
        } else {
            let bound = self
                .memory
                .min_set_bitrate
                .map_or(current.target, |known| known.max(current.target));
            self.memory.min_set_bitrate = Some(bound);
        }

        let next = match (final_attempt, self.best) {
            (true, Some(best)) => self.best_triple(best),
            _ => self.search_step(current, percent_diff),
        };

        tracing::debug!(
            percent_diff,
            final_attempt,
            max_set = ?self.memory.max_set_bitrate,
            min_set = ?self.memory.min_set_bitrate,
            next_target = next.target,
            "Computed next bitrate"
        );

        self.memory.last_percent_diff = percent_diff;
        Adjustment::Retry(next)
    }

    /// Step size multiplier: large when the error trend changes, small
    /// while converging steadily.
    pub fn step_multiplier(&self, percent_diff: f64) -> f64 {
        let trend = (self.memory.last_percent_diff.abs() - percent_diff.abs()).abs();
        (self.step_gain * trend).sqrt() + 1.0
    }

    fn search_step(&self, current: BitrateTriple, percent_diff: f64) -> BitrateTriple {
        let bitrate = match (self.memory.min_set_bitrate, self.memory.max_set_bitrate) {
            (Some(low), Some(high)) if high > low => {
                let width = high - low;
                let mid = low + width / 2.0;
                let margin = width * BRACKET_MARGIN;
                (mid - percent_diff * width).clamp(low + margin, high - margin)
            }
            (Some(low), Some(high)) => {
                // Bracket collapsed: the encoder is not monotonic here.
                ((low + high) / 2.0).max(MIN_BITRATE_KBPS)
            }
            (low, high) => {
                let multiplier = self.step_multiplier(percent_diff);
                let mut scaled = current.target * (1.0 - percent_diff * multiplier);
                if let Some(high) = high {
                    scaled = scaled.min(high);
                }
                if let Some(low) = low {
                    scaled = scaled.max(low);
                }
                scaled.max(MIN_BITRATE_KBPS)
            }
        };

        BitrateTriple {
            target: bitrate,
            min: current.min,
            max: bitrate,
        }
    }

    fn best_triple(&self, best: BestAttempt) -> BitrateTriple {
        let max = if self.memory.max_set_bitrate.is_some() {
            best.bitrate.max
        } else {
            best.bitrate.target
        };
        BitrateTriple {
            target: best.bitrate.target,
            min: best.bitrate.min.max(MIN_BITRATE_KBPS),
            max,
        }
    }
}
