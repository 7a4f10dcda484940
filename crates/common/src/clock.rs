//! Wall-clock access for progress estimates.
//!
//! ETA values are absolute timestamps, so anything that computes one takes
//! a [`Clock`] instead of reading the system time directly. Tests use
//! [`FixedClock`] to get deterministic estimates.

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Timestamp `remaining_ms` of media time from now at the given speed
/// multiplier. Returns `None` when the speed is not positive or the
/// estimate is out of range.
pub fn eta_from(now: DateTime<Utc>, remaining_ms: f64, speed: f64) -> Option<DateTime<Utc>> {
    if !speed.is_finite() || speed <= 0.0 || !remaining_ms.is_finite() {
        return None;
    }
    let wall_ms = (remaining_ms.max(0.0) / speed).round() as i64;
    Duration::try_milliseconds(wall_ms).and_then(|wall| now.checked_add_signed(wall))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_fixed_clock_advances() {
        let clock = FixedClock::new(epoch());
        clock.advance(Duration::seconds(5));
        assert_eq!(clock.now(), epoch() + Duration::seconds(5));
    }

    #[test]
    fn test_eta_scales_with_speed() {
        let eta = eta_from(epoch(), 10_000.0, 2.0).unwrap();
        assert_eq!(eta, epoch() + Duration::seconds(5));
    }

    #[test]
    fn test_eta_requires_positive_speed() {
        assert!(eta_from(epoch(), 10_000.0, 0.0).is_none());
        assert!(eta_from(epoch(), 10_000.0, f64::NAN).is_none());
    }

    #[test]
    fn test_eta_never_in_the_past() {
        assert_eq!(eta_from(epoch(), -500.0, 1.0), Some(epoch()));
    }
}
