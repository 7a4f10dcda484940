//! Encoder progress parsing.
//!
//! The encoder reports progress as blocks of `key=value` lines, one block
//! per report, each ending with a `progress=continue` or `progress=end`
//! line. [`ProgressParser`] folds those blocks into a [`ProgressSnapshot`],
//! carrying forward any field a block leaves out.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sunder_common::clock::{eta_from, Clock};

/// Prefix marking a block as an encoder error rather than telemetry.
pub const ERROR_PREFIX: &str = "error:";

/// Value the encoder reports for a field it has no data for.
pub const NOT_AVAILABLE: &str = "N/A";

/// Lifecycle of a render job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderState {
    /// Attempt requested, no telemetry yet.
    Loading,
    /// Telemetry is arriving.
    Rendering,
    /// Attempt finished, checking the output size.
    Validating,
    Errored,
    Finished,
}

impl RenderState {
    /// `Errored` and `Finished` absorb every later block.
    pub fn is_terminal(self) -> bool {
        matches!(self, RenderState::Errored | RenderState::Finished)
    }

    /// Status line for display.
    pub fn describe(self) -> &'static str {
        match self {
            RenderState::Loading => "Preparing render...",
            RenderState::Rendering => "Rendering...",
            RenderState::Validating => "Checking file size...",
            RenderState::Errored => "Render failed.",
            RenderState::Finished => "Render completed.",
        }
    }
}

/// Progress of the current attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub state: RenderState,
    /// Fraction of the trimmed range encoded [0.0, 1.0].
    pub percentage: f64,
    /// Media time encoded so far, in milliseconds.
    pub current_time_ms: f64,
    pub fps: f64,
    /// Encode speed as a multiple of real time.
    pub speed: f64,
    pub eta: Option<DateTime<Utc>>,
    pub error_msg: Option<String>,
    /// The encoder reported the end of the current attempt.
    pub done_current: bool,
}

impl Default for ProgressSnapshot {
    fn default() -> Self {
        Self {
            state: RenderState::Loading,
            percentage: 0.0,
            current_time_ms: 0.0,
            fps: 0.0,
            speed: 1.0,
            eta: None,
            error_msg: None,
            done_current: false,
        }
    }
}

/// Folds telemetry blocks into snapshots.
pub struct ProgressParser {
    total_duration: f64,
    clock: Arc<dyn Clock>,
    last: ProgressSnapshot,
}

impl ProgressParser {
    /// `total_duration` is the length of the trimmed range in seconds.
    pub fn new(total_duration: f64, clock: Arc<dyn Clock>) -> Self {
        Self {
            total_duration,
            clock,
            last: ProgressSnapshot::default(),
        }
    }

    /// The most recent snapshot.
    pub fn snapshot(&self) -> &ProgressSnapshot {
        &self.last
    }

    /// Start a new attempt: back to `Loading` at 0%.
    pub fn reset(&mut self) {
        self.last = ProgressSnapshot::default();
    }

    /// Force a state, e.g. `Validating` once the orchestrator takes over.
    /// Terminal states are never left.
    pub fn set_state(&mut self, state: RenderState) -> &ProgressSnapshot {
        if !self.last.state.is_terminal() {
            self.last.state = state;
        }
        &self.last
    }

    /// Mark the attempt as failed with a message.
    pub fn fail(&mut self, message: impl Into<String>) -> &ProgressSnapshot {
        if !self.last.state.is_terminal() {
            self.last.state = RenderState::Errored;
            self.last.error_msg = Some(message.into());
        }
        &self.last
    }

    /// Apply one telemetry block and return the resulting snapshot.
    pub fn parse_block(&mut self, block: &str) -> &ProgressSnapshot {
        if self.last.state.is_terminal() {
            tracing::trace!(state = ?self.last.state, "Ignoring telemetry after terminal state");
            return &self.last;
        }

        let mut next = self.last.clone();

        if let Some(message) = block.strip_prefix(ERROR_PREFIX) {
            next.state = RenderState::Errored;
            next.error_msg = Some(message.trim().to_string());
            tracing::debug!(error = %message.trim(), "Encoder reported an error");
            self.last = next;
            return &self.last;
        }

        for line in block.lines() {
            let Some((key, value)) = line.trim().split_once('=') else {
                continue;
            };
            let value = value.trim();
            if value == NOT_AVAILABLE {
                continue;
            }
            self.apply_field(&mut next, key.trim(), value);
        }

        if next.state == RenderState::Loading {
            next.state = RenderState::Rendering;
        }

        self.last = next;
        &self.last
    }

    fn apply_field(&self, next: &mut ProgressSnapshot, key: &str, value: &str) {
        match key {
            "out_time_us" => {
                if let Ok(us) = value.parse::<f64>() {
                    next.current_time_ms = us / 1000.0;
                    if !next.done_current {
                        next.percentage = self.percentage_at(next.current_time_ms);
                    }
                }
            }
            // Duplicates out_time_us under the wrong unit.
            "out_time_ms" => {}
            "speed" => {
                if let Some(speed) = parse_speed(value) {
                    next.speed = speed;
                    next.eta = eta_from(
                        self.clock.now(),
                        self.total_duration * 1000.0 - next.current_time_ms,
                        speed,
                    );
                }
            }
            "fps" => {
                if let Ok(fps) = value.parse::<f64>() {
                    next.fps = fps;
                }
            }
            "progress" => {
                if value == "end" {
                    next.done_current = true;
                    next.percentage = 1.0;
                }
            }
            _ => {}
        }
    }

    fn percentage_at(&self, current_time_ms: f64) -> f64 {
        if self.total_duration <= 0.0 {
            return 0.0;
        }
        (current_time_ms / 1000.0 / self.total_duration).clamp(0.0, 1.0)
    }
}

/// Parse `1.25x` or `1.25` into a multiplier.
fn parse_speed(value: &str) -> Option<f64> {
    let speed = value.trim_end_matches('x').trim().parse::<f64>().ok()?;
    speed.is_finite().then_some(speed)
}

/// Splits a raw line stream into telemetry blocks.
///
/// A block ends at each `progress=` line; lines starting with the error
/// prefix are emitted as a block of their own.
#[derive(Debug, Default)]
pub struct TelemetryBlocks {
    pending: String,
}

impl TelemetryBlocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line; returns a block when the line completes one.
    pub fn push_line(&mut self, line: &str) -> Option<String> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.starts_with(ERROR_PREFIX) {
            self.pending.clear();
            return Some(line.to_string());
        }
        if line.trim().is_empty() {
            return None;
        }
        self.pending.push_str(line);
        self.pending.push('\n');
        if line.starts_with("progress=") {
            return Some(std::mem::take(&mut self.pending));
        }
        None
    }

    /// Lines received since the last complete block.
    pub fn flush(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;
    use sunder_common::clock::FixedClock;

    fn epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn parser(total_duration: f64) -> ProgressParser {
        ProgressParser::new(total_duration, Arc::new(FixedClock::new(epoch())))
    }

    #[test]
    fn test_first_block_moves_to_rendering() {
        let mut p = parser(10.0);
        assert_eq!(p.snapshot().state, RenderState::Loading);
        let snap = p.parse_block("frame=10\nfps=30.5\nout_time_us=2500000\nprogress=continue\n");
        assert_eq!(snap.state, RenderState::Rendering);
        assert!((snap.current_time_ms - 2500.0).abs() < 1e-9);
        assert!((snap.percentage - 0.25).abs() < 1e-9);
        assert!((snap.fps - 30.5).abs() < 1e-9);
    }

    #[test]
    fn test_out_time_ms_is_ignored() {
        let mut p = parser(10.0);
        p.parse_block("out_time_us=1000000\nprogress=continue");
        let snap = p.parse_block("out_time_ms=9000000\nprogress=continue");
        assert!((snap.current_time_ms - 1000.0).abs() < 1e-9);
        assert!((snap.percentage - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_speed_sets_eta() {
        let mut p = parser(10.0);
        let snap = p.parse_block("out_time_us=4000000\nspeed=2x\nprogress=continue");
        assert!((snap.speed - 2.0).abs() < 1e-9);
        // 6 s of media left at 2x
        assert_eq!(snap.eta, Some(epoch() + Duration::seconds(3)));
    }

    #[test]
    fn test_end_forces_full_percentage_and_skips_validating() {
        let mut p = parser(10.0);
        let snap = p.parse_block("out_time_us=9000000\nprogress=end");
        assert!(snap.done_current);
        assert_eq!(snap.percentage, 1.0);
        assert_eq!(snap.state, RenderState::Rendering);
    }

    #[test]
    fn test_error_block_skips_field_parsing() {
        let mut p = parser(10.0);
        p.parse_block("out_time_us=1000000\nprogress=continue");
        let snap = p.parse_block("error:Conversion failed!\nout_time_us=9000000\nprogress=end");
        assert_eq!(snap.state, RenderState::Errored);
        assert_eq!(
            snap.error_msg.as_deref(),
            Some("Conversion failed!\nout_time_us=9000000\nprogress=end")
        );
        assert!(!snap.done_current);
        assert!((snap.current_time_ms - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn test_terminal_state_absorbs_blocks() {
        let mut p = parser(10.0);
        p.parse_block("error:boom");
        let snap = p.parse_block("out_time_us=5000000\nprogress=continue");
        assert_eq!(snap.state, RenderState::Errored);
        assert_eq!(snap.current_time_ms, 0.0);
        assert_eq!(p.set_state(RenderState::Validating).state, RenderState::Errored);
    }

    #[test]
    fn test_reset_starts_fresh_attempt() {
        let mut p = parser(10.0);
        p.parse_block("out_time_us=9000000\nprogress=end");
        p.set_state(RenderState::Validating);
        p.reset();
        assert_eq!(p.snapshot(), &ProgressSnapshot::default());
    }

    #[test]
    fn test_telemetry_blocks_split_on_progress_lines() {
        let mut blocks = TelemetryBlocks::new();
        assert_eq!(blocks.push_line("fps=25"), None);
        assert_eq!(blocks.push_line("out_time_us=100"), None);
        assert_eq!(
            blocks.push_line("progress=continue\n"),
            Some("fps=25\nout_time_us=100\nprogress=continue\n".to_string())
        );
        assert_eq!(blocks.push_line("error:disk full"), Some("error:disk full".to_string()));
        assert_eq!(blocks.push_line("fps=30"), None);
        assert_eq!(blocks.flush(), Some("fps=30\n".to_string()));
        assert_eq!(blocks.flush(), None);
    }

    fn field_line() -> impl Strategy<Value = String> {
        prop_oneof![
            (0u64..20_000_000).prop_map(|v| format!("out_time_us={v}")),
            (0.0f64..240.0).prop_map(|v| format!("fps={v}")),
            (0.01f64..16.0).prop_map(|v| format!("speed={v}x")),
            Just("out_time_us=N/A".to_string()),
            Just("fps=N/A".to_string()),
            Just("speed=N/A".to_string()),
            Just("bitrate=N/A".to_string()),
        ]
    }

    proptest! {
        #[test]
        fn prop_not_available_fields_carry_forward(
            first in prop::collection::vec(field_line(), 1..8),
            omitted in prop::sample::select(vec!["out_time_us", "fps", "speed"]),
        ) {
            let mut p = parser(20.0);
            p.parse_block(&format!("{}\nprogress=continue", first.join("\n")));
            let before = p.snapshot().clone();

            p.parse_block(&format!("{omitted}=N/A\nprogress=continue"));
            let after = p.snapshot();

            prop_assert_eq!(before.current_time_ms, after.current_time_ms);
            prop_assert_eq!(before.fps, after.fps);
            prop_assert_eq!(before.speed, after.speed);
            prop_assert_eq!(before.eta, after.eta);
            prop_assert_eq!(before.percentage, after.percentage);
        }

        #[test]
        fn prop_done_attempt_stays_complete(
            times in prop::collection::vec(0u64..20_000_000, 0..5),
        ) {
            let mut p = parser(20.0);
            p.parse_block("out_time_us=1000\nprogress=end");
            for t in times {
                let snap = p.parse_block(&format!("out_time_us={t}\nprogress=continue"));
                prop_assert!(snap.done_current);
                prop_assert_eq!(snap.percentage, 1.0);
            }
        }

        #[test]
        fn prop_error_prefix_always_errors(body in ".*") {
            let mut p = parser(20.0);
            let snap = p.parse_block(&format!("{ERROR_PREFIX}{body}"));
            prop_assert_eq!(snap.state, RenderState::Errored);
            prop_assert!(!snap.done_current);
            prop_assert_eq!(snap.current_time_ms, 0.0);
        }
    }
}
