//! Replay a recorded progress log through the progress parser.

use std::path::PathBuf;
use std::sync::Arc;

use sunder_common::clock::SystemClock;
use sunder_common::error::SunderError;
use sunder_render_control::{ProgressParser, ProgressSnapshot, TelemetryBlocks};

pub fn run(path: PathBuf, duration: f64, json: bool) -> anyhow::Result<()> {
    if !(duration > 0.0) {
        anyhow::bail!("--duration must be positive");
    }
    if !path.exists() {
        return Err(SunderError::FileNotFound { path }.into());
    }
    let log = std::fs::read_to_string(&path)?;

    let mut parser = ProgressParser::new(duration, Arc::new(SystemClock));
    let mut blocks = TelemetryBlocks::new();
    let mut count = 0usize;

    let lines = log.lines().map(Some).chain(std::iter::once(None));
    for line in lines {
        let block = match line {
            Some(line) => blocks.push_line(line),
            None => blocks.flush(),
        };
        let Some(block) = block else {
            continue;
        };
        count += 1;
        let snapshot = parser.parse_block(&block);
        if json {
            println!("{}", serde_json::to_string(snapshot)?);
        } else {
            print_snapshot(count, snapshot);
        }
    }

    let last = parser.snapshot();
    tracing::debug!(blocks = count, state = ?last.state, "Replay finished");
    if !json {
        println!();
        println!("{} blocks, final state: {}", count, last.state.describe());
        if let Some(message) = &last.error_msg {
            println!("  Error: {message}");
        }
    }
    Ok(())
}

fn print_snapshot(index: usize, snapshot: &ProgressSnapshot) {
    let eta = snapshot
        .eta
        .map(|eta| eta.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string());
    println!(
        "  [{index:>4}] {:<10} {:>5.1}%  {:>8.2}s  {:>6.1} fps  {:>5.2}x  ETA {eta}",
        format!("{:?}", snapshot.state),
        snapshot.percentage * 100.0,
        snapshot.current_time_ms / 1000.0,
        snapshot.fps,
        snapshot.speed,
    );
}
