//! Drive the render controller against a simulated encoder.
//!
//! The simulated encoder produces `bitrate * duration * efficiency` bytes,
//! which is enough to watch the bitrate search converge without spawning
//! a real encoder.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use sunder_common::config::AppConfig;
use sunder_common::error::{SunderError, SunderResult};
use sunder_render_control::{
    AttemptId, CompiledSettings, ControllerOptions, EncoderService, FileStat, FileStore,
    ProgressStream, RenderController, RenderEvent, RenderJob, RenderMeta,
};
use tokio::sync::{broadcast, mpsc, Mutex};

use super::{size_limit, SettingsArgs};

const BLOCKS_PER_ATTEMPT: u32 = 4;

pub async fn run(
    args: SettingsArgs,
    max_size_mb: f64,
    attempts: Option<u32>,
    threshold: Option<f64>,
    efficiency: f64,
    config: &AppConfig,
    json: bool,
) -> anyhow::Result<()> {
    if !(efficiency > 0.0) {
        anyhow::bail!("--efficiency must be positive");
    }

    let settings = args.into_settings()?;
    let duration = settings.duration();
    let limit = size_limit(max_size_mb, attempts, threshold, config);

    let files = Arc::new(SimulatedFiles::default());
    let encoder = Arc::new(SimulatedEncoder::new(duration, efficiency, files.clone()));

    let job = RenderJob {
        settings,
        size_limit: Some(limit),
        meta: RenderMeta {
            total_duration: duration,
        },
    };
    let controller = RenderController::new(
        job,
        encoder,
        files,
        ControllerOptions::from_defaults(&config.render),
    )?;

    tracing::debug!(
        args = ?controller.compiled().encoder_args(),
        "First attempt command line"
    );

    if !json {
        println!(
            "Simulating render to {:.2} MB ({} attempts, efficiency {efficiency})",
            limit.max_size_mb(),
            limit.max_attempts
        );
    }

    let mut events = controller.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            };
            if json {
                continue;
            }
            match event {
                RenderEvent::AttemptStarted {
                    attempt,
                    max_attempts,
                    bitrate,
                } => println!(
                    "  Attempt {attempt}/{max_attempts}: {:.1} kbps (min {:.2}, max {:.1})",
                    bitrate.target, bitrate.min, bitrate.max
                ),
                RenderEvent::AttemptCompleted(record) => {
                    println!("    -> {:.2} MB", record.size_mb)
                }
                RenderEvent::Finished { state, error_msg } => {
                    println!("  {}", state.describe());
                    if let Some(message) = error_msg {
                        println!("  Error: {message}");
                    }
                }
                RenderEvent::Progress(_) => {}
            }
        }
    });

    let result = controller.run().await;
    printer.await?;
    let report = result?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if let Some(best) = report.best_attempt {
        println!(
            "Best: {:.1} kbps -> {:.2} MB",
            best.bitrate.target,
            best.size_bytes as f64 / 1_000_000.0
        );
    }
    Ok(())
}

/// Encoder stand-in that reports progress immediately.
struct SimulatedEncoder {
    duration: f64,
    efficiency: f64,
    files: Arc<SimulatedFiles>,
    progress_tx: Mutex<Option<mpsc::Sender<String>>>,
    next_id: AtomicU64,
}

impl SimulatedEncoder {
    fn new(duration: f64, efficiency: f64, files: Arc<SimulatedFiles>) -> Self {
        Self {
            duration,
            efficiency,
            files,
            progress_tx: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    fn output_size(&self, target_kbps: f64) -> u64 {
        (target_kbps * 1000.0 / 8.0 * self.duration * self.efficiency)
            .round()
            .max(0.0) as u64
    }
}

#[async_trait::async_trait]
impl EncoderService for SimulatedEncoder {
    async fn subscribe_progress(&self) -> SunderResult<ProgressStream> {
        let (tx, rx) = mpsc::channel(BLOCKS_PER_ATTEMPT as usize * 2);
        *self.progress_tx.lock().await = Some(tx);
        Ok(rx)
    }

    async fn start_render(&self, settings: &CompiledSettings) -> SunderResult<AttemptId> {
        let tx = self
            .progress_tx
            .lock()
            .await
            .clone()
            .ok_or_else(|| SunderError::launch("progress channel not open"))?;
        let id = AttemptId(self.next_id.fetch_add(1, Ordering::SeqCst));

        let size = self.output_size(settings.settings().target_bitrate);
        let output = settings.output_path().to_path_buf();
        let files = self.files.clone();
        let duration_us = self.duration * 1_000_000.0;

        tokio::spawn(async move {
            for block in 1..=BLOCKS_PER_ATTEMPT {
                let last = block == BLOCKS_PER_ATTEMPT;
                if last {
                    files.put(output.clone(), size).await;
                }
                let out_time = duration_us * f64::from(block) / f64::from(BLOCKS_PER_ATTEMPT);
                let text = format!(
                    "fps=240.0\nout_time_us={out_time:.0}\nspeed=8.0x\nprogress={}\n",
                    if last { "end" } else { "continue" }
                );
                if tx.send(text).await.is_err() {
                    return;
                }
            }
        });

        tracing::debug!(attempt_id = %id, size, "Simulated attempt started");
        Ok(id)
    }

    async fn cancel_render(&self, _attempt: AttemptId) -> SunderResult<bool> {
        Ok(false)
    }
}

#[derive(Default)]
struct SimulatedFiles {
    sizes: Mutex<HashMap<PathBuf, u64>>,
}

impl SimulatedFiles {
    async fn put(&self, path: PathBuf, size: u64) {
        self.sizes.lock().await.insert(path, size);
    }
}

#[async_trait::async_trait]
impl FileStore for SimulatedFiles {
    async fn stat(&self, path: &Path) -> SunderResult<FileStat> {
        self.sizes
            .lock()
            .await
            .get(path)
            .map(|&size| FileStat { size })
            .ok_or_else(|| SunderError::FileNotFound {
                path: path.to_path_buf(),
            })
    }

    async fn remove(&self, path: &Path) -> SunderResult<()> {
        self.sizes.lock().await.remove(path);
        Ok(())
    }
}
