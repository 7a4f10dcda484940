//! Attempt orchestration.
//!
//! [`RenderController`] owns one render job from the first attempt to the
//! terminal state. Each attempt is started through the [`EncoderService`],
//! its telemetry is folded by the [`ProgressParser`], and once the encoder
//! reports the end the output is measured. With a size limit the
//! [`BitrateSearch`] decides whether another attempt is needed.
//!
//! ```text
//! render ──▶ telemetry ──▶ progress=end ──▶ stat output ──▶ adjust
//!   ▲                                                         │
//!   └──────────── remove stale output ◀── retry ◀─────────────┤
//!                                                             ▼
//!                                                          finish
//! ```
//!
//! Observers get every snapshot through a broadcast channel and the latest
//! [`RenderStatus`] through a watch channel; neither can stall the loop.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use sunder_common::clock::{Clock, SystemClock};
use sunder_common::config::{RenderDefaults, RetryPolicy};
use sunder_common::error::{SunderError, SunderResult};
use tokio::sync::{broadcast, watch};

use crate::adjust::{Adjustment, AttemptRecord, BestAttempt, BitrateSearch, DEFAULT_STEP_GAIN};
use crate::facade::{AttemptId, EncoderService, FileStore, ProgressStream};
use crate::progress::{ProgressParser, ProgressSnapshot, RenderState};
use crate::retry::retry_with_policy;
use crate::settings::{BitrateTriple, CompiledSettings, RenderMeta, RenderSettings, SizeLimit};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Everything needed to start a render job.
#[derive(Debug, Clone)]
pub struct RenderJob {
    pub settings: RenderSettings,
    pub size_limit: Option<SizeLimit>,
    pub meta: RenderMeta,
}

/// Tunables for the controller.
#[derive(Clone)]
pub struct ControllerOptions {
    /// Gain used by the bitrate search.
    pub step_gain: f64,
    /// How stale output is removed between attempts.
    pub output_removal: RetryPolicy,
    /// Time source for ETA estimates.
    pub clock: Arc<dyn Clock>,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            step_gain: DEFAULT_STEP_GAIN,
            output_removal: RetryPolicy::default(),
            clock: Arc::new(SystemClock),
        }
    }
}

impl ControllerOptions {
    pub fn from_defaults(defaults: &RenderDefaults) -> Self {
        Self {
            step_gain: defaults.step_gain,
            output_removal: defaults.output_removal,
            ..Self::default()
        }
    }
}

/// Read model for observers.
#[derive(Debug, Clone, Serialize)]
pub struct RenderStatus {
    pub progress: ProgressSnapshot,
    pub current_attempt: u32,
    pub max_attempts: u32,
    pub last_attempts: Vec<AttemptRecord>,
    pub output_path: PathBuf,
    pub best_attempt: Option<BestAttempt>,
}

/// Events broadcast while a job runs.
#[derive(Debug, Clone)]
pub enum RenderEvent {
    AttemptStarted {
        attempt: u32,
        max_attempts: u32,
        bitrate: BitrateTriple,
    },
    Progress(ProgressSnapshot),
    AttemptCompleted(AttemptRecord),
    /// Sent exactly once, when the job reaches its terminal state.
    Finished {
        state: RenderState,
        error_msg: Option<String>,
    },
}

/// How a job that did not fail ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderOutcome {
    Completed,
    Cancelled,
}

/// Summary of a finished job.
#[derive(Debug, Clone, Serialize)]
pub struct RenderReport {
    pub outcome: RenderOutcome,
    pub output_path: PathBuf,
    pub attempts: Vec<AttemptRecord>,
    /// Settings of the last attempt that ran.
    pub settings: RenderSettings,
    pub best_attempt: Option<BestAttempt>,
}

/// Caller-side control over a running job.
#[derive(Clone)]
pub struct RenderHandle {
    cancel: Arc<watch::Sender<bool>>,
    accept: Arc<AtomicBool>,
    status: watch::Receiver<RenderStatus>,
}

impl RenderHandle {
    /// Abort the in-flight attempt. No further attempts are started.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    /// Keep the next completed attempt even if it misses the size target.
    pub fn accept_current(&self) {
        self.accept.store(true, Ordering::SeqCst);
    }

    /// Latest status.
    pub fn status(&self) -> RenderStatus {
        self.status.borrow().clone()
    }

    /// A receiver that is notified on every status change.
    pub fn watch_status(&self) -> watch::Receiver<RenderStatus> {
        self.status.clone()
    }
}

enum AttemptEnd {
    Done,
    Cancelled,
}

enum NextStep {
    Retry,
    Finalize,
    Cancelled,
}

/// Resolves once cancellation has been requested.
async fn cancel_requested(mut cancel_rx: watch::Receiver<bool>) {
    let requested = cancel_rx.wait_for(|cancelled| *cancelled).await.is_ok();
    if !requested {
        // The sender lives as long as the controller.
        std::future::pending::<()>().await;
    }
}

/// Drives one render job.
pub struct RenderController {
    encoder: Arc<dyn EncoderService>,
    files: Arc<dyn FileStore>,
    options: ControllerOptions,
    compiled: CompiledSettings,
    search: Option<BitrateSearch>,
    parser: ProgressParser,
    max_attempts: u32,
    current_attempt: u32,
    attempt_id: Option<AttemptId>,
    attempts: Vec<AttemptRecord>,
    cancel: Arc<watch::Sender<bool>>,
    cancel_rx: watch::Receiver<bool>,
    accept: Arc<AtomicBool>,
    events: broadcast::Sender<RenderEvent>,
    status: watch::Sender<RenderStatus>,
    finalized: bool,
}

impl RenderController {
    /// Validate the job and prepare the first attempt. With a size limit the
    /// bitrate fields are seeded from the target size and duration.
    pub fn new(
        job: RenderJob,
        encoder: Arc<dyn EncoderService>,
        files: Arc<dyn FileStore>,
        options: ControllerOptions,
    ) -> SunderResult<Self> {
        if !(job.meta.total_duration > 0.0) {
            return Err(SunderError::invalid_settings(
                "total_duration must be positive",
            ));
        }

        let settings = match &job.size_limit {
            Some(limit) => {
                limit.validate()?;
                let descriptor = job.settings.video_codec.descriptor();
                if !descriptor.is_bitrate_driven(job.settings.rate_control) {
                    return Err(SunderError::invalid_settings(format!(
                        "a size limit needs a rate control that sets the bitrate; {} {} does not",
                        job.settings.video_codec, job.settings.rate_control
                    )));
                }
                job.settings.seeded_for(limit)?
            }
            None => job.settings,
        };
        let compiled = settings.compile()?;

        let max_attempts = job.size_limit.map_or(1, |limit| limit.max_attempts);
        let search = job
            .size_limit
            .map(|limit| BitrateSearch::with_step_gain(limit, options.step_gain));
        let parser = ProgressParser::new(job.meta.total_duration, Arc::clone(&options.clock));

        let (cancel, cancel_rx) = watch::channel(false);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (status, _) = watch::channel(RenderStatus {
            progress: parser.snapshot().clone(),
            current_attempt: 0,
            max_attempts,
            last_attempts: Vec::new(),
            output_path: compiled.output_path().to_path_buf(),
            best_attempt: None,
        });

        tracing::debug!(
            codec = %compiled.settings().video_codec,
            rate_control = %compiled.settings().rate_control,
            target_kbps = compiled.settings().target_bitrate,
            max_attempts,
            "Render job prepared"
        );

        Ok(Self {
            encoder,
            files,
            options,
            compiled,
            search,
            parser,
            max_attempts,
            current_attempt: 0,
            attempt_id: None,
            attempts: Vec::new(),
            cancel: Arc::new(cancel),
            cancel_rx,
            accept: Arc::new(AtomicBool::new(false)),
            events,
            status,
            finalized: false,
        })
    }

    pub fn handle(&self) -> RenderHandle {
        RenderHandle {
            cancel: Arc::clone(&self.cancel),
            accept: Arc::clone(&self.accept),
            status: self.status.subscribe(),
        }
    }

    /// Subscribe to job events. The channel closes when the job ends.
    pub fn subscribe(&self) -> broadcast::Receiver<RenderEvent> {
        self.events.subscribe()
    }

    pub fn compiled(&self) -> &CompiledSettings {
        &self.compiled
    }

    /// Run the job to its terminal state.
    pub async fn run(mut self) -> SunderResult<RenderReport> {
        let result = match self.encoder.subscribe_progress().await {
            Ok(mut progress) => self.drive(&mut progress).await,
            Err(e) => Err(e),
        };
        // The progress subscription is gone at this point.
        self.finish(&result);
        result.map(|outcome| self.report(outcome))
    }

    async fn drive(&mut self, progress: &mut ProgressStream) -> SunderResult<RenderOutcome> {
        loop {
            if *self.cancel_rx.borrow_and_update() {
                tracing::info!("Render cancelled before the next attempt");
                return Ok(RenderOutcome::Cancelled);
            }

            self.render().await?;

            match self.await_attempt(progress).await? {
                AttemptEnd::Done => {}
                AttemptEnd::Cancelled => return Ok(RenderOutcome::Cancelled),
            }

            match self.post_render().await? {
                NextStep::Retry => continue,
                NextStep::Finalize => return Ok(RenderOutcome::Completed),
                NextStep::Cancelled => return Ok(RenderOutcome::Cancelled),
            }
        }
    }

    /// Start the next attempt with the current compiled settings.
    async fn render(&mut self) -> SunderResult<()> {
        self.parser.reset();
        self.current_attempt += 1;
        self.attempt_id = None;
        self.publish_progress();

        let bitrate = self.compiled.settings().bitrates();
        let _ = self.events.send(RenderEvent::AttemptStarted {
            attempt: self.current_attempt,
            max_attempts: self.max_attempts,
            bitrate,
        });
        tracing::info!(
            attempt = self.current_attempt,
            max_attempts = self.max_attempts,
            target_kbps = bitrate.target,
            max_kbps = bitrate.max,
            "Starting render attempt"
        );

        let id = self
            .encoder
            .start_render(&self.compiled)
            .await
            .map_err(|e| match e {
                SunderError::Launch { .. } => e,
                other => SunderError::launch(other.to_string()),
            })?;
        tracing::debug!(attempt_id = %id, "Encoder accepted attempt");
        self.attempt_id = Some(id);
        Ok(())
    }

    async fn await_attempt(&mut self, progress: &mut ProgressStream) -> SunderResult<AttemptEnd> {
        loop {
            tokio::select! {
                biased;

                changed = self.cancel_rx.changed() => {
                    if changed.is_ok() && *self.cancel_rx.borrow_and_update() {
                        self.cancel_render().await;
                        return Ok(AttemptEnd::Cancelled);
                    }
                }

                block = progress.recv() => {
                    let Some(block) = block else {
                        return Err(SunderError::encoder(
                            "progress stream closed before the attempt finished",
                        ));
                    };

                    let snapshot = self.parser.parse_block(&block).clone();
                    self.publish_progress();

                    if snapshot.state == RenderState::Errored {
                        let message = snapshot.error_msg.unwrap_or_default();
                        tracing::error!(attempt = self.current_attempt, error = %message, "Encoder reported an error");
                        return Err(SunderError::encoder(message));
                    }
                    if snapshot.done_current {
                        return Ok(AttemptEnd::Done);
                    }
                }
            }
        }
    }

    /// Ask the encoder to abort the in-flight attempt.
    async fn cancel_render(&mut self) {
        let Some(id) = self.attempt_id else {
            return;
        };
        match self.encoder.cancel_render(id).await {
            Ok(true) => tracing::info!(attempt_id = %id, "Render cancelled"),
            Ok(false) => tracing::info!(attempt_id = %id, "Render already finished when cancelled"),
            Err(e) => tracing::warn!(attempt_id = %id, error = %e, "Failed to cancel render"),
        }
    }

    /// Measure the finished attempt and decide what happens next.
    async fn post_render(&mut self) -> SunderResult<NextStep> {
        let output = self.compiled.output_path().to_path_buf();
        let size = self.files.stat(&output).await?.size;
        let used = self.compiled.settings().bitrates();

        let record = AttemptRecord::new(self.current_attempt, used.target, size);
        self.attempts.push(record);
        let _ = self.events.send(RenderEvent::AttemptCompleted(record));
        tracing::info!(
            attempt = self.current_attempt,
            size_mb = record.size_mb,
            target_kbps = used.target,
            "Render attempt finished"
        );

        if self.search.is_none() {
            return Ok(NextStep::Finalize);
        }
        if self.accept.load(Ordering::SeqCst) {
            tracing::info!(attempt = self.current_attempt, "Accepting current result on request");
            return Ok(NextStep::Finalize);
        }

        self.parser.set_state(RenderState::Validating);
        self.publish_progress();

        let final_attempt = self.current_attempt + 1 == self.max_attempts;
        let adjustment = match self.search.as_mut() {
            Some(search) => {
                search.record_attempt(used, size);
                search.adjust(used, size, final_attempt)
            }
            None => Adjustment::Accept,
        };
        self.publish_status();

        match adjustment {
            Adjustment::Accept => {
                tracing::info!(size_mb = record.size_mb, "Output size accepted");
                Ok(NextStep::Finalize)
            }
            Adjustment::Retry(_) if self.current_attempt >= self.max_attempts => {
                tracing::warn!(
                    attempts = self.current_attempt,
                    size_mb = record.size_mb,
                    "Attempt budget exhausted, keeping last output"
                );
                Ok(NextStep::Finalize)
            }
            Adjustment::Retry(next) => {
                let cancel_rx = self.cancel_rx.clone();
                tokio::select! {
                    biased;

                    _ = cancel_requested(cancel_rx) => {
                        tracing::info!("Render cancelled while removing stale output");
                        return Ok(NextStep::Cancelled);
                    }
                    removed = self.remove_stale_output(&output) => removed?,
                }
                self.compiled = self.compiled.with_bitrates(next)?;
                Ok(NextStep::Retry)
            }
        }
    }

    /// The encoder may hold its output open for a moment after reporting
    /// completion, so removal is retried.
    async fn remove_stale_output(&self, path: &Path) -> SunderResult<()> {
        let files = &self.files;
        retry_with_policy(&self.options.output_removal, |_| async move {
            match files.remove(path).await {
                Err(SunderError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(SunderError::FileNotFound { .. }) => Ok(()),
                other => other,
            }
        })
        .await
        .map_err(|e| {
            tracing::error!(path = %path.display(), tries = e.tries, error = %e.last_error, "Could not remove stale output");
            SunderError::FileContention {
                path: path.to_path_buf(),
                attempts: e.tries,
            }
        })
    }

    /// Publish the terminal state. Runs once per job.
    fn finish(&mut self, result: &SunderResult<RenderOutcome>) {
        if self.finalized {
            return;
        }
        self.finalized = true;

        match result {
            Ok(RenderOutcome::Completed) => {
                self.parser.set_state(RenderState::Finished);
            }
            Ok(RenderOutcome::Cancelled) => {
                self.parser.fail("render cancelled");
            }
            Err(SunderError::Launch { message }) | Err(SunderError::Encoder { message }) => {
                self.parser.fail(message.clone());
            }
            Err(e) => {
                self.parser.fail(e.to_string());
            }
        }

        self.publish_progress();
        let snapshot = self.parser.snapshot();
        let _ = self.events.send(RenderEvent::Finished {
            state: snapshot.state,
            error_msg: snapshot.error_msg.clone(),
        });
        tracing::info!(
            state = ?snapshot.state,
            attempts = self.attempts.len(),
            "Render job ended"
        );
    }

    fn report(&self, outcome: RenderOutcome) -> RenderReport {
        RenderReport {
            outcome,
            output_path: self.compiled.output_path().to_path_buf(),
            attempts: self.attempts.clone(),
            settings: self.compiled.settings().clone(),
            best_attempt: self.search.as_ref().and_then(|s| s.best().copied()),
        }
    }

    fn publish_progress(&self) {
        let _ = self
            .events
            .send(RenderEvent::Progress(self.parser.snapshot().clone()));
        self.publish_status();
    }

    fn publish_status(&self) {
        self.status.send_replace(RenderStatus {
            progress: self.parser.snapshot().clone(),
            current_attempt: self.current_attempt,
            max_attempts: self.max_attempts,
            last_attempts: self.attempts.clone(),
            output_path: self.compiled.output_path().to_path_buf(),
            best_attempt: self.search.as_ref().and_then(|s| s.best().copied()),
        });
    }
}
