//! Scripted encoder and in-memory file store for controller tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{TimeZone, Utc};
use sunder_common::clock::FixedClock;
use sunder_common::config::{Backoff, RetryPolicy};
use sunder_common::error::{SunderError, SunderResult};
use sunder_render_control::{
    AttemptId, AudioCodec, CompiledSettings, ControllerOptions, EncoderService, FileStat,
    FileStore, ProgressStream, RateControl, RenderJob, RenderMeta, RenderSettings, SizeLimit,
    VideoCodec,
};
use tokio::sync::mpsc;

pub const MB: u64 = 1_000_000;

/// What the encoder does for one attempt.
#[derive(Debug, Clone)]
pub enum AttemptScript {
    /// Report progress, write a file of this size, report the end.
    Output { size: u64 },
    /// Report some progress, then an error block.
    Fail(String),
    /// Report some progress and never finish.
    Hang,
    /// Refuse to start.
    LaunchFailure(String),
    /// Drop the progress channel mid-attempt.
    CloseStream,
}

pub struct ScriptedEncoder {
    progress_tx: Mutex<Option<mpsc::Sender<String>>>,
    scripts: Mutex<VecDeque<AttemptScript>>,
    started: Mutex<Vec<CompiledSettings>>,
    cancelled: Mutex<Vec<AttemptId>>,
    files: Arc<MemoryFileStore>,
    next_id: AtomicU64,
}

impl ScriptedEncoder {
    pub fn new(files: Arc<MemoryFileStore>, scripts: Vec<AttemptScript>) -> Arc<Self> {
        Arc::new(Self {
            progress_tx: Mutex::new(None),
            scripts: Mutex::new(scripts.into()),
            started: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
            files,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn outputs(files: Arc<MemoryFileStore>, sizes: &[u64]) -> Arc<Self> {
        Self::new(
            files,
            sizes
                .iter()
                .map(|&size| AttemptScript::Output { size })
                .collect(),
        )
    }

    pub fn started(&self) -> Vec<CompiledSettings> {
        self.started.lock().unwrap().clone()
    }

    pub fn cancelled(&self) -> Vec<AttemptId> {
        self.cancelled.lock().unwrap().clone()
    }

    fn sender(&self) -> Option<mpsc::Sender<String>> {
        self.progress_tx.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl EncoderService for ScriptedEncoder {
    async fn subscribe_progress(&self) -> SunderResult<ProgressStream> {
        let (tx, rx) = mpsc::channel(64);
        *self.progress_tx.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn start_render(&self, settings: &CompiledSettings) -> SunderResult<AttemptId> {
        self.started.lock().unwrap().push(settings.clone());
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(AttemptScript::Hang);

        if let AttemptScript::LaunchFailure(message) = script {
            return Err(SunderError::launch(message));
        }

        let id = AttemptId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let tx = self.sender().expect("progress channel not subscribed");
        tx.send("frame=1\nfps=N/A\nout_time_us=N/A\nspeed=N/A\nprogress=continue\n".to_string())
            .await
            .unwrap();
        tx.send("frame=120\nfps=60.0\nout_time_us=5000000\nout_time_ms=5000000\nspeed=2.5x\nprogress=continue\n".to_string())
            .await
            .unwrap();

        match script {
            AttemptScript::Output { size } => {
                self.files.put(settings.output_path(), size);
                tx.send("frame=240\nfps=60.0\nout_time_us=10000000\nspeed=2.5x\nprogress=end\n".to_string())
                    .await
                    .unwrap();
            }
            AttemptScript::Fail(message) => {
                tx.send(format!("error:{message}")).await.unwrap();
            }
            AttemptScript::CloseStream => {
                self.progress_tx.lock().unwrap().take();
            }
            AttemptScript::Hang | AttemptScript::LaunchFailure(_) => {}
        }
        Ok(id)
    }

    async fn cancel_render(&self, attempt: AttemptId) -> SunderResult<bool> {
        self.cancelled.lock().unwrap().push(attempt);
        Ok(true)
    }
}

#[derive(Default)]
pub struct MemoryFileStore {
    files: Mutex<HashMap<PathBuf, u64>>,
    locked_removals: AtomicU32,
    remove_calls: AtomicU32,
}

impl MemoryFileStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The next `count` removals fail as if the file were still open.
    pub fn locked_for(count: u32) -> Arc<Self> {
        let store = Self::default();
        store.locked_removals.store(count, Ordering::SeqCst);
        Arc::new(store)
    }

    pub fn put(&self, path: &Path, size: u64) {
        self.files.lock().unwrap().insert(path.to_path_buf(), size);
    }

    pub fn exists(&self, path: &Path) -> bool {
        self.files.lock().unwrap().contains_key(path)
    }

    pub fn remove_calls(&self) -> u32 {
        self.remove_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl FileStore for MemoryFileStore {
    async fn stat(&self, path: &Path) -> SunderResult<FileStat> {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .map(|&size| FileStat { size })
            .ok_or_else(|| SunderError::FileNotFound {
                path: path.to_path_buf(),
            })
    }

    async fn remove(&self, path: &Path) -> SunderResult<()> {
        self.remove_calls.fetch_add(1, Ordering::SeqCst);
        let locked = self.locked_removals.load(Ordering::SeqCst);
        if locked > 0 {
            self.locked_removals.store(locked - 1, Ordering::SeqCst);
            return Err(std::io::Error::other("file is in use by another process").into());
        }
        self.files.lock().unwrap().remove(path);
        Ok(())
    }
}

pub fn settings() -> RenderSettings {
    RenderSettings {
        video_codec: VideoCodec::H264,
        audio_codec: AudioCodec::Aac,
        rate_control: RateControl::Cbr,
        target_bitrate: 6000.0,
        min_bitrate: 0.0,
        max_bitrate: 6000.0,
        crf_value: 23,
        buf_size: 12000.0,
        trim_start: 0.0,
        trim_end: 10.0,
        input_path: PathBuf::from("/videos/clip.mkv"),
        output_path: PathBuf::from("/videos/clip.mp4"),
        audio_tracks: vec![1, 2],
        override_file: true,
    }
}

pub fn limit(max_size: u64, max_attempts: u32) -> SizeLimit {
    SizeLimit {
        max_size,
        max_attempts,
        retry_threshold: 0.1,
    }
}

pub fn job(size_limit: Option<SizeLimit>) -> RenderJob {
    RenderJob {
        settings: settings(),
        size_limit,
        meta: RenderMeta {
            total_duration: 10.0,
        },
    }
}

pub fn options() -> ControllerOptions {
    ControllerOptions {
        output_removal: RetryPolicy {
            max_tries: 3,
            delay_ms: 1,
            backoff: Backoff::Fixed,
        },
        clock: Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap(),
        )),
        ..ControllerOptions::default()
    }
}
