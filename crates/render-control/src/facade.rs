//! Contracts with the services the controller drives.
//!
//! The encoder process and the file system are external collaborators.
//! The controller only talks to them through these traits, so a host can
//! plug in a real encoder process while tests use scripted doubles.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sunder_common::error::{SunderError, SunderResult};
use tokio::sync::mpsc;

use crate::settings::CompiledSettings;

/// Identifier the encoder assigns to a started attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttemptId(pub u64);

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Raw progress text blocks pushed by the encoder, in order.
pub type ProgressStream = mpsc::Receiver<String>;

/// The external encoding service.
#[async_trait::async_trait]
pub trait EncoderService: Send + Sync {
    /// Open the progress channel. Called once per job, before the first
    /// attempt starts.
    async fn subscribe_progress(&self) -> SunderResult<ProgressStream>;

    /// Start an attempt with the given settings. Fails synchronously for
    /// settings the encoder rejects; later failures arrive as error blocks
    /// on the progress channel.
    async fn start_render(&self, settings: &CompiledSettings) -> SunderResult<AttemptId>;

    /// Abort an attempt. Returns `false` if it had already finished.
    async fn cancel_render(&self, attempt: AttemptId) -> SunderResult<bool>;
}

/// Metadata of a produced file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
}

/// File inspection and removal.
#[async_trait::async_trait]
pub trait FileStore: Send + Sync {
    async fn stat(&self, path: &Path) -> SunderResult<FileStat>;

    async fn remove(&self, path: &Path) -> SunderResult<()>;
}

/// [`FileStore`] over the local file system.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileStore;

#[async_trait::async_trait]
impl FileStore for LocalFileStore {
    async fn stat(&self, path: &Path) -> SunderResult<FileStat> {
        match tokio::fs::metadata(path).await {
            Ok(meta) => Ok(FileStat { size: meta.len() }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(SunderError::FileNotFound {
                path: path.to_path_buf(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, path: &Path) -> SunderResult<()> {
        tokio::fs::remove_file(path).await?;
        Ok(())
    }
}
