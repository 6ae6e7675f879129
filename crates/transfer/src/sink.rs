//! Durable, all-or-nothing chunk sink.
//!
//! Chunks are appended to a uniquely named staging file. The staging file
//! is moved onto the destination path only after the stream completes,
//! using a rename that refuses to replace an existing file. On any failure
//! the staging file is removed and the destination is left untouched.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::flow::{SignalFuture, Subscriber, Subscription};
use crate::progress::{SpeedCalculator, TransferProgress};
use crate::validation::validate_file_path;
use crate::{Chunk, TransferError};

/// Prefix of staging file names.
pub const STAGING_PREFIX: &str = ".filestream-";

/// Suffix of staging file names.
pub const STAGING_SUFFIX: &str = ".part";

/// Lifecycle of a [`ChunkSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    /// Staging file allocated, no chunk received yet.
    Created,
    Writing,
    Committed,
    Failed,
}

impl SinkState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::Failed)
    }
}

/// Summary of a committed transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    pub destination: PathBuf,
    pub bytes: u64,
    pub chunks: u64,
    /// Hex-encoded SHA-256 of the committed content.
    pub sha256: String,
}

// Field order matters: the handle closes before the path is removed on drop.
struct Staging {
    file: tokio::fs::File,
    path: TempPath,
}

/// Writes a chunk stream to a staging file and atomically publishes it.
pub struct ChunkSink {
    destination: PathBuf,
    state: SinkState,
    staging: Option<Staging>,
    staging_path: PathBuf,
    subscription: Option<Subscription>,
    hasher: Sha256,
    bytes: u64,
    chunks: u64,
    outcome: Option<Result<TransferReport, TransferError>>,
    progress_tx: Option<mpsc::Sender<TransferProgress>>,
    speed: SpeedCalculator,
    #[cfg(test)]
    fail_after: Option<u64>,
}

impl ChunkSink {
    /// Creates a sink for `destination`, staging next to it.
    ///
    /// Staging in the destination's directory keeps the final rename on a
    /// single filesystem.
    pub fn create(destination: impl AsRef<Path>) -> Result<Self, TransferError> {
        let destination = destination.as_ref();
        let scratch_dir = match destination.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Self::create_in(destination, scratch_dir)
    }

    /// Creates a sink for `destination`, staging in `scratch_dir`.
    ///
    /// Fails with [`TransferError::DestinationExists`] if anything (including
    /// a dangling symlink) already exists at `destination`.
    pub fn create_in(
        destination: impl AsRef<Path>,
        scratch_dir: impl AsRef<Path>,
    ) -> Result<Self, TransferError> {
        let destination = destination.as_ref();
        let scratch_dir = scratch_dir.as_ref();
        validate_file_path(destination)?;

        if std::fs::symlink_metadata(destination).is_ok() {
            return Err(TransferError::DestinationExists(destination.to_path_buf()));
        }

        let staged = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .suffix(STAGING_SUFFIX)
            .tempfile_in(scratch_dir)
            .map_err(|source| TransferError::StagingAllocation {
                dir: scratch_dir.to_path_buf(),
                source,
            })?;
        let (file, path) = staged.into_parts();
        let staging_path = path.to_path_buf();

        debug!(
            destination = %destination.display(),
            staging = %staging_path.display(),
            "staging file allocated"
        );

        Ok(Self {
            destination: destination.to_path_buf(),
            state: SinkState::Created,
            staging: Some(Staging {
                file: tokio::fs::File::from_std(file),
                path,
            }),
            staging_path,
            subscription: None,
            hasher: Sha256::new(),
            bytes: 0,
            chunks: 0,
            outcome: None,
            progress_tx: None,
            speed: SpeedCalculator::default(),
            #[cfg(test)]
            fail_after: None,
        })
    }

    /// Publishes a [`TransferProgress`] snapshot after every written chunk.
    ///
    /// Snapshots are dropped when the channel is full.
    pub fn with_progress(mut self, progress_tx: mpsc::Sender<TransferProgress>) -> Self {
        self.progress_tx = Some(progress_tx);
        self
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Path of the staging file. It only exists while the sink is active,
    /// or after a failed commit.
    pub fn staging_path(&self) -> &Path {
        &self.staging_path
    }

    pub fn state(&self) -> SinkState {
        self.state
    }

    /// Bytes written to the staging file so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes
    }

    /// Closes the staging file and moves it onto the destination.
    ///
    /// If the move fails, the staging file is left in place and the sink
    /// fails with [`TransferError::Commit`].
    pub async fn commit(&mut self) -> Result<TransferReport, TransferError> {
        self.ensure_active("commit")?;
        let Some(Staging { path, mut file }) = self.staging.take() else {
            return Err(TransferError::InvalidState("staging file already released".into()));
        };

        if let Err(source) = sync_and_close(&mut file).await {
            drop(file);
            self.state = SinkState::Failed;
            remove_staging(path);
            return Err(TransferError::Write {
                staging: self.staging_path.clone(),
                source,
            });
        }
        drop(file);

        if let Err(err) = path.persist_noclobber(&self.destination) {
            self.state = SinkState::Failed;
            // Left in place for diagnosis.
            if let Err(keep) = err.path.keep() {
                warn!(
                    staging = %self.staging_path.display(),
                    error = %keep.error,
                    "failed to keep staging file"
                );
            }
            warn!(
                staging = %self.staging_path.display(),
                destination = %self.destination.display(),
                error = %err.error,
                "commit failed"
            );
            return Err(TransferError::Commit {
                staging: self.staging_path.clone(),
                destination: self.destination.clone(),
                source: err.error,
            });
        }

        // The rename is done; a failed directory sync is not fatal.
        if let Err(e) = sync_parent_dir(&self.destination).await {
            warn!(
                destination = %self.destination.display(),
                error = %e,
                "failed to sync destination directory"
            );
        }

        self.state = SinkState::Committed;
        let report = TransferReport {
            destination: self.destination.clone(),
            bytes: self.bytes,
            chunks: self.chunks,
            sha256: hex::encode(self.hasher.finalize_reset()),
        };
        info!(
            destination = %self.destination.display(),
            bytes = report.bytes,
            chunks = report.chunks,
            "transfer committed"
        );
        self.outcome = Some(Ok(report.clone()));
        Ok(report)
    }

    /// Rolls the transfer back: cancels the subscription and removes the
    /// staging file. The sink ends in [`SinkState::Failed`] with
    /// [`TransferError::Cancelled`] as its outcome.
    pub fn abort(&mut self) -> Result<(), TransferError> {
        self.ensure_active("abort")?;
        self.fail(TransferError::Cancelled);
        Ok(())
    }

    /// Consumes the sink and returns the transfer outcome.
    pub fn finish(mut self) -> Result<TransferReport, TransferError> {
        match self.outcome.take() {
            Some(outcome) => outcome,
            None if self.state.is_terminal() => Err(TransferError::InvalidState(
                "outcome already returned by commit".into(),
            )),
            None => Err(TransferError::InvalidState(
                "transfer has not terminated".into(),
            )),
        }
    }

    fn ensure_active(&self, op: &str) -> Result<(), TransferError> {
        if self.state.is_terminal() {
            return Err(TransferError::InvalidState(format!(
                "cannot {op}: sink already {:?}",
                self.state
            )));
        }
        Ok(())
    }

    /// Terminates the sink with `error`, discarding the staging file.
    fn fail(&mut self, error: TransferError) {
        if let Some(subscription) = &self.subscription {
            subscription.cancel();
        }
        if let Some(staging) = self.staging.take() {
            drop(staging.file);
            remove_staging(staging.path);
        }
        self.state = SinkState::Failed;

        if error.is_cancelled() {
            debug!(destination = %self.destination.display(), "transfer cancelled");
        } else {
            warn!(destination = %self.destination.display(), error = %error, "transfer failed");
        }
        self.outcome = Some(Err(error));
    }

    async fn write_chunk(&mut self, chunk: Chunk) {
        if self.state.is_terminal() {
            warn!(
                destination = %self.destination.display(),
                state = ?self.state,
                "ignoring chunk delivered after termination"
            );
            return;
        }
        let Some(staging) = self.staging.as_mut() else {
            return;
        };
        self.state = SinkState::Writing;

        #[cfg(test)]
        let injected = self.fail_after == Some(self.chunks);
        #[cfg(not(test))]
        let injected = false;

        let result = if injected {
            Err(std::io::Error::other("injected write failure"))
        } else {
            staging.file.write_all(chunk.as_bytes()).await
        };

        if let Err(source) = result {
            let staging = self.staging_path.clone();
            self.fail(TransferError::Write { staging, source });
            return;
        }

        let len = chunk.len() as u64;
        self.hasher.update(chunk.as_bytes());
        self.bytes += len;
        self.chunks += 1;
        self.speed.add_sample(len);
        self.report_progress();

        if let Some(subscription) = &self.subscription {
            if let Err(e) = subscription.request(1) {
                debug!(error = %e, "credit request refused");
            }
        }
    }

    fn report_progress(&self) {
        if let Some(tx) = &self.progress_tx {
            let _ = tx.try_send(TransferProgress {
                bytes: self.bytes,
                chunks: self.chunks,
                bytes_per_second: self.speed.bytes_per_second(),
            });
        }
    }
}

impl Subscriber for ChunkSink {
    fn on_subscribe(&mut self, subscription: Subscription) {
        if self.subscription.is_some() || self.state != SinkState::Created {
            warn!(
                destination = %self.destination.display(),
                "sink is single-use, cancelling extra subscription"
            );
            subscription.cancel();
            return;
        }
        // One chunk in flight at a time.
        if let Err(e) = subscription.request(1) {
            debug!(error = %e, "initial credit request refused");
        }
        self.subscription = Some(subscription);
    }

    fn on_next(&mut self, chunk: Chunk) -> SignalFuture<'_> {
        Box::pin(self.write_chunk(chunk))
    }

    fn on_error(&mut self, error: TransferError) -> SignalFuture<'_> {
        Box::pin(async move {
            if self.state.is_terminal() {
                return;
            }
            let error = match error {
                TransferError::Cancelled => TransferError::Cancelled,
                cause => TransferError::Upstream(Box::new(cause)),
            };
            self.fail(error);
        })
    }

    fn on_complete(&mut self) -> SignalFuture<'_> {
        Box::pin(async move {
            if self.state.is_terminal() {
                return;
            }
            if let Err(e) = self.commit().await {
                if let Some(subscription) = &self.subscription {
                    subscription.cancel();
                }
                self.outcome = Some(Err(e));
            }
        })
    }
}

impl std::fmt::Debug for ChunkSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkSink")
            .field("destination", &self.destination)
            .field("staging", &self.staging_path)
            .field("state", &self.state)
            .field("bytes", &self.bytes)
            .finish()
    }
}

async fn sync_and_close(file: &mut tokio::fs::File) -> std::io::Result<()> {
    file.flush().await?;
    file.sync_all().await
}

/// Flushes the directory entry created by the commit rename.
#[cfg(unix)]
async fn sync_parent_dir(path: &Path) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    tokio::fs::File::open(dir).await?.sync_all().await
}

#[cfg(not(unix))]
async fn sync_parent_dir(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Best-effort removal of a staging file.
fn remove_staging(path: TempPath) {
    let staging = path.to_path_buf();
    if let Err(e) = path.close() {
        warn!(staging = %staging.display(), error = %e, "failed to remove staging file");
    }
}
