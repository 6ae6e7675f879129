//! Error types for the transfer pipeline.

use std::path::PathBuf;

/// Errors produced by a chunk stream, its source or its sink.
///
/// Every variant is terminal for the stream that raised it.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("chunk size {0} exceeds maximum of {max}", max = crate::MAX_CHUNK_SIZE)]
    ChunkSizeTooLarge(usize),

    #[error("source already has a subscriber")]
    MultipleSubscription,

    #[error("destination already exists: {}", .0.display())]
    DestinationExists(PathBuf),

    #[error("failed to allocate staging file in {}: {source}", .dir.display())]
    StagingAllocation {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write staging file {}: {source}", .staging.display())]
    Write {
        staging: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("upstream failed: {0}")]
    Upstream(#[source] Box<TransferError>),

    #[error(
        "failed to move {} to {}: {source}",
        .staging.display(),
        .destination.display()
    )]
    Commit {
        staging: PathBuf,
        destination: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("cancelled")]
    Cancelled,
}

impl TransferError {
    /// Returns `true` for the non-success outcome caused by cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
