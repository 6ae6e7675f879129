use std::path::{Path, PathBuf};

use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::flow::{self, Emitter, Stream, Subscriber};
use crate::validation::validate_file_path;
use crate::{Chunk, DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE, TransferError};

/// Publishes a file's contents as an ordered sequence of bounded chunks.
///
/// The file is opened lazily by the publishing task, so a missing or
/// unreadable file surfaces as an error signal on the stream rather than
/// at creation. A source serves exactly one subscriber.
#[derive(Debug)]
pub struct ChunkSource {
    path: PathBuf,
    chunk_size: usize,
    subscribed: bool,
}

impl ChunkSource {
    /// Binds a source to `path` without touching the filesystem.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, TransferError> {
        let path = path.as_ref();
        validate_file_path(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            subscribed: false,
        })
    }

    /// Sets the maximum chunk size. If `chunk_size` is 0, [`DEFAULT_CHUNK_SIZE`] is used.
    ///
    /// Sizes above [`MAX_CHUNK_SIZE`] are rejected with
    /// [`TransferError::ChunkSizeTooLarge`].
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Result<Self, TransferError> {
        self.chunk_size = match chunk_size {
            0 => DEFAULT_CHUNK_SIZE,
            n if n > MAX_CHUNK_SIZE => return Err(TransferError::ChunkSizeTooLarge(n)),
            n => n,
        };
        Ok(self)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Subscribes `subscriber` and starts the publishing task.
    ///
    /// Must be called within a Tokio runtime.
    pub fn subscribe<S: Subscriber>(&mut self, subscriber: S) -> Result<Stream<S>, TransferError> {
        self.subscribe_with(subscriber, CancellationToken::new())
    }

    /// Like [`subscribe`](Self::subscribe), cancelling the stream when
    /// `cancel` fires.
    pub fn subscribe_with<S: Subscriber>(
        &mut self,
        subscriber: S,
        cancel: CancellationToken,
    ) -> Result<Stream<S>, TransferError> {
        if self.subscribed {
            warn!(path = %self.path.display(), "rejecting second subscription");
            return Err(TransferError::MultipleSubscription);
        }
        self.subscribed = true;

        let (emitter, subscription, signals) = flow::channel(cancel);
        tokio::spawn(publish(self.path.clone(), self.chunk_size, emitter));
        Ok(Stream::new(subscriber, subscription, signals))
    }
}

/// Reads `path` chunk by chunk, consuming one unit of credit per chunk.
async fn publish(path: PathBuf, chunk_size: usize, emitter: Emitter) {
    let mut file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(source) => {
            debug!(path = %path.display(), error = %source, "failed to open source file");
            emitter.error(TransferError::Read { path, source }).await;
            return;
        }
    };

    let mut offset: u64 = 0;
    let mut chunks: u64 = 0;

    loop {
        // Credit first, then read: nothing is buffered ahead of demand.
        if !emitter.acquire().await {
            debug!(path = %path.display(), chunks, "source stopped before end of file");
            return;
        }

        let mut buf = Vec::with_capacity(chunk_size);
        let n = match (&mut file).take(chunk_size as u64).read_to_end(&mut buf).await {
            Ok(n) => n,
            Err(source) => {
                warn!(path = %path.display(), offset, error = %source, "source read failed");
                emitter.error(TransferError::Read { path, source }).await;
                return;
            }
        };

        // EOF on a chunk boundary; the acquired credit goes unused.
        if n == 0 && chunks > 0 {
            break;
        }

        let last = n < chunk_size;
        if !emitter.next(Chunk::new(offset, buf)).await {
            debug!(path = %path.display(), chunks, "subscriber went away");
            return;
        }
        offset += n as u64;
        chunks += 1;

        if last {
            break;
        }
    }

    drop(file);
    debug!(path = %path.display(), bytes = offset, chunks, "source reached end of file");
    emitter.complete().await;
}
