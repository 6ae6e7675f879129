//! Driver wiring one [`ChunkSource`] to one [`ChunkSink`].

use std::path::{Path, PathBuf};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    ChunkSink, ChunkSource, DEFAULT_CHUNK_SIZE, TransferError, TransferProgress, TransferReport,
};

/// A single file transfer from `source` to `destination`.
///
/// ```no_run
/// # async fn demo() -> Result<(), filestream_transfer::TransferError> {
/// use filestream_transfer::Transfer;
///
/// let report = Transfer::new("input.bin", "output.bin")
///     .chunk_size(256 * 1024)
///     .run()
///     .await?;
/// println!("{} bytes, sha256 {}", report.bytes, report.sha256);
/// # Ok(())
/// # }
/// ```
pub struct Transfer {
    source: PathBuf,
    destination: PathBuf,
    chunk_size: usize,
    scratch_dir: Option<PathBuf>,
    cancel: CancellationToken,
    progress_tx: Option<mpsc::Sender<TransferProgress>>,
}

impl Transfer {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            scratch_dir: None,
            cancel: CancellationToken::new(),
            progress_tx: None,
        }
    }

    /// Maximum bytes per chunk. 0 selects [`DEFAULT_CHUNK_SIZE`]; values above
    /// [`MAX_CHUNK_SIZE`](crate::MAX_CHUNK_SIZE) make [`run`](Self::run) fail.
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Directory for the staging file. Defaults to the destination's directory.
    pub fn scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    /// Cancels the transfer when `cancel` fires. The token itself is never
    /// cancelled by the transfer.
    pub fn cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn progress(mut self, progress_tx: mpsc::Sender<TransferProgress>) -> Self {
        self.progress_tx = Some(progress_tx);
        self
    }

    /// Runs the transfer to completion.
    pub async fn run(self) -> Result<TransferReport, TransferError> {
        let mut source = ChunkSource::create(&self.source)?.with_chunk_size(self.chunk_size)?;
        let mut sink = match &self.scratch_dir {
            Some(dir) => ChunkSink::create_in(&self.destination, dir)?,
            None => ChunkSink::create(&self.destination)?,
        };
        if let Some(tx) = self.progress_tx {
            sink = sink.with_progress(tx);
        }

        debug!(
            source = %self.source.display(),
            destination = %self.destination.display(),
            chunk_size = source.chunk_size(),
            "starting transfer"
        );

        let stream = source.subscribe_with(sink, self.cancel.child_token())?;
        stream.run().await.finish()
    }
}

/// Copies `source` to `destination` with default settings.
pub async fn copy_file(
    source: impl AsRef<Path>,
    destination: impl AsRef<Path>,
) -> Result<TransferReport, TransferError> {
    Transfer::new(source.as_ref(), destination.as_ref())
        .run()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calculate_file_checksum;
    use crate::sink::STAGING_PREFIX;

    fn pattern(len: usize, seed: u8) -> Vec<u8> {
        (0..len)
            .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
            .collect()
    }

    fn leftover_staging(dir: &Path) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().starts_with(STAGING_PREFIX))
            .count()
    }

    #[tokio::test]
    async fn roundtrip_preserves_bytes() {
        const CHUNK: usize = 16;
        for size in [0, 1, CHUNK - 1, CHUNK, CHUNK + 1, 3 * CHUNK + 7] {
            let dir = tempfile::tempdir().unwrap();
            let src = dir.path().join("src.bin");
            let dest = dir.path().join("dst.bin");
            let data = pattern(size, 3);
            std::fs::write(&src, &data).unwrap();

            let report = Transfer::new(&src, &dest)
                .chunk_size(CHUNK)
                .run()
                .await
                .unwrap();

            assert_eq!(std::fs::read(&dest).unwrap(), data, "size {size}");
            assert_eq!(report.bytes, size as u64);
            assert_eq!(report.chunks, size.div_ceil(CHUNK).max(1) as u64);
            assert_eq!(report.sha256, calculate_file_checksum(&dest).unwrap());
            assert_eq!(leftover_staging(dir.path()), 0);
        }
    }

    #[tokio::test]
    async fn copy_file_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.bin");
        let dest = dir.path().join("dst.bin");
        let data = pattern(DEFAULT_CHUNK_SIZE * 2 + 5, 9);
        std::fs::write(&src, &data).unwrap();

        let report = copy_file(&src, &dest).await.unwrap();
        assert_eq!(report.chunks, 3);
        assert_eq!(std::fs::read(&dest).unwrap(), data);
    }

    #[tokio::test]
    async fn separate_scratch_dir() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = dir.path().join("scratch");
        std::fs::create_dir(&scratch).unwrap();
        let src = dir.path().join("src.bin");
        let dest = dir.path().join("dst.bin");
        std::fs::write(&src, b"scratch staging").unwrap();

        Transfer::new(&src, &dest)
            .scratch_dir(&scratch)
            .run()
            .await
            .unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"scratch staging");
        assert_eq!(leftover_staging(&scratch), 0);
    }

    #[tokio::test]
    async fn existing_destination_is_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.bin");
        let dest = dir.path().join("dst.bin");
        std::fs::write(&src, b"new").unwrap();
        std::fs::write(&dest, b"old").unwrap();

        let err = Transfer::new(&src, &dest).run().await.unwrap_err();
        assert!(matches!(err, TransferError::DestinationExists(_)));
        assert_eq!(std::fs::read(&dest).unwrap(), b"old");
        assert_eq!(leftover_staging(dir.path()), 0);
    }

    #[tokio::test]
    async fn missing_source_reports_upstream_error() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("dst.bin");

        let err = Transfer::new(dir.path().join("missing.bin"), &dest)
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Upstream(_)));
        assert!(!dest.exists());
        assert_eq!(leftover_staging(dir.path()), 0);
    }

    #[tokio::test]
    async fn oversized_chunk_size_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.bin");
        let dest = dir.path().join("dst.bin");
        std::fs::write(&src, b"data").unwrap();

        let err = Transfer::new(&src, &dest)
            .chunk_size(usize::MAX)
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::ChunkSizeTooLarge(usize::MAX)));
        assert!(!dest.exists());
        assert_eq!(leftover_staging(dir.path()), 0);
    }

    #[tokio::test]
    async fn cancelled_transfer_does_not_commit() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.bin");
        let dest = dir.path().join("dst.bin");
        std::fs::write(&src, pattern(4096, 1)).unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = Transfer::new(&src, &dest)
            .chunk_size(64)
            .cancel_token(cancel)
            .run()
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(!dest.exists());
        assert_eq!(leftover_staging(dir.path()), 0);
    }

    #[tokio::test]
    async fn cancel_mid_stream_stops_source() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.bin");
        let dest = dir.path().join("dst.bin");
        std::fs::write(&src, pattern(64 * 2000, 2)).unwrap();

        let (tx, mut rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(
            Transfer::new(&src, &dest)
                .chunk_size(64)
                .cancel_token(cancel.clone())
                .progress(tx)
                .run(),
        );

        // Wait until at least one chunk has been written, then cancel.
        let first = rx.recv().await.unwrap();
        assert!(first.chunks >= 1);
        cancel.cancel();

        let err = task.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
        assert!(!dest.exists());
        assert_eq!(leftover_staging(dir.path()), 0);
    }

    #[tokio::test]
    async fn concurrent_transfers_do_not_interfere() {
        let dir = tempfile::tempdir().unwrap();
        let mut tasks = Vec::new();
        let mut expected = Vec::new();

        for i in 0..4u8 {
            let src = dir.path().join(format!("src{i}.bin"));
            let dest = dir.path().join(format!("dst{i}.bin"));
            let data = pattern(1000 + i as usize * 137, i);
            std::fs::write(&src, &data).unwrap();
            expected.push((dest.clone(), data));
            tasks.push(tokio::spawn(
                Transfer::new(src, dest).chunk_size(33).run(),
            ));
        }

        for task in tasks {
            task.await.unwrap().unwrap();
        }
        for (dest, data) in expected {
            assert_eq!(std::fs::read(&dest).unwrap(), data);
        }
        assert_eq!(leftover_staging(dir.path()), 0);
    }
}
