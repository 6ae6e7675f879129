//! Streaming file transfer with credit-based backpressure and atomic commit.
//!
//! A [`ChunkSource`] publishes a file as ordered chunks; a [`ChunkSink`]
//! subscribes, grants credit one chunk at a time, writes to a staging file
//! and renames it onto the destination only when the stream completes.
//! [`Transfer`] wires the two together.

mod chunk;
mod error;
pub mod flow;
mod progress;
mod sink;
mod source;
mod transfer;
mod validation;

pub use chunk::{Chunk, calculate_file_checksum, checksum_bytes};
pub use error::TransferError;
pub use flow::{Signal, Stream, Subscriber, Subscription};
pub use progress::{SpeedCalculator, TransferProgress};
pub use sink::{ChunkSink, STAGING_PREFIX, STAGING_SUFFIX, SinkState, TransferReport};
pub use source::ChunkSource;
pub use transfer::{Transfer, copy_file};
pub use validation::validate_file_path;

/// Default chunk size: 64 KiB.
///
/// Tunable per source via [`ChunkSource::with_chunk_size`]; chunk boundaries
/// carry no meaning beyond ordering.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Largest accepted chunk size: 64 MiB. Each chunk is a single allocation.
pub const MAX_CHUNK_SIZE: usize = 64 * 1024 * 1024;
