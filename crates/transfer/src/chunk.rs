use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

/// One ordered unit of transferred bytes.
///
/// Chunks are immutable once created. Ownership moves from the source to
/// the stream and then to the sink, which consumes the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    offset: u64,
    data: Vec<u8>,
}

impl Chunk {
    /// Creates a chunk holding `data` read at `offset` in the source file.
    pub fn new(offset: u64, data: Vec<u8>) -> Self {
        Self { offset, data }
    }

    /// Byte offset of this chunk within the source file.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Raw chunk bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Checksum helpers
// ---------------------------------------------------------------------------

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Computes SHA-256 of an entire file and returns the hex-encoded digest.
pub fn calculate_file_checksum(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn chunk_accessors() {
        let chunk = Chunk::new(8, b"abc".to_vec());
        assert_eq!(chunk.offset(), 8);
        assert_eq!(chunk.len(), 3);
        assert!(!chunk.is_empty());
        assert_eq!(chunk.as_bytes(), b"abc");
    }

    #[test]
    fn empty_chunk() {
        let chunk = Chunk::new(0, Vec::new());
        assert!(chunk.is_empty());
        assert_eq!(chunk.len(), 0);
    }

    #[test]
    fn checksum_bytes_deterministic() {
        let c1 = checksum_bytes(b"hello world");
        let c2 = checksum_bytes(b"hello world");
        assert_eq!(c1, c2);
        assert_eq!(c1.len(), 64); // SHA-256 = 64 hex chars.
    }

    #[test]
    fn checksum_of_empty_input() {
        assert_eq!(
            checksum_bytes(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn calculate_file_checksum_matches_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let data = b"test content for checksum";
        let path = dir.path().join("test.bin");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(data)
            .unwrap();

        let file_cs = calculate_file_checksum(&path).unwrap();
        assert_eq!(file_cs, checksum_bytes(data));
    }

    #[test]
    fn calculate_file_checksum_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(calculate_file_checksum(&dir.path().join("missing")).is_err());
    }
}
