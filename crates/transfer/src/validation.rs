use std::path::Path;

use crate::TransferError;

/// Validates that `path` can structurally denote a regular file.
///
/// This does not touch the filesystem. Rejects:
/// - Empty paths
/// - Paths containing a NUL byte
/// - Paths without a final file name component (`/`, `..`, `dir/..`)
pub fn validate_file_path(path: &Path) -> Result<(), TransferError> {
    let raw = path.as_os_str();
    if raw.is_empty() {
        return Err(TransferError::InvalidPath("empty path".into()));
    }

    if raw.as_encoded_bytes().contains(&0) {
        return Err(TransferError::InvalidPath(format!(
            "NUL byte not allowed: {}",
            path.display()
        )));
    }

    if path.file_name().is_none() {
        return Err(TransferError::InvalidPath(format!(
            "path does not name a file: {}",
            path.display()
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_path() {
        assert!(validate_file_path(Path::new("")).is_err());
    }

    #[test]
    fn rejects_nul_byte() {
        let err = validate_file_path(Path::new("bad\0name")).unwrap_err();
        assert!(matches!(err, TransferError::InvalidPath(_)));
    }

    #[test]
    fn rejects_root() {
        assert!(validate_file_path(Path::new("/")).is_err());
    }

    #[test]
    fn rejects_trailing_parent_dir() {
        assert!(validate_file_path(Path::new("..")).is_err());
        assert!(validate_file_path(Path::new("data/..")).is_err());
    }

    #[test]
    fn accepts_relative_file() {
        assert!(validate_file_path(Path::new("out.bin")).is_ok());
        assert!(validate_file_path(Path::new("./sub/out.bin")).is_ok());
    }

    #[test]
    fn accepts_absolute_file() {
        assert!(validate_file_path(Path::new("/tmp/out.bin")).is_ok());
    }

    #[test]
    fn accepts_nonexistent_file() {
        // Existence is checked lazily, not here.
        assert!(validate_file_path(Path::new("/definitely/not/here.bin")).is_ok());
    }
}
