//! CLI configuration.
//!
//! Settings are read from an optional TOML file and then overridden by
//! command-line flags:
//!
//! ```toml
//! chunk_size = 262144
//! scratch_dir = "/var/tmp/filestream"
//! log_level = "debug"
//! verify = true
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

/// Transfer settings handed to the core.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Maximum bytes per chunk (0 = library default).
    pub chunk_size: usize,

    /// Directory for staging files (default: next to the destination).
    pub scratch_dir: Option<PathBuf>,

    /// Log level used when `RUST_LOG` is not set.
    pub log_level: String,

    /// Re-hash the destination after commit and compare digests.
    pub verify: bool,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            chunk_size: filestream_transfer::DEFAULT_CHUNK_SIZE,
            scratch_dir: None,
            log_level: "info".into(),
            verify: false,
        }
    }
}

impl CliConfig {
    /// Loads configuration from `path`.
    ///
    /// Falls back to defaults when no path is given or the file does not
    /// exist; a file that exists but cannot be read or parsed is an error.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: CliConfig = toml::from_str(&content)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        Ok(config)
    }
}
