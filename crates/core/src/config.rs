//! Sync configuration

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::chunker::DEFAULT_BLOCK_SIZE;
use crate::error::SyncError;

/// Optional per-directory config file name
pub const CONFIG_FILE: &str = ".blocksync.toml";

/// Configuration a sync pass consumes
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Directory whose direct entries are synced
    pub base_dir: PathBuf,
    /// Block size in bytes; only a file's final block may be shorter
    pub block_size: usize,
    /// Metadata store endpoint
    pub meta_addr: String,
}

impl SyncConfig {
    #[must_use]
    pub fn new(base_dir: impl Into<PathBuf>, meta_addr: impl Into<String>) -> Self {
        Self {
            base_dir: base_dir.into(),
            block_size: DEFAULT_BLOCK_SIZE,
            meta_addr: meta_addr.into(),
        }
    }

    #[must_use]
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }
}

/// Per-directory overrides loaded from `.blocksync.toml`
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub block_size: Option<usize>,
    pub meta_addr: Option<String>,
}

impl FileConfig {
    /// Load overrides from the base directory.
    ///
    /// Returns defaults if the file doesn't exist.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(base_dir: &Path) -> Result<Self, SyncError> {
        let config_path = base_dir.join(CONFIG_FILE);
        if !config_path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&config_path)?;
        toml::from_str(&content)
            .map_err(|e| SyncError::Protocol(format!("malformed {CONFIG_FILE}: {e}")))
    }
}
