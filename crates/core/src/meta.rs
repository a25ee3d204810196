//! Per-file sync metadata

use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::hash::BlockDigest;

/// Wire sentinel standing for a deleted file's block-hash list
pub const TOMBSTONE_SENTINEL: &str = "0";

/// What a file's metadata says about its content.
///
/// The wire format and the local index carry deletion as the sentinel list
/// `["0"]`; internally it is a proper variant so live digests and deletion
/// cannot be confused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileState {
    /// File exists; the ordered digests of its blocks
    Live(Vec<BlockDigest>),
    /// File was deleted
    Tombstone,
}

impl FileState {
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        matches!(self, Self::Tombstone)
    }

    /// Render as the wire block-hash list
    #[must_use]
    pub fn to_hash_list(&self) -> Vec<String> {
        match self {
            Self::Live(digests) => digests.iter().map(BlockDigest::to_hex).collect(),
            Self::Tombstone => vec![TOMBSTONE_SENTINEL.to_string()],
        }
    }

    /// Parse a wire block-hash list.
    ///
    /// # Errors
    /// Returns `SyncError::Protocol` on an empty list, on the tombstone
    /// sentinel appearing anywhere but as the sole element, or on a malformed
    /// digest.
    pub fn from_hash_list(hashes: &[String]) -> Result<Self, SyncError> {
        if hashes.is_empty() {
            return Err(SyncError::Protocol("empty block hash list".to_string()));
        }
        if hashes.len() == 1 && hashes[0] == TOMBSTONE_SENTINEL {
            return Ok(Self::Tombstone);
        }
        let digests = hashes
            .iter()
            .map(|h| BlockDigest::from_hex(h))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::Live(digests))
    }
}

/// Metadata for one synced file: name, version, and content state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    /// Path component relative to the base directory
    pub filename: String,
    /// Monotonically increasing version; first appearance is 1
    pub version: i32,
    pub state: FileState,
}

impl FileMeta {
    /// Metadata for a live file
    #[must_use]
    pub fn live(filename: impl Into<String>, version: i32, digests: Vec<BlockDigest>) -> Self {
        Self {
            filename: filename.into(),
            version,
            state: FileState::Live(digests),
        }
    }

    /// Metadata recording a deletion
    #[must_use]
    pub fn tombstone(filename: impl Into<String>, version: i32) -> Self {
        Self {
            filename: filename.into(),
            version,
            state: FileState::Tombstone,
        }
    }

    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.state.is_tombstone()
    }
}
