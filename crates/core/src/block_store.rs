//! Content-addressed block storage
//!
//! Stores blocks by their SHA-256 digest. Never stores the same content
//! twice; putting an already-present block is a no-op that still succeeds.

use std::collections::HashMap;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::error::SyncError;
use crate::hash::BlockDigest;

/// Server-side block map: digest -> block bytes.
///
/// Guarded for single-writer / multi-reader access; `put` is idempotent and
/// commutative so concurrent writers cannot disagree about an entry.
#[derive(Default)]
pub struct BlockStore {
    blocks: RwLock<HashMap<BlockDigest, Bytes>>,
}

impl BlockStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a block by digest.
    ///
    /// # Errors
    /// Returns `SyncError::BlockNotFound` for an unknown digest.
    pub fn get(&self, digest: &BlockDigest) -> Result<Bytes, SyncError> {
        self.blocks
            .read()
            .get(digest)
            .cloned()
            .ok_or(SyncError::BlockNotFound { digest: *digest })
    }

    /// Store a block, returning the digest computed from its bytes.
    ///
    /// The digest is always recomputed here; callers cannot insert under a
    /// mismatched key.
    ///
    /// # Errors
    /// Returns `SyncError::InvalidArgument` for an empty block.
    pub fn put(&self, data: Bytes) -> Result<BlockDigest, SyncError> {
        if data.is_empty() {
            return Err(SyncError::InvalidArgument(
                "refusing to store a zero-length block".to_string(),
            ));
        }
        let digest = BlockDigest::from_bytes(&data);
        self.blocks.write().entry(digest).or_insert(data);
        Ok(digest)
    }

    /// Return the subset of `digests` that are present.
    ///
    /// An empty intersection is a valid answer, not an error. Order of the
    /// returned list is not guaranteed.
    #[must_use]
    pub fn has_subset(&self, digests: &[BlockDigest]) -> Vec<BlockDigest> {
        let blocks = self.blocks.read();
        digests
            .iter()
            .filter(|d| blocks.contains_key(d))
            .copied()
            .collect()
    }

    /// Number of distinct blocks stored
    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.read().is_empty()
    }
}
