//! Client-side capability for talking to the stores
//!
//! The sync engine drives this trait and nothing else, so tests can
//! substitute an in-process implementation for the wire.

use std::collections::HashMap;

use bytes::Bytes;

use crate::error::SyncError;
use crate::hash::BlockDigest;
use crate::meta::FileMeta;

/// The remote block and metadata store surface, as seen by a client.
pub trait RemoteStore {
    /// Fetch a block by digest.
    ///
    /// # Errors
    /// `SyncError::BlockNotFound` for an unknown digest.
    fn get_block(&mut self, digest: &BlockDigest) -> Result<Bytes, SyncError>;

    /// Store a block; idempotent. Returns the server-computed digest.
    ///
    /// # Errors
    /// `SyncError::InvalidArgument` for an empty block.
    fn put_block(&mut self, data: Bytes) -> Result<BlockDigest, SyncError>;

    /// Which of `digests` the block store already holds. An empty subset is
    /// a valid answer.
    ///
    /// # Errors
    /// Transport failures only.
    fn has_blocks(&mut self, digests: &[BlockDigest]) -> Result<Vec<BlockDigest>, SyncError>;

    /// Snapshot of the server's filename -> metadata map.
    ///
    /// # Errors
    /// Transport failures only; an empty map is not an error.
    fn file_info_map(&mut self) -> Result<HashMap<String, FileMeta>, SyncError>;

    /// Propose a metadata update; accepted only at `current version + 1`.
    ///
    /// # Errors
    /// `SyncError::VersionConflict` when the proposal is stale.
    fn update_file(&mut self, meta: &FileMeta) -> Result<i32, SyncError>;

    /// The block store endpoint this metadata server points at.
    ///
    /// # Errors
    /// `SyncError::Unconfigured` when the server has no address set.
    fn block_store_addr(&mut self) -> Result<String, SyncError>;
}
