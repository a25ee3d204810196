//! In-process store connection
//!
//! Drives the core stores directly, without a wire. Tests substitute this
//! for TCP; a single-process deployment can use it as-is.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;

use blocksync_core::{BlockDigest, BlockStore, FileMeta, MetaStore, RemoteStore, SyncError};

/// A `RemoteStore` backed by shared in-memory stores
pub struct LocalStore {
    blocks: Arc<BlockStore>,
    metas: Arc<MetaStore>,
}

impl LocalStore {
    #[must_use]
    pub fn new(blocks: Arc<BlockStore>, metas: Arc<MetaStore>) -> Self {
        Self { blocks, metas }
    }

    /// Fresh stores plus a connection to them, for tests.
    #[must_use]
    pub fn in_memory() -> (Self, Arc<BlockStore>, Arc<MetaStore>) {
        let blocks = Arc::new(BlockStore::new());
        let metas = Arc::new(MetaStore::new(Some("local".to_string())));
        (
            Self::new(Arc::clone(&blocks), Arc::clone(&metas)),
            blocks,
            metas,
        )
    }
}

impl RemoteStore for LocalStore {
    fn get_block(&mut self, digest: &BlockDigest) -> Result<Bytes, SyncError> {
        self.blocks.get(digest)
    }

    fn put_block(&mut self, data: Bytes) -> Result<BlockDigest, SyncError> {
        self.blocks.put(data)
    }

    fn has_blocks(&mut self, digests: &[BlockDigest]) -> Result<Vec<BlockDigest>, SyncError> {
        Ok(self.blocks.has_subset(digests))
    }

    fn file_info_map(&mut self) -> Result<HashMap<String, FileMeta>, SyncError> {
        Ok(self.metas.file_info_map())
    }

    fn update_file(&mut self, meta: &FileMeta) -> Result<i32, SyncError> {
        self.metas.update_file(meta.clone())
    }

    fn block_store_addr(&mut self) -> Result<String, SyncError> {
        self.metas.block_store_addr()
    }
}
