//! Per-file metadata storage with versioned updates

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::error::SyncError;
use crate::meta::FileMeta;

/// Server-side metadata map: filename -> `FileMeta`, plus the block store
/// endpoint clients should talk to.
///
/// The mutex makes `update_file`'s read-check-write atomic with respect to
/// concurrent updates of the same filename.
pub struct MetaStore {
    files: Mutex<HashMap<String, FileMeta>>,
    block_store_addr: Option<String>,
}

impl MetaStore {
    #[must_use]
    pub fn new(block_store_addr: Option<String>) -> Self {
        Self {
            files: Mutex::new(HashMap::new()),
            block_store_addr,
        }
    }

    /// A snapshot copy of the whole map. An empty store yields an empty map.
    #[must_use]
    pub fn file_info_map(&self) -> HashMap<String, FileMeta> {
        self.files.lock().clone()
    }

    /// Apply a proposed update under last-writer-wins version arithmetic.
    ///
    /// A filename's first appearance is accepted verbatim; afterwards only
    /// `current.version + 1` is accepted and the entry is replaced wholesale.
    ///
    /// # Errors
    /// Returns `SyncError::VersionConflict` when the proposal's version is
    /// stale; the stored entry is left unchanged.
    pub fn update_file(&self, proposed: FileMeta) -> Result<i32, SyncError> {
        let mut files = self.files.lock();
        match files.get(&proposed.filename) {
            Some(current) if proposed.version != current.version + 1 => {
                Err(SyncError::VersionConflict {
                    filename: proposed.filename,
                })
            }
            _ => {
                let version = proposed.version;
                files.insert(proposed.filename.clone(), proposed);
                Ok(version)
            }
        }
    }

    /// The configured block store endpoint.
    ///
    /// # Errors
    /// Returns `SyncError::Unconfigured` when no address was set.
    pub fn block_store_addr(&self) -> Result<String, SyncError> {
        self.block_store_addr
            .clone()
            .ok_or(SyncError::Unconfigured)
    }
}
