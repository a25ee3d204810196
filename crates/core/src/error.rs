//! Error kinds the sync core distinguishes

use std::io;

use crate::hash::BlockDigest;

/// Errors raised by the stores, the wire layer, and the sync engine.
///
/// The engine's recovery policy dispatches on these: `VersionConflict` is an
/// expected lost race, `BlockNotFound` and `Io` poison a single file for one
/// pass, `Transport`, `Index`, `Protocol`, and `Unconfigured` abort the pass.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("no block stored for digest {digest}")]
    BlockNotFound { digest: BlockDigest },

    #[error("stale version for {filename}")]
    VersionConflict { filename: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("no block store address configured")]
    Unconfigured,

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("index database error: {0}")]
    Index(#[from] rusqlite::Error),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("protocol violation: {0}")]
    Protocol(String),
}

impl SyncError {
    /// Whether this is the expected update race rather than a real failure
    #[must_use]
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }
}
