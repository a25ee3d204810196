//! blocksync-core: Core sync engine
//!
//! Provides block digests, fixed-size chunking, the server-side block and
//! metadata stores, the persisted local index, and the reconciliation engine
//! that converges a base directory with its replica.

pub mod block_store;
pub mod chunker;
pub mod config;
pub mod engine;
pub mod error;
pub mod hash;
pub mod index;
pub mod meta;
pub mod meta_store;
pub mod protocol;
pub mod rpc;
pub mod scan;

pub use block_store::BlockStore;
pub use chunker::{Block, DEFAULT_BLOCK_SIZE};
pub use config::{FileConfig, SyncConfig};
pub use engine::{SyncEngine, SyncReport};
pub use error::SyncError;
pub use hash::BlockDigest;
pub use meta::{FileMeta, FileState};
pub use meta_store::MetaStore;
pub use protocol::{Message, ProtocolReader, ProtocolWriter};
pub use rpc::RemoteStore;
