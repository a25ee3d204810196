//! blocksync-transport: client-side store connections
//!
//! Implements the [`RemoteStore`](blocksync_core::RemoteStore) capability two
//! ways: in-process against the core stores (tests, single-process setups)
//! and over the framed TCP protocol.

pub mod local;
pub mod tcp;

pub use local::LocalStore;
pub use tcp::TcpStore;
