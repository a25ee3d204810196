//! Framed TCP store connection
//!
//! One connection to the metadata store, opened up front; one to the block
//! store, resolved through `BlockStoreAddr` on first block operation and
//! cached for the rest of the pass. Each call is a single request/response
//! exchange; socket timeouts surface as `SyncError::Transport`.

use std::collections::HashMap;
use std::io::{BufReader, BufWriter};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use bytes::Bytes;
use tracing::debug;

use blocksync_core::protocol::{err_kind, Message, ProtocolReader, ProtocolWriter};
use blocksync_core::{BlockDigest, FileMeta, RemoteStore, SyncError};

/// Default per-call socket timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

struct Conn {
    reader: ProtocolReader<BufReader<TcpStream>>,
    writer: ProtocolWriter<BufWriter<TcpStream>>,
}

impl Conn {
    fn connect(addr: &str, timeout: Duration) -> Result<Self, SyncError> {
        let socket_addr = addr
            .to_socket_addrs()
            .map_err(|e| SyncError::Transport(format!("cannot resolve {addr}: {e}")))?
            .next()
            .ok_or_else(|| SyncError::Transport(format!("cannot resolve {addr}")))?;

        let stream = TcpStream::connect_timeout(&socket_addr, timeout)
            .map_err(|e| SyncError::Transport(format!("cannot connect to {addr}: {e}")))?;
        stream
            .set_read_timeout(Some(timeout))
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        stream
            .set_write_timeout(Some(timeout))
            .map_err(|e| SyncError::Transport(e.to_string()))?;

        let read_half = stream
            .try_clone()
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        debug!(addr, "connected");
        Ok(Self {
            reader: ProtocolReader::new(BufReader::new(read_half)),
            writer: ProtocolWriter::new(BufWriter::new(stream)),
        })
    }

    /// One request/response exchange. IO failures on an established
    /// connection are transient transport failures.
    fn call(
        &mut self,
        send: impl FnOnce(&mut ProtocolWriter<BufWriter<TcpStream>>) -> Result<(), SyncError>,
    ) -> Result<Message, SyncError> {
        send(&mut self.writer).map_err(as_transport)?;
        self.reader.read_message().map_err(as_transport)
    }
}

fn as_transport(e: SyncError) -> SyncError {
    match e {
        SyncError::Io(io) => SyncError::Transport(io.to_string()),
        other => other,
    }
}

/// Map an error frame back to the typed error it carries.
fn decode_error(kind: u8, message: String) -> SyncError {
    match kind {
        err_kind::INVALID => SyncError::InvalidArgument(message),
        err_kind::UNCONFIGURED => SyncError::Unconfigured,
        _ => SyncError::Transport(format!("server error: {message}")),
    }
}

/// A `RemoteStore` speaking the framed protocol over TCP
pub struct TcpStore {
    meta: Conn,
    block: Option<Conn>,
    timeout: Duration,
}

impl TcpStore {
    /// Connect to the metadata store.
    ///
    /// # Errors
    /// Returns `SyncError::Transport` if the endpoint is unreachable.
    pub fn connect(meta_addr: &str) -> Result<Self, SyncError> {
        Self::connect_with_timeout(meta_addr, DEFAULT_TIMEOUT)
    }

    /// Connect with an explicit per-call timeout.
    ///
    /// # Errors
    /// Returns `SyncError::Transport` if the endpoint is unreachable.
    pub fn connect_with_timeout(meta_addr: &str, timeout: Duration) -> Result<Self, SyncError> {
        Ok(Self {
            meta: Conn::connect(meta_addr, timeout)?,
            block: None,
            timeout,
        })
    }

    /// The block store connection, resolved through the metadata store once
    /// and reused afterwards.
    fn block_conn(&mut self) -> Result<&mut Conn, SyncError> {
        if self.block.is_none() {
            let addr = self.fetch_block_store_addr()?;
            self.block = Some(Conn::connect(&addr, self.timeout)?);
        }
        // just set above
        self.block
            .as_mut()
            .ok_or_else(|| SyncError::Transport("block connection lost".to_string()))
    }

    fn fetch_block_store_addr(&mut self) -> Result<String, SyncError> {
        match self.meta.call(ProtocolWriter::send_block_store_addr_req)? {
            Message::Addr { addr } => Ok(addr),
            Message::Error { kind, message } => Err(decode_error(kind, message)),
            other => Err(unexpected(&other)),
        }
    }
}

fn unexpected(message: &Message) -> SyncError {
    SyncError::Protocol(format!("unexpected response: {message:?}"))
}

impl RemoteStore for TcpStore {
    fn get_block(&mut self, digest: &BlockDigest) -> Result<Bytes, SyncError> {
        let conn = self.block_conn()?;
        match conn.call(|w| w.send_get_block(digest))? {
            Message::Block { data } => Ok(data),
            Message::Error {
                kind: err_kind::NOT_FOUND,
                ..
            } => Err(SyncError::BlockNotFound { digest: *digest }),
            Message::Error { kind, message } => Err(decode_error(kind, message)),
            other => Err(unexpected(&other)),
        }
    }

    fn put_block(&mut self, data: Bytes) -> Result<BlockDigest, SyncError> {
        let digest = BlockDigest::from_bytes(&data);
        let conn = self.block_conn()?;
        match conn.call(|w| w.send_put_block(&data))? {
            Message::Ack => Ok(digest),
            Message::Error { kind, message } => Err(decode_error(kind, message)),
            other => Err(unexpected(&other)),
        }
    }

    fn has_blocks(&mut self, digests: &[BlockDigest]) -> Result<Vec<BlockDigest>, SyncError> {
        let conn = self.block_conn()?;
        match conn.call(|w| w.send_has_blocks(digests))? {
            Message::BlockSet { digests } => Ok(digests),
            Message::Error { kind, message } => Err(decode_error(kind, message)),
            other => Err(unexpected(&other)),
        }
    }

    fn file_info_map(&mut self) -> Result<HashMap<String, FileMeta>, SyncError> {
        match self.meta.call(ProtocolWriter::send_file_info_map_req)? {
            Message::FileInfoMap { metas } => Ok(metas
                .into_iter()
                .map(|m| (m.filename.clone(), m))
                .collect()),
            Message::Error { kind, message } => Err(decode_error(kind, message)),
            other => Err(unexpected(&other)),
        }
    }

    fn update_file(&mut self, meta: &FileMeta) -> Result<i32, SyncError> {
        match self.meta.call(|w| w.send_update_file(meta))? {
            Message::Version { version: -1 } => Err(SyncError::VersionConflict {
                filename: meta.filename.clone(),
            }),
            Message::Version { version } => Ok(version),
            Message::Error { kind, message } => Err(decode_error(kind, message)),
            other => Err(unexpected(&other)),
        }
    }

    fn block_store_addr(&mut self) -> Result<String, SyncError> {
        self.fetch_block_store_addr()
    }
}
