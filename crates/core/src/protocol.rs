//! Binary protocol between clients and the stores
//!
//! Wire format (all integers are big-endian):
//!
//! Request/Response frame:
//! ```text
//! +--------+--------+------------------+
//! | type   | length | payload          |
//! | 1 byte | 4 bytes| variable         |
//! +--------+--------+------------------+
//! ```
//!
//! Block store messages:
//! - 0x01: GetBlock request (digest: 32 bytes)
//! - 0x02: Block response (block bytes)
//! - 0x03: PutBlock request (block bytes)
//! - 0x04: Ack response (no payload)
//! - 0x05: HasBlocks request (count:4, digests: 32 bytes each)
//! - 0x06: BlockSet response (same encoding)
//!
//! Metadata store messages:
//! - 0x07: FileInfoMap request (no payload)
//! - 0x08: FileInfoMap response (count:4, file metadata entries)
//! - 0x09: UpdateFile request (file metadata)
//! - 0x0a: Version response (version: i32; -1 signals a version conflict)
//! - 0x0b: BlockStoreAddr request (no payload)
//! - 0x0c: Addr response (utf8 address)
//!
//! - 0x0d: Error response (kind:1, utf8 message)
//!
//! File metadata entry:
//! ```text
//! name_len:2, name, version:4, hash_count:4, (hash_len:2, hash)*
//! ```
//! Block-hash lists travel as strings so the tombstone sentinel `"0"` stays
//! wire-compatible; it is lifted to `FileState::Tombstone` at decode time.

use std::io::{Cursor, Read, Write};

use bytes::Bytes;

use crate::error::SyncError;
use crate::hash::BlockDigest;
use crate::meta::{FileMeta, FileState};

/// Message type identifiers
pub mod msg {
    pub const GET_BLOCK: u8 = 0x01;
    pub const BLOCK: u8 = 0x02;
    pub const PUT_BLOCK: u8 = 0x03;
    pub const ACK: u8 = 0x04;
    pub const HAS_BLOCKS: u8 = 0x05;
    pub const BLOCK_SET: u8 = 0x06;
    pub const FILE_INFO_MAP_REQ: u8 = 0x07;
    pub const FILE_INFO_MAP: u8 = 0x08;
    pub const UPDATE_FILE: u8 = 0x09;
    pub const VERSION: u8 = 0x0a;
    pub const BLOCK_STORE_ADDR_REQ: u8 = 0x0b;
    pub const ADDR: u8 = 0x0c;
    pub const ERROR: u8 = 0x0d;
}

/// Error kinds carried by an error frame
pub mod err_kind {
    pub const NOT_FOUND: u8 = 1;
    pub const INVALID: u8 = 2;
    pub const UNCONFIGURED: u8 = 3;
    pub const INTERNAL: u8 = 4;
}

/// Write a frame header (type + length)
fn write_header<W: Write>(w: &mut W, msg_type: u8, len: u32) -> std::io::Result<()> {
    w.write_all(&[msg_type])?;
    w.write_all(&len.to_be_bytes())?;
    Ok(())
}

/// Read a frame header, returns (type, length)
fn read_header<R: Read>(r: &mut R) -> std::io::Result<(u8, u32)> {
    let mut type_buf = [0u8; 1];
    r.read_exact(&mut type_buf)?;

    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf)?;

    Ok((type_buf[0], u32::from_be_bytes(len_buf)))
}

fn encode_digest_list(digests: &[BlockDigest]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + digests.len() * 32);
    buf.extend_from_slice(&(digests.len() as u32).to_be_bytes());
    for digest in digests {
        buf.extend_from_slice(digest.as_bytes());
    }
    buf
}

fn decode_digest_list(cursor: &mut Cursor<&[u8]>) -> Result<Vec<BlockDigest>, SyncError> {
    let mut count_buf = [0u8; 4];
    cursor.read_exact(&mut count_buf)?;
    let count = u32::from_be_bytes(count_buf) as usize;

    let mut digests = Vec::with_capacity(count);
    for _ in 0..count {
        let mut raw = [0u8; 32];
        cursor.read_exact(&mut raw)?;
        digests.push(BlockDigest::from_raw(raw));
    }
    Ok(digests)
}

fn encode_string(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u16).to_be_bytes());
    buf.extend_from_slice(s.as_bytes());
}

fn decode_string(cursor: &mut Cursor<&[u8]>) -> Result<String, SyncError> {
    let mut len_buf = [0u8; 2];
    cursor.read_exact(&mut len_buf)?;
    let len = u16::from_be_bytes(len_buf) as usize;

    let mut bytes = vec![0u8; len];
    cursor.read_exact(&mut bytes)?;
    String::from_utf8(bytes).map_err(|_| SyncError::Protocol("non-UTF-8 string".to_string()))
}

fn encode_file_meta(buf: &mut Vec<u8>, meta: &FileMeta) {
    encode_string(buf, &meta.filename);
    buf.extend_from_slice(&meta.version.to_be_bytes());
    let hashes = meta.state.to_hash_list();
    buf.extend_from_slice(&(hashes.len() as u32).to_be_bytes());
    for hash in &hashes {
        encode_string(buf, hash);
    }
}

fn decode_file_meta(cursor: &mut Cursor<&[u8]>) -> Result<FileMeta, SyncError> {
    let filename = decode_string(cursor)?;
    if filename.is_empty() {
        return Err(SyncError::Protocol("empty filename".to_string()));
    }

    let mut version_buf = [0u8; 4];
    cursor.read_exact(&mut version_buf)?;
    let version = i32::from_be_bytes(version_buf);

    let mut count_buf = [0u8; 4];
    cursor.read_exact(&mut count_buf)?;
    let count = u32::from_be_bytes(count_buf) as usize;

    let mut hashes = Vec::with_capacity(count);
    for _ in 0..count {
        hashes.push(decode_string(cursor)?);
    }
    let state = FileState::from_hash_list(&hashes)?;

    Ok(FileMeta {
        filename,
        version,
        state,
    })
}

/// Protocol writer for sending messages
pub struct ProtocolWriter<W> {
    inner: W,
}

impl<W: Write> ProtocolWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    fn send_frame(&mut self, msg_type: u8, payload: &[u8]) -> Result<(), SyncError> {
        write_header(&mut self.inner, msg_type, payload.len() as u32)?;
        self.inner.write_all(payload)?;
        self.inner.flush()?;
        Ok(())
    }

    /// Send a GetBlock request
    pub fn send_get_block(&mut self, digest: &BlockDigest) -> Result<(), SyncError> {
        self.send_frame(msg::GET_BLOCK, digest.as_bytes())
    }

    /// Send a Block response
    pub fn send_block(&mut self, data: &[u8]) -> Result<(), SyncError> {
        self.send_frame(msg::BLOCK, data)
    }

    /// Send a PutBlock request
    pub fn send_put_block(&mut self, data: &[u8]) -> Result<(), SyncError> {
        self.send_frame(msg::PUT_BLOCK, data)
    }

    /// Send an Ack response
    pub fn send_ack(&mut self) -> Result<(), SyncError> {
        self.send_frame(msg::ACK, &[])
    }

    /// Send a HasBlocks request
    pub fn send_has_blocks(&mut self, digests: &[BlockDigest]) -> Result<(), SyncError> {
        self.send_frame(msg::HAS_BLOCKS, &encode_digest_list(digests))
    }

    /// Send a BlockSet response
    pub fn send_block_set(&mut self, digests: &[BlockDigest]) -> Result<(), SyncError> {
        self.send_frame(msg::BLOCK_SET, &encode_digest_list(digests))
    }

    /// Send a FileInfoMap request
    pub fn send_file_info_map_req(&mut self) -> Result<(), SyncError> {
        self.send_frame(msg::FILE_INFO_MAP_REQ, &[])
    }

    /// Send a FileInfoMap response
    pub fn send_file_info_map<'a, I>(&mut self, metas: I) -> Result<(), SyncError>
    where
        I: ExactSizeIterator<Item = &'a FileMeta>,
    {
        let mut payload = Vec::new();
        payload.extend_from_slice(&(metas.len() as u32).to_be_bytes());
        for meta in metas {
            encode_file_meta(&mut payload, meta);
        }
        self.send_frame(msg::FILE_INFO_MAP, &payload)
    }

    /// Send an UpdateFile request
    pub fn send_update_file(&mut self, meta: &FileMeta) -> Result<(), SyncError> {
        let mut payload = Vec::new();
        encode_file_meta(&mut payload, meta);
        self.send_frame(msg::UPDATE_FILE, &payload)
    }

    /// Send a Version response; -1 signals a version conflict
    pub fn send_version(&mut self, version: i32) -> Result<(), SyncError> {
        self.send_frame(msg::VERSION, &version.to_be_bytes())
    }

    /// Send a BlockStoreAddr request
    pub fn send_block_store_addr_req(&mut self) -> Result<(), SyncError> {
        self.send_frame(msg::BLOCK_STORE_ADDR_REQ, &[])
    }

    /// Send an Addr response
    pub fn send_addr(&mut self, addr: &str) -> Result<(), SyncError> {
        self.send_frame(msg::ADDR, addr.as_bytes())
    }

    /// Send an Error response
    pub fn send_error(&mut self, kind: u8, message: &str) -> Result<(), SyncError> {
        let mut payload = Vec::with_capacity(1 + message.len());
        payload.push(kind);
        payload.extend_from_slice(message.as_bytes());
        self.send_frame(msg::ERROR, &payload)
    }

    /// Get inner writer
    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Message received from the protocol
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    GetBlock { digest: BlockDigest },
    Block { data: Bytes },
    PutBlock { data: Bytes },
    Ack,
    HasBlocks { digests: Vec<BlockDigest> },
    BlockSet { digests: Vec<BlockDigest> },
    FileInfoMapReq,
    FileInfoMap { metas: Vec<FileMeta> },
    UpdateFile { meta: FileMeta },
    Version { version: i32 },
    BlockStoreAddrReq,
    Addr { addr: String },
    Error { kind: u8, message: String },
}

/// Protocol reader for receiving messages
pub struct ProtocolReader<R> {
    inner: R,
}

impl<R: Read> ProtocolReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Read the next message.
    ///
    /// # Errors
    /// `SyncError::Io` on read failure (including EOF) and
    /// `SyncError::Protocol` on a malformed frame.
    pub fn read_message(&mut self) -> Result<Message, SyncError> {
        let (msg_type, len) = read_header(&mut self.inner)?;
        let mut payload = vec![0u8; len as usize];
        self.inner.read_exact(&mut payload)?;
        let mut cursor = Cursor::new(payload.as_slice());

        match msg_type {
            msg::GET_BLOCK => {
                let mut raw = [0u8; 32];
                cursor.read_exact(&mut raw)?;
                Ok(Message::GetBlock {
                    digest: BlockDigest::from_raw(raw),
                })
            }

            msg::BLOCK => Ok(Message::Block {
                data: Bytes::from(payload),
            }),

            msg::PUT_BLOCK => Ok(Message::PutBlock {
                data: Bytes::from(payload),
            }),

            msg::ACK => Ok(Message::Ack),

            msg::HAS_BLOCKS => Ok(Message::HasBlocks {
                digests: decode_digest_list(&mut cursor)?,
            }),

            msg::BLOCK_SET => Ok(Message::BlockSet {
                digests: decode_digest_list(&mut cursor)?,
            }),

            msg::FILE_INFO_MAP_REQ => Ok(Message::FileInfoMapReq),

            msg::FILE_INFO_MAP => {
                let mut count_buf = [0u8; 4];
                cursor.read_exact(&mut count_buf)?;
                let count = u32::from_be_bytes(count_buf) as usize;

                let mut metas = Vec::with_capacity(count);
                for _ in 0..count {
                    metas.push(decode_file_meta(&mut cursor)?);
                }
                Ok(Message::FileInfoMap { metas })
            }

            msg::UPDATE_FILE => Ok(Message::UpdateFile {
                meta: decode_file_meta(&mut cursor)?,
            }),

            msg::VERSION => {
                let mut version_buf = [0u8; 4];
                cursor.read_exact(&mut version_buf)?;
                Ok(Message::Version {
                    version: i32::from_be_bytes(version_buf),
                })
            }

            msg::BLOCK_STORE_ADDR_REQ => Ok(Message::BlockStoreAddrReq),

            msg::ADDR => Ok(Message::Addr {
                addr: String::from_utf8(payload)
                    .map_err(|_| SyncError::Protocol("non-UTF-8 address".to_string()))?,
            }),

            msg::ERROR => {
                if payload.is_empty() {
                    return Err(SyncError::Protocol("empty error frame".to_string()));
                }
                let kind = payload[0];
                let message = String::from_utf8_lossy(&payload[1..]).to_string();
                Ok(Message::Error { kind, message })
            }

            _ => Err(SyncError::Protocol(format!(
                "unknown message type: {msg_type:#04x}"
            ))),
        }
    }

    /// Get inner reader
    pub fn into_inner(self) -> R {
        self.inner
    }
}
