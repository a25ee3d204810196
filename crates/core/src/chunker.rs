//! Fixed-size block chunking

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use bytes::Bytes;

use crate::hash::BlockDigest;

/// Default block size in bytes
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// A single block of file content.
///
/// At most `block_size` bytes; only the final block of a file may be shorter.
/// Zero-length blocks are never produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// The block's bytes
    pub data: Bytes,
}

impl Block {
    /// The block's content digest
    #[must_use]
    pub fn digest(&self) -> BlockDigest {
        BlockDigest::from_bytes(&self.data)
    }

    /// Length in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the block holds no bytes (never true for chunker output)
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Fill `buf` from the reader, stopping only at EOF or a full buffer.
fn fill_block<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Split a reader into fixed-size blocks.
///
/// The final block may be shorter than `block_size`; zero-length input
/// produces no blocks.
///
/// # Errors
/// Returns an error if reading fails.
pub fn split_blocks<R: Read>(mut reader: R, block_size: usize) -> io::Result<Vec<Block>> {
    debug_assert!(block_size > 0);

    let mut blocks = Vec::new();
    loop {
        let mut buf = vec![0u8; block_size];
        let filled = fill_block(&mut reader, &mut buf)?;
        if filled == 0 {
            break;
        }
        buf.truncate(filled);
        blocks.push(Block {
            data: Bytes::from(buf),
        });
        if filled < block_size {
            break;
        }
    }
    Ok(blocks)
}

/// Stream a reader and return the ordered digests of its blocks without
/// retaining the block bytes.
///
/// # Errors
/// Returns an error if reading fails.
pub fn digest_blocks<R: Read>(mut reader: R, block_size: usize) -> io::Result<Vec<BlockDigest>> {
    debug_assert!(block_size > 0);

    let mut digests = Vec::new();
    let mut buf = vec![0u8; block_size];
    loop {
        let filled = fill_block(&mut reader, &mut buf)?;
        if filled == 0 {
            break;
        }
        digests.push(BlockDigest::from_bytes(&buf[..filled]));
        if filled < block_size {
            break;
        }
    }
    Ok(digests)
}

/// The block-hash list describing a file on disk.
///
/// An empty file yields the single stand-in digest of the empty byte string;
/// it corresponds to no stored block.
///
/// # Errors
/// Returns an error if the file cannot be opened or read.
pub fn file_digest_list(path: &Path, block_size: usize) -> io::Result<Vec<BlockDigest>> {
    let file = File::open(path)?;
    let digests = digest_blocks(BufReader::new(file), block_size)?;
    if digests.is_empty() {
        return Ok(vec![BlockDigest::empty_file()]);
    }
    Ok(digests)
}

/// Load a file's blocks for upload. An empty file yields no blocks.
///
/// # Errors
/// Returns an error if the file cannot be opened or read.
pub fn file_blocks(path: &Path, block_size: usize) -> io::Result<Vec<Block>> {
    let file = File::open(path)?;
    split_blocks(BufReader::new(file), block_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_exact_multiple_of_block_size() {
        let data = vec![7u8; 2 * 16];
        let blocks = split_blocks(Cursor::new(&data), 16).unwrap();
        assert_eq!(blocks.len(), 2);
        assert!(blocks.iter().all(|b| b.len() == 16));
    }

    #[test]
    fn test_trailing_short_block() {
        let data = vec![7u8; 2 * 16 + 1];
        let blocks = split_blocks(Cursor::new(&data), 16).unwrap();
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[2].len(), 1);
    }

    #[test]
    fn test_small_input_single_block() {
        let blocks = split_blocks(Cursor::new(b"small"), 4096).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(&blocks[0].data[..], b"small");
    }

    #[test]
    fn test_empty_input_no_blocks() {
        let blocks = split_blocks(Cursor::new(b""), 4096).unwrap();
        assert!(blocks.is_empty());
    }

    #[test]
    fn test_digests_match_blocks() {
        let data: Vec<u8> = (0..100u8).collect();
        let blocks = split_blocks(Cursor::new(&data), 32).unwrap();
        let digests = digest_blocks(Cursor::new(&data), 32).unwrap();
        assert_eq!(
            blocks.iter().map(Block::digest).collect::<Vec<_>>(),
            digests
        );
    }

    #[test]
    fn test_blocks_reassemble_input() {
        let data: Vec<u8> = (0..255u8).cycle().take(10_000).collect();
        let blocks = split_blocks(Cursor::new(&data), 4096).unwrap();
        let joined: Vec<u8> = blocks.iter().flat_map(|b| b.data.iter().copied()).collect();
        assert_eq!(joined, data);
    }

    #[test]
    fn test_empty_file_digest_list() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.txt");
        std::fs::write(&path, b"").unwrap();

        let digests = file_digest_list(&path, 4096).unwrap();
        assert_eq!(digests, vec![BlockDigest::empty_file()]);
        assert!(file_blocks(&path, 4096).unwrap().is_empty());
    }

    #[test]
    fn test_file_digest_list_reads_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"hello").unwrap();

        let digests = file_digest_list(&path, 4096).unwrap();
        assert_eq!(digests, vec![BlockDigest::from_bytes(b"hello")]);
    }
}
