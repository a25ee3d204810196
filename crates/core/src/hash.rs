//! Content-addressed block identity using SHA-256

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::SyncError;

/// A block digest: SHA-256 of the block's bytes (256-bit)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockDigest([u8; 32]);

impl BlockDigest {
    /// Digest arbitrary bytes
    #[must_use]
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    /// Wrap raw digest bytes
    #[must_use]
    pub fn from_raw(raw: [u8; 32]) -> Self {
        Self(raw)
    }

    /// The digest standing in for an empty file's contents.
    ///
    /// Never backed by a stored block: zero-length blocks are invalid, so an
    /// empty file is carried as metadata only.
    #[must_use]
    pub fn empty_file() -> Self {
        Self::from_bytes(&[])
    }

    /// Get raw bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to lowercase hex, the digest's wire identity
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a 64-character lowercase hex digest
    ///
    /// # Errors
    /// Returns `SyncError::Protocol` if the string is not a valid digest.
    pub fn from_hex(s: &str) -> Result<Self, SyncError> {
        if s.len() != 64 || s.bytes().any(|b| b.is_ascii_uppercase()) {
            return Err(SyncError::Protocol(format!("invalid block digest {s:?}")));
        }
        let decoded =
            hex::decode(s).map_err(|_| SyncError::Protocol(format!("invalid block digest {s:?}")))?;
        let mut raw = [0u8; 32];
        raw.copy_from_slice(&decoded);
        Ok(Self(raw))
    }
}

impl fmt::Debug for BlockDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(f, "BlockDigest({})", hex.get(..16).unwrap_or(&hex))
    }
}

impl fmt::Display for BlockDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(f, "{}", hex.get(..16).unwrap_or(&hex))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_deterministic() {
        let data = b"hello world";
        let h1 = BlockDigest::from_bytes(data);
        let h2 = BlockDigest::from_bytes(data);
        assert_eq!(h1, h2);
    }

    #[test]
    fn test_digest_different_data() {
        let h1 = BlockDigest::from_bytes(b"hello");
        let h2 = BlockDigest::from_bytes(b"world");
        assert_ne!(h1, h2);
    }

    #[test]
    fn test_known_sha256() {
        // SHA-256("hello") from any reference implementation
        let h = BlockDigest::from_bytes(b"hello");
        assert_eq!(
            h.to_hex(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_empty_file_digest() {
        let h = BlockDigest::empty_file();
        assert_eq!(
            h.to_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_hex_roundtrip() {
        let h = BlockDigest::from_bytes(b"some block");
        let parsed = BlockDigest::from_hex(&h.to_hex()).unwrap();
        assert_eq!(h, parsed);
    }

    #[test]
    fn test_from_hex_rejects_bad_input() {
        assert!(BlockDigest::from_hex("0").is_err());
        assert!(BlockDigest::from_hex("zz").is_err());
        // uppercase is not a valid wire digest
        let upper = BlockDigest::from_bytes(b"x").to_hex().to_uppercase();
        assert!(BlockDigest::from_hex(&upper).is_err());
    }
}
