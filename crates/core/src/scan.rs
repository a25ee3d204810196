//! Base-directory scanning
//!
//! A sync scope is the set of regular files sitting directly in the base
//! directory. Subdirectories and the reserved index names are skipped.

use std::collections::HashMap;
use std::io;
use std::path::Path;

use ignore::WalkBuilder;
use tracing::warn;

use crate::chunker;
use crate::error::SyncError;
use crate::hash::BlockDigest;
use crate::index::{INDEX_FILENAME, INDEX_TMP_FILENAME};

/// Whether a filename is reserved for sync bookkeeping and must never be
/// treated as content.
#[must_use]
pub fn is_reserved(name: &str) -> bool {
    name == INDEX_FILENAME || name == INDEX_TMP_FILENAME
}

/// Result of scanning the base directory
#[derive(Debug, Default)]
pub struct ScanOutcome {
    /// filename -> ordered digests of the file's blocks
    pub files: HashMap<String, Vec<BlockDigest>>,
    /// files present but unreadable this pass; they must not be mistaken for
    /// deletions
    pub failed: Vec<String>,
}

/// Scan the direct entries of `base_dir`, chunking and digesting each
/// regular file.
///
/// Files that fail to read are collected in `failed` rather than aborting
/// the scan.
///
/// # Errors
/// Returns an error if the base directory itself cannot be walked.
pub fn scan_base_dir(base_dir: &Path, block_size: usize) -> Result<ScanOutcome, SyncError> {
    let mut builder = WalkBuilder::new(base_dir);
    builder
        .standard_filters(false)
        .max_depth(Some(1))
        .sort_by_file_name(std::ffi::OsStr::cmp);

    let mut outcome = ScanOutcome::default();
    for result in builder.build() {
        let entry = result.map_err(|e| SyncError::Io(io::Error::other(e)))?;
        if entry.depth() == 0 {
            continue;
        }
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let Some(name) = entry.file_name().to_str() else {
            warn!(path = %entry.path().display(), "skipping non-UTF-8 filename");
            continue;
        };
        if is_reserved(name) {
            continue;
        }

        match chunker::file_digest_list(entry.path(), block_size) {
            Ok(digests) => {
                outcome.files.insert(name.to_string(), digests);
            }
            Err(e) => {
                warn!(file = name, error = %e, "failed to read file during scan");
                outcome.failed.push(name.to_string());
            }
        }
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_scan_simple_directory() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("file1.txt"), "hello").unwrap();
        fs::write(dir.path().join("file2.txt"), "world").unwrap();

        let outcome = scan_base_dir(dir.path(), 4096).unwrap();
        assert_eq!(outcome.files.len(), 2);
        assert_eq!(
            outcome.files["file1.txt"],
            vec![BlockDigest::from_bytes(b"hello")]
        );
        assert!(outcome.failed.is_empty());
    }

    #[test]
    fn test_scan_skips_reserved_names() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("keep.txt"), "keep").unwrap();
        fs::write(dir.path().join(INDEX_FILENAME), "not content").unwrap();
        fs::write(dir.path().join(INDEX_TMP_FILENAME), "not content").unwrap();

        let outcome = scan_base_dir(dir.path(), 4096).unwrap();
        assert_eq!(outcome.files.len(), 1);
        assert!(outcome.files.contains_key("keep.txt"));
    }

    #[test]
    fn test_scan_skips_subdirectories() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/nested.txt"), "nested").unwrap();
        fs::write(dir.path().join("top.txt"), "top").unwrap();

        let outcome = scan_base_dir(dir.path(), 4096).unwrap();
        assert_eq!(outcome.files.len(), 1);
        assert!(outcome.files.contains_key("top.txt"));
    }

    #[test]
    fn test_scan_chunks_large_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("big.bin"), vec![9u8; 10]).unwrap();

        let outcome = scan_base_dir(dir.path(), 4).unwrap();
        let digests = &outcome.files["big.bin"];
        assert_eq!(digests.len(), 3);
        assert_eq!(digests[2], BlockDigest::from_bytes(&[9u8; 2]));
    }

    #[test]
    fn test_scan_empty_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("empty.txt"), "").unwrap();

        let outcome = scan_base_dir(dir.path(), 4096).unwrap();
        assert_eq!(
            outcome.files["empty.txt"],
            vec![BlockDigest::empty_file()]
        );
    }

    #[test]
    fn test_scan_missing_base_dir_fails() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        assert!(scan_base_dir(&missing, 4096).is_err());
    }
}
