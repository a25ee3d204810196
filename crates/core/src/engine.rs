//! The reconciliation engine
//!
//! One pass converges the base directory, the persisted index, and the
//! server's metadata map. A pass never loops; callers drive repetition.
//!
//! Phases:
//! A. scan and chunk the base directory
//! B. diff the scan against the persisted index into a desired-local map
//! C. reconcile the desired-local map with the server, moving blocks
//! D. atomically rewrite the index with what was actually achieved

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::chunker;
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::hash::BlockDigest;
use crate::index;
use crate::meta::{FileMeta, FileState};
use crate::rpc::RemoteStore;
use crate::scan::{self, ScanOutcome};

/// What a sync pass did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// files pushed to the server (content or tombstone metadata)
    pub uploaded: usize,
    /// files whose content was pulled and written locally
    pub downloaded: usize,
    /// local files removed because the server holds a tombstone
    pub deleted: usize,
    /// files already in agreement; no RPC issued
    pub unchanged: usize,
    /// uploads abandoned because the server advanced first
    pub conflicts: usize,
    /// files skipped this pass, with the failure rendered
    pub failed: Vec<(String, String)>,
}

impl SyncReport {
    /// Whether the pass completed without skipping any file
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.conflicts == 0
    }
}

/// Drives one reconciliation pass per [`run`](SyncEngine::run) call.
pub struct SyncEngine {
    config: SyncConfig,
}

impl SyncEngine {
    #[must_use]
    pub fn new(config: SyncConfig) -> Self {
        Self { config }
    }

    /// Run one sync pass against the given remote.
    ///
    /// A single failing file does not poison the pass: its previous index
    /// entry is retained and work continues. Pass-wide failures (index IO,
    /// the metadata snapshot, transport teardown) abort before the index is
    /// rewritten.
    ///
    /// # Errors
    /// Returns the pass-wide failure, with the index left unchanged.
    pub fn run(&self, remote: &mut dyn RemoteStore) -> Result<SyncReport, SyncError> {
        if self.config.block_size == 0 {
            return Err(SyncError::InvalidArgument(
                "block size must be positive".to_string(),
            ));
        }

        // Phase A
        let ScanOutcome { files: scanned, failed } =
            scan::scan_base_dir(&self.config.base_dir, self.config.block_size)?;
        let index_map = index::load(&self.config.base_dir)?;
        debug!(
            scanned = scanned.len(),
            indexed = index_map.len(),
            "scan complete"
        );

        let mut report = SyncReport::default();
        let mut pinned: HashSet<String> = HashSet::new();
        for name in failed {
            report
                .failed
                .push((name.clone(), "unreadable during scan".to_string()));
            pinned.insert(name);
        }

        // Phase B
        let mut desired = local_diff(&scanned, &index_map, &pinned);

        // Phase C
        let server_map = remote.file_info_map()?;
        debug!(server_files = server_map.len(), "fetched server metadata");

        // server -> local: downloads and no-ops
        for (name, server_meta) in &server_map {
            if pinned.contains(name) {
                continue;
            }
            if !acceptable_remote_name(name) {
                warn!(file = name.as_str(), "ignoring server entry with unsafe name");
                continue;
            }
            let wants_download = match desired.get(name) {
                None => true,
                Some(local) => {
                    server_meta.version > local.version
                        || (server_meta.version == local.version
                            && server_meta.state != local.state)
                }
            };
            if !wants_download {
                if desired.get(name).is_some_and(|l| l.version == server_meta.version) {
                    report.unchanged += 1;
                }
                continue;
            }

            match self.download(remote, server_meta) {
                Ok(applied) => {
                    desired.insert(name.clone(), server_meta.clone());
                    match applied {
                        Applied::Written => report.downloaded += 1,
                        Applied::Deleted => report.deleted += 1,
                        Applied::Nothing => {}
                    }
                }
                Err(e) => {
                    warn!(file = name.as_str(), error = %e, "download failed; keeping previous index entry");
                    revert_entry(&mut desired, &index_map, name);
                    report.failed.push((name.clone(), e.to_string()));
                }
            }
        }

        // local -> server: uploads
        let uploads: Vec<FileMeta> = desired
            .values()
            .filter(|local| {
                !pinned.contains(&local.filename)
                    && server_map
                        .get(&local.filename)
                        .is_none_or(|server| server.version < local.version)
            })
            .cloned()
            .collect();

        for local_meta in uploads {
            let name = local_meta.filename.clone();
            match self.upload(remote, &local_meta) {
                Ok(pushed) => {
                    desired.insert(name, pushed);
                    report.uploaded += 1;
                }
                Err(e) if e.is_version_conflict() => {
                    debug!(file = name.as_str(), "lost update race; will re-download next pass");
                    revert_entry(&mut desired, &index_map, &name);
                    report.conflicts += 1;
                }
                Err(e) => {
                    warn!(file = name.as_str(), error = %e, "upload failed; keeping previous index entry");
                    revert_entry(&mut desired, &index_map, &name);
                    report.failed.push((name, e.to_string()));
                }
            }
        }

        // Phase D
        index::store(&self.config.base_dir, &desired)?;
        info!(
            uploaded = report.uploaded,
            downloaded = report.downloaded,
            deleted = report.deleted,
            unchanged = report.unchanged,
            conflicts = report.conflicts,
            failed = report.failed.len(),
            "sync pass complete"
        );
        Ok(report)
    }

    /// Materialize a server entry locally.
    fn download(
        &self,
        remote: &mut dyn RemoteStore,
        server_meta: &FileMeta,
    ) -> Result<Applied, SyncError> {
        let path = self.file_path(&server_meta.filename);
        match &server_meta.state {
            FileState::Tombstone => match fs::remove_file(&path) {
                Ok(()) => Ok(Applied::Deleted),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Applied::Nothing),
                Err(e) => Err(e.into()),
            },
            FileState::Live(digests) => {
                let data = self.fetch_blocks(remote, digests)?;
                fs::write(&path, data)?;
                Ok(Applied::Written)
            }
        }
    }

    /// Fetch and concatenate a file's blocks in digest-list order.
    fn fetch_blocks(
        &self,
        remote: &mut dyn RemoteStore,
        digests: &[BlockDigest],
    ) -> Result<Vec<u8>, SyncError> {
        if digests == [BlockDigest::empty_file()] {
            return Ok(Vec::new());
        }
        let mut data = Vec::new();
        for digest in digests {
            let block = remote.get_block(digest)?;
            let computed = BlockDigest::from_bytes(&block);
            if computed != *digest {
                return Err(SyncError::Protocol(format!(
                    "block digest mismatch: expected {digest}, got {computed}"
                )));
            }
            data.extend_from_slice(&block);
        }
        Ok(data)
    }

    /// Push a local entry: blocks first, then exactly one metadata update.
    ///
    /// Returns the metadata actually pushed, which reflects the file's
    /// content at upload time.
    fn upload(
        &self,
        remote: &mut dyn RemoteStore,
        local_meta: &FileMeta,
    ) -> Result<FileMeta, SyncError> {
        let path = self.file_path(&local_meta.filename);

        // Tombstones (and a file that vanished since the scan) are a pure
        // metadata push.
        if local_meta.is_tombstone() || !path.exists() {
            remote.update_file(local_meta)?;
            return Ok(local_meta.clone());
        }

        // Re-chunk so the pushed digest list matches the bytes we upload,
        // even if the file changed since the scan.
        let blocks = chunker::file_blocks(&path, self.config.block_size)?;
        let digests: Vec<BlockDigest> = if blocks.is_empty() {
            vec![BlockDigest::empty_file()]
        } else {
            blocks.iter().map(chunker::Block::digest).collect()
        };

        if !blocks.is_empty() {
            let mut unique: Vec<BlockDigest> = Vec::new();
            let mut by_digest: HashMap<BlockDigest, &chunker::Block> = HashMap::new();
            for block in &blocks {
                if by_digest.insert(block.digest(), block).is_none() {
                    unique.push(block.digest());
                }
            }

            let present: HashSet<BlockDigest> =
                remote.has_blocks(&unique)?.into_iter().collect();
            for digest in &unique {
                if present.contains(digest) {
                    continue;
                }
                remote.put_block(by_digest[digest].data.clone())?;
            }
        }

        let pushed = FileMeta::live(
            local_meta.filename.clone(),
            local_meta.version,
            digests,
        );
        remote.update_file(&pushed)?;
        Ok(pushed)
    }

    fn file_path(&self, filename: &str) -> PathBuf {
        self.config.base_dir.join(filename)
    }
}

/// Effect a download had on the base directory
enum Applied {
    Written,
    Deleted,
    /// tombstone for a file that was already absent
    Nothing,
}

/// Phase B: fold the scan and the persisted index into the desired-local map.
fn local_diff(
    scanned: &HashMap<String, Vec<BlockDigest>>,
    index_map: &HashMap<String, FileMeta>,
    pinned: &HashSet<String>,
) -> HashMap<String, FileMeta> {
    let mut desired = HashMap::new();

    for (name, digests) in scanned {
        let meta = match index_map.get(name) {
            Some(indexed) if indexed.state == FileState::Live(digests.clone()) => indexed.clone(),
            Some(indexed) => FileMeta::live(name.clone(), indexed.version + 1, digests.clone()),
            None => FileMeta::live(name.clone(), 1, digests.clone()),
        };
        desired.insert(name.clone(), meta);
    }

    for (name, indexed) in index_map {
        if scanned.contains_key(name) {
            continue;
        }
        if pinned.contains(name) {
            // unreadable, not deleted: carry the old entry untouched
            desired.insert(name.clone(), indexed.clone());
            continue;
        }
        let meta = if indexed.is_tombstone() {
            // already recorded; re-deleting must not bump the version
            indexed.clone()
        } else {
            FileMeta::tombstone(name.clone(), indexed.version + 1)
        };
        desired.insert(name.clone(), meta);
    }

    desired
}

/// Server-supplied names get written inside the base directory; reject
/// anything that could escape it or clobber sync bookkeeping.
fn acceptable_remote_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !scan::is_reserved(name)
}

fn revert_entry(
    desired: &mut HashMap<String, FileMeta>,
    index_map: &HashMap<String, FileMeta>,
    name: &str,
) {
    match index_map.get(name) {
        Some(prev) => {
            desired.insert(name.to_string(), prev.clone());
        }
        None => {
            desired.remove(name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digests(content: &[u8]) -> Vec<BlockDigest> {
        vec![BlockDigest::from_bytes(content)]
    }

    #[test]
    fn test_local_diff_new_file() {
        let mut scanned = HashMap::new();
        scanned.insert("a.txt".to_string(), digests(b"hello"));

        let desired = local_diff(&scanned, &HashMap::new(), &HashSet::new());
        assert_eq!(
            desired["a.txt"],
            FileMeta::live("a.txt", 1, digests(b"hello"))
        );
    }

    #[test]
    fn test_local_diff_unchanged_file() {
        let mut scanned = HashMap::new();
        scanned.insert("a.txt".to_string(), digests(b"hello"));
        let mut index_map = HashMap::new();
        index_map.insert(
            "a.txt".to_string(),
            FileMeta::live("a.txt", 4, digests(b"hello")),
        );

        let desired = local_diff(&scanned, &index_map, &HashSet::new());
        assert_eq!(desired["a.txt"].version, 4);
    }

    #[test]
    fn test_local_diff_modified_file() {
        let mut scanned = HashMap::new();
        scanned.insert("a.txt".to_string(), digests(b"new"));
        let mut index_map = HashMap::new();
        index_map.insert(
            "a.txt".to_string(),
            FileMeta::live("a.txt", 4, digests(b"old")),
        );

        let desired = local_diff(&scanned, &index_map, &HashSet::new());
        assert_eq!(
            desired["a.txt"],
            FileMeta::live("a.txt", 5, digests(b"new"))
        );
    }

    #[test]
    fn test_local_diff_deletion_emits_tombstone() {
        let mut index_map = HashMap::new();
        index_map.insert(
            "a.txt".to_string(),
            FileMeta::live("a.txt", 3, digests(b"old")),
        );

        let desired = local_diff(&HashMap::new(), &index_map, &HashSet::new());
        assert_eq!(desired["a.txt"], FileMeta::tombstone("a.txt", 4));
    }

    #[test]
    fn test_local_diff_does_not_rebump_tombstone() {
        let mut index_map = HashMap::new();
        index_map.insert("a.txt".to_string(), FileMeta::tombstone("a.txt", 4));

        let desired = local_diff(&HashMap::new(), &index_map, &HashSet::new());
        assert_eq!(desired["a.txt"], FileMeta::tombstone("a.txt", 4));
    }

    #[test]
    fn test_local_diff_recreated_after_tombstone() {
        let mut scanned = HashMap::new();
        scanned.insert("a.txt".to_string(), digests(b"back"));
        let mut index_map = HashMap::new();
        index_map.insert("a.txt".to_string(), FileMeta::tombstone("a.txt", 4));

        let desired = local_diff(&scanned, &index_map, &HashSet::new());
        assert_eq!(
            desired["a.txt"],
            FileMeta::live("a.txt", 5, digests(b"back"))
        );
    }

    #[test]
    fn test_acceptable_remote_names() {
        assert!(acceptable_remote_name("a.txt"));
        assert!(acceptable_remote_name(".hidden"));
        assert!(!acceptable_remote_name(""));
        assert!(!acceptable_remote_name(".."));
        assert!(!acceptable_remote_name("sub/dir.txt"));
        assert!(!acceptable_remote_name("index.db"));
    }

    #[test]
    fn test_local_diff_pinned_file_kept_verbatim() {
        let mut index_map = HashMap::new();
        index_map.insert(
            "a.txt".to_string(),
            FileMeta::live("a.txt", 3, digests(b"old")),
        );
        let pinned: HashSet<String> = ["a.txt".to_string()].into();

        // unreadable file missing from the scan must not become a tombstone
        let desired = local_diff(&HashMap::new(), &index_map, &pinned);
        assert_eq!(desired["a.txt"].version, 3);
        assert!(!desired["a.txt"].is_tombstone());
    }
}
