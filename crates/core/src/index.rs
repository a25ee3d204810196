//! Persisted local index
//!
//! The index mirrors the set of `FileMeta` entries the client last
//! successfully synchronized. It lives inside the base directory as
//! `index.db` and is never itself synced.
//!
//! One row per `(fileName, hashIndex)`:
//!
//! ```text
//! indexes(fileName TEXT, version INT, hashIndex INT, hashValue TEXT)
//! ```
//!
//! The writer fully rewrites the table on every sync; it writes to a temp
//! file and renames over the old index so a crash can never leave a
//! half-written index behind.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::SyncError;
use crate::meta::{FileMeta, FileState};

/// Reserved filename of the persisted index inside the base directory
pub const INDEX_FILENAME: &str = "index.db";

/// Temp name the writer renames from; also skipped by the scanner
pub const INDEX_TMP_FILENAME: &str = "index.db.tmp";

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS indexes (
        fileName TEXT,
        version INT,
        hashIndex INT,
        hashValue TEXT
    )";

const INSERT_ROW: &str =
    "INSERT INTO indexes (fileName, version, hashIndex, hashValue) VALUES (?1, ?2, ?3, ?4)";

const SELECT_ROWS: &str =
    "SELECT fileName, version, hashIndex, hashValue FROM indexes ORDER BY fileName, hashIndex";

/// Path of the index inside a base directory
#[must_use]
pub fn index_path(base_dir: &Path) -> PathBuf {
    base_dir.join(INDEX_FILENAME)
}

fn has_indexes_table(conn: &Connection) -> Result<bool, SyncError> {
    let name: Option<String> = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'indexes'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(name.is_some())
}

/// Load the persisted index, reconstructing each file's metadata by grouping
/// rows by filename and ordering by hash index.
///
/// A missing index is an empty map. The schema carries no uniqueness
/// constraint, so duplicate `(fileName, hashIndex)` rows are tolerated by
/// keeping the first.
///
/// # Errors
/// Returns `SyncError::Index` on database errors and `SyncError::Protocol`
/// on a corrupt block-hash list.
pub fn load(base_dir: &Path) -> Result<HashMap<String, FileMeta>, SyncError> {
    let path = index_path(base_dir);
    if !path.is_file() {
        return Ok(HashMap::new());
    }

    let conn = Connection::open(&path)?;
    if !has_indexes_table(&conn)? {
        return Ok(HashMap::new());
    }

    let mut stmt = conn.prepare(SELECT_ROWS)?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, i32>(1)?,
            row.get::<_, i64>(2)?,
            row.get::<_, String>(3)?,
        ))
    })?;

    let mut grouped: HashMap<String, (i32, Vec<(i64, String)>)> = HashMap::new();
    for row in rows {
        let (filename, version, hash_index, hash_value) = row?;
        let (_, hashes) = grouped.entry(filename).or_insert_with(|| (version, Vec::new()));
        if hashes.iter().any(|(idx, _)| *idx == hash_index) {
            continue;
        }
        hashes.push((hash_index, hash_value));
    }

    let mut metas = HashMap::new();
    for (filename, (version, mut hashes)) in grouped {
        hashes.sort_by_key(|(idx, _)| *idx);
        let list: Vec<String> = hashes.into_iter().map(|(_, h)| h).collect();
        let state = FileState::from_hash_list(&list)?;
        metas.insert(
            filename.clone(),
            FileMeta {
                filename,
                version,
                state,
            },
        );
    }
    Ok(metas)
}

/// Replace the persisted index with `metas`.
///
/// Writes a fresh database under a temp name, commits, then atomically
/// renames it over `index.db`. Durable once this returns.
///
/// # Errors
/// Returns `SyncError::Index` on database errors and `SyncError::Io` if the
/// rename fails.
pub fn store(base_dir: &Path, metas: &HashMap<String, FileMeta>) -> Result<(), SyncError> {
    let tmp_path = base_dir.join(INDEX_TMP_FILENAME);
    let _ = fs::remove_file(&tmp_path);

    {
        let mut conn = Connection::open(&tmp_path)?;
        let tx = conn.transaction()?;
        tx.execute(CREATE_TABLE, [])?;
        for meta in metas.values() {
            for (hash_index, hash_value) in meta.state.to_hash_list().iter().enumerate() {
                tx.execute(
                    INSERT_ROW,
                    params![meta.filename, meta.version, hash_index as i64, hash_value],
                )?;
            }
        }
        tx.commit()?;
    }

    fs::rename(&tmp_path, index_path(base_dir))?;
    Ok(())
}
