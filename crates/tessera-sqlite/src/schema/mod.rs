//! Schema creation and version checks
//!
//! The projection is derived data, so there are no migrations: a database
//! stamped with a different schema version is deleted and created again, and
//! the caller re-indexes every document.

use crate::config::SqliteConfig;
use crate::connection::SqlitePool;
use crate::error::{SqliteError, SqliteResult};
use rusqlite::{Connection, OptionalExtension};
use std::io::ErrorKind;
use tracing::{debug, info, warn};

/// `stat` key holding the schema version
pub const SCHEMA_VERSION_KEY: &str = "schema_version";

/// What [`prepare`] found when opening a database
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaState {
    /// Tables were just created in an empty database
    Fresh,
    /// The stored version matches
    Current,
    /// The stored version did not match; the database was recreated
    Rebuilt,
}

/// Column list shared by `blocks` and both full-text tables
pub const BLOCK_COLUMNS: &str = "id, parent_id, root_id, hash, box, path, hpath, name, alias, memo, tag, content, fcontent, markdown, length, type, subtype, ial, sort, created, updated";

/// Open a database and make sure its tables match `version`
///
/// An empty database gets fresh tables. A database stamped with another
/// version, or holding tables without any stamp, is closed, deleted from disk
/// and created again.
pub fn prepare(
    config: SqliteConfig,
    version: u32,
    create: fn(&Connection, u32) -> SqliteResult<()>,
) -> SqliteResult<(SqlitePool, SchemaState)> {
    let pool = SqlitePool::new(config.clone())?;
    let (stored, empty) =
        pool.with_connection_mut(|conn| Ok((stored_version(conn)?, is_empty(conn)?)))?;

    match stored {
        Some(found) if found == version => return Ok((pool, SchemaState::Current)),
        None if empty => {
            pool.with_connection_mut(|conn| create(conn, version))?;
            return Ok((pool, SchemaState::Fresh));
        }
        _ => {}
    }

    warn!(
        path = %config.path.display(),
        found = ?stored,
        expected = version,
        "Schema version mismatch, rebuilding database"
    );
    drop(pool);
    remove_database_files(&config)?;
    let pool = SqlitePool::new(config)?;
    pool.with_connection_mut(|conn| create(conn, version))?;
    Ok((pool, SchemaState::Rebuilt))
}

/// Delete the database file and its WAL/SHM companions
pub fn remove_database_files(config: &SqliteConfig) -> SqliteResult<()> {
    if config.is_memory() {
        return Ok(());
    }
    for file in config.files() {
        match std::fs::remove_file(&file) {
            Ok(()) => debug!(path = %file.display(), "Removed database file"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Read the stored schema version, `None` for a database without tables
pub fn stored_version(conn: &Connection) -> SqliteResult<Option<u32>> {
    let has_stat: bool = conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'stat')",
        [],
        |row| row.get(0),
    )?;
    if !has_stat {
        return Ok(None);
    }

    let raw: Option<String> = conn
        .query_row(
            "SELECT value FROM stat WHERE key = ?1",
            [SCHEMA_VERSION_KEY],
            |row| row.get(0),
        )
        .optional()?;
    Ok(raw.and_then(|v| v.parse().ok()))
}

/// Whether the database holds any user table
pub fn is_empty(conn: &Connection) -> SqliteResult<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'",
        [],
        |row| row.get(0),
    )?;
    Ok(count == 0)
}

/// Create every projection table and stamp the schema version
pub fn create_tables(conn: &Connection, version: u32) -> SqliteResult<()> {
    debug!(version, "Creating projection tables");

    conn.execute_batch(&projection_schema())
        .map_err(|e| SqliteError::Schema(format!("Failed to create projection tables: {}", e)))?;
    conn.execute(
        "INSERT INTO stat (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        rusqlite::params![SCHEMA_VERSION_KEY, version.to_string()],
    )?;

    info!(version, "Projection schema created");
    Ok(())
}

/// Create the history table
pub fn create_history_tables(conn: &Connection, version: u32) -> SqliteResult<()> {
    conn.execute_batch(HISTORY_SCHEMA)
        .map_err(|e| SqliteError::Schema(format!("Failed to create history tables: {}", e)))?;
    conn.execute(
        "INSERT INTO stat (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        rusqlite::params![SCHEMA_VERSION_KEY, version.to_string()],
    )?;
    Ok(())
}

fn projection_schema() -> String {
    let fts_columns = "id UNINDEXED, parent_id UNINDEXED, root_id UNINDEXED, hash UNINDEXED, box UNINDEXED, path UNINDEXED, hpath, name, alias, memo, tag, content, fcontent, markdown UNINDEXED, length UNINDEXED, type UNINDEXED, subtype UNINDEXED, ial, sort UNINDEXED, created UNINDEXED, updated UNINDEXED";
    format!(
        r#"
CREATE TABLE IF NOT EXISTS stat (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT
);

CREATE TABLE IF NOT EXISTS blocks ({block_columns});
CREATE INDEX IF NOT EXISTS idx_blocks_id ON blocks(id);
CREATE INDEX IF NOT EXISTS idx_blocks_parent_id ON blocks(parent_id);
CREATE INDEX IF NOT EXISTS idx_blocks_root_id ON blocks(root_id);
CREATE INDEX IF NOT EXISTS idx_blocks_box_path ON blocks(box, path);

-- Same rows as blocks, matched case-sensitively
CREATE VIRTUAL TABLE IF NOT EXISTS blocks_fts USING fts5({fts_columns}, tokenize="trigram case_sensitive 1");

-- Same rows as blocks, case-folded; only maintained for case-insensitive search
CREATE VIRTUAL TABLE IF NOT EXISTS blocks_fts_case_insensitive USING fts5({fts_columns}, tokenize="trigram case_sensitive 0");

CREATE TABLE IF NOT EXISTS spans (id, block_id, root_id, box, path, content, markdown, type, ial);
CREATE INDEX IF NOT EXISTS idx_spans_root_id ON spans(root_id);
CREATE INDEX IF NOT EXISTS idx_spans_block_id ON spans(block_id);

CREATE TABLE IF NOT EXISTS assets (id, block_id, root_id, box, docpath, path, name, title, hash);
CREATE INDEX IF NOT EXISTS idx_assets_root_id ON assets(root_id);
CREATE INDEX IF NOT EXISTS idx_assets_hash ON assets(hash);

CREATE TABLE IF NOT EXISTS attributes (id, name, value, type, block_id, root_id, box, path);
CREATE INDEX IF NOT EXISTS idx_attributes_block_id ON attributes(block_id);
CREATE INDEX IF NOT EXISTS idx_attributes_root_id ON attributes(root_id);

CREATE TABLE IF NOT EXISTS refs (id, def_block_id, def_block_parent_id, def_block_root_id, def_block_path, block_id, root_id, box, path, content, markdown, type);
CREATE INDEX IF NOT EXISTS idx_refs_def_block_id ON refs(def_block_id);
CREATE INDEX IF NOT EXISTS idx_refs_root_id ON refs(root_id);

CREATE TABLE IF NOT EXISTS file_annotation_refs (id, file_path, annotation_id, block_id, root_id, box, path, content, type);
CREATE INDEX IF NOT EXISTS idx_file_annotation_refs_root_id ON file_annotation_refs(root_id);
"#,
        block_columns = BLOCK_COLUMNS,
        fts_columns = fts_columns,
    )
}

const HISTORY_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS stat (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT
);

CREATE VIRTUAL TABLE IF NOT EXISTS histories_fts USING fts5(id UNINDEXED, type UNINDEXED, op UNINDEXED, title, content, path UNINDEXED, created UNINDEXED, tokenize="trigram case_sensitive 0");
"#;
