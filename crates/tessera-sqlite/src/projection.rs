//! Write side of the projection
//!
//! Every mutation runs inside an [`IndexTx`]. The structured table and the
//! full-text tables are changed by the same statements of the same
//! transaction. Cache changes are collected while the transaction runs and
//! applied only once it commits, so a rollback never leaves the cache ahead of
//! the database.

use rusqlite::types::ToSql;
use rusqlite::{params, params_from_iter, Connection, Params, Transaction, TransactionBehavior};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tessera_blocktree::BlockTree;
use tessera_config::{CacheConfig, IndexConfig, IndexSettings};
use tessera_core::Tree;
use tracing::{debug, info};

use crate::cache::{BlockCache, CacheEffects};
use crate::config::SqliteConfig;
use crate::connection::SqlitePool;
use crate::error::SqliteResult;
use crate::extract::{block_row_by_id, tree_refs, tree_rows, ExtractOptions};
use crate::row::{BlockRow, SqlRow};
use crate::schema::{self, SchemaState};

/// Rows per multi-row `INSERT`
pub const INSERT_CHUNK: usize = 512;

pub(crate) const FTS_TABLE: &str = "blocks_fts";
pub(crate) const FTS_CASE_INSENSITIVE_TABLE: &str = "blocks_fts_case_insensitive";
const BLOCK_TABLES: [&str; 3] = ["blocks", FTS_TABLE, FTS_CASE_INSENSITIVE_TABLE];
const AUX_TABLES: [&str; 5] = ["spans", "assets", "attributes", "refs", "file_annotation_refs"];

/// `stat` key of a container checksum
pub fn checksum_key(container: &str) -> String {
    format!("container_checksum:{}", container)
}

/// Projection behaviour taken from the `[index]` config section
#[derive(Debug, Clone)]
pub struct ProjectionOptions {
    pub case_sensitive: bool,
    pub schema_version: u32,
    pub extract: ExtractOptions,
}

impl ProjectionOptions {
    pub fn from_settings(settings: &IndexSettings) -> Self {
        Self {
            case_sensitive: settings.case_sensitive,
            schema_version: settings.schema_version,
            extract: ExtractOptions {
                index_asset_path: settings.index_asset_path,
                workspace_dir: settings.workspace_dir.clone(),
            },
        }
    }

    /// Tables that receive inserted block rows
    fn insert_tables(&self) -> &'static [&'static str] {
        if self.case_sensitive {
            &BLOCK_TABLES[..2]
        } else {
            &BLOCK_TABLES
        }
    }

    /// Full-text table used for search
    pub fn search_table(&self) -> &'static str {
        if self.case_sensitive {
            FTS_TABLE
        } else {
            FTS_CASE_INSENSITIVE_TABLE
        }
    }
}

impl Default for ProjectionOptions {
    fn default() -> Self {
        Self::from_settings(&IndexSettings::default())
    }
}

/// Outcome of writing a document's blocks
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpsertStats {
    /// IDs of stored blocks that are no longer part of the document
    pub removed: Vec<String>,
    /// Blocks written because they are new or their hash changed
    pub inserted: usize,
    /// Blocks left untouched
    pub unchanged: usize,
}

/// The structured and full-text projection plus its read cache
pub struct Projection {
    pub(crate) pool: SqlitePool,
    pub(crate) cache: Arc<BlockCache>,
    pub(crate) options: Arc<ProjectionOptions>,
}

impl Projection {
    /// Open the projection database under the configured data directory
    pub fn open(config: &IndexConfig) -> SqliteResult<(Self, SchemaState)> {
        Self::open_with(
            SqliteConfig::from_database(config.database_path(), &config.database),
            BlockCache::new(&config.cache),
            ProjectionOptions::from_settings(&config.index),
        )
    }

    pub fn open_with(
        sqlite: SqliteConfig,
        cache: BlockCache,
        options: ProjectionOptions,
    ) -> SqliteResult<(Self, SchemaState)> {
        let (pool, state) = schema::prepare(sqlite, options.schema_version, schema::create_tables)?;
        info!(
            path = %pool.config().path.display(),
            ?state,
            case_sensitive = options.case_sensitive,
            "Projection opened"
        );
        Ok((
            Self {
                pool,
                cache: Arc::new(cache),
                options: Arc::new(options),
            },
            state,
        ))
    }

    /// In-memory projection for tests
    pub fn memory(options: ProjectionOptions) -> SqliteResult<Self> {
        let cache = BlockCache::new(&CacheConfig::default());
        Self::open_with(SqliteConfig::memory(), cache, options).map(|(projection, _)| projection)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn cache(&self) -> &BlockCache {
        &self.cache
    }

    pub fn options(&self) -> &ProjectionOptions {
        &self.options
    }

    /// Start an immediate transaction on `conn`, normally the held writer
    pub fn begin<'c>(&self, conn: &'c mut Connection) -> SqliteResult<IndexTx<'c>> {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        Ok(IndexTx {
            tx,
            options: Arc::clone(&self.options),
            cache: Arc::clone(&self.cache),
            effects: CacheEffects::default(),
        })
    }

    /// Run `f` in its own transaction on the writer connection
    pub fn write<T>(&self, f: impl FnOnce(&mut IndexTx<'_>) -> SqliteResult<T>) -> SqliteResult<T> {
        let mut conn = self.pool.writer();
        let mut tx = self.begin(&mut conn)?;
        let out = f(&mut tx)?;
        tx.commit()?;
        Ok(out)
    }

    /// Delete the database files; the projection must not be used afterwards
    pub fn remove_files(&self) -> SqliteResult<()> {
        self.cache.clear();
        schema::remove_database_files(self.pool.config())
    }
}

/// One write transaction against the projection
pub struct IndexTx<'c> {
    tx: Transaction<'c>,
    options: Arc<ProjectionOptions>,
    cache: Arc<BlockCache>,
    effects: CacheEffects,
}

impl IndexTx<'_> {
    pub fn connection(&self) -> &Connection {
        &self.tx
    }

    /// Commit, then bring the read cache in line
    pub fn commit(self) -> SqliteResult<()> {
        let IndexTx {
            tx, cache, effects, ..
        } = self;
        tx.commit()?;
        effects.apply(&cache);
        Ok(())
    }

    /// Roll back and forget the pending cache changes
    pub fn rollback(self) -> SqliteResult<()> {
        self.tx.rollback()?;
        Ok(())
    }

    /// Stored content hash of every block of a document
    pub fn block_hashes(&self, root_id: &str) -> SqliteResult<HashMap<String, String>> {
        block_hashes(&self.tx, root_id)
    }

    /// Write every row of a tree, replacing whatever the document had stored
    pub fn index_tree(&mut self, tree: &Tree, blocktree: &BlockTree) -> SqliteResult<UpsertStats> {
        let rows = tree_rows(tree, &self.options.extract);
        let refs = tree_refs(tree, blocktree);

        let old = select_ids(&self.tx, "SELECT id FROM blocks WHERE root_id = ?1", [&tree.id])?;
        let current: HashSet<&str> = rows.blocks.iter().map(|r| r.id.as_str()).collect();
        let removed: Vec<String> = old
            .iter()
            .filter(|id| !current.contains(id.as_str()))
            .cloned()
            .collect();
        let ids: Vec<String> = rows.blocks.iter().map(|r| r.id.clone()).collect();
        for table in BLOCK_TABLES {
            self.tx.execute(
                &format!("DELETE FROM {} WHERE root_id = ?1", table),
                [&tree.id],
            )?;
            delete_in(&self.tx, table, "id", &ids)?;
        }
        for table in AUX_TABLES {
            self.tx.execute(
                &format!("DELETE FROM {} WHERE root_id = ?1", table),
                [&tree.id],
            )?;
        }

        self.insert_blocks(&rows.blocks)?;
        insert_rows(&self.tx, &rows.spans)?;
        insert_rows(&self.tx, &rows.assets)?;
        insert_rows(&self.tx, &rows.attributes)?;
        insert_rows(&self.tx, &refs.refs)?;
        insert_rows(&self.tx, &refs.file_annotation_refs)?;

        let stats = UpsertStats {
            removed,
            inserted: rows.blocks.len(),
            unchanged: 0,
        };
        self.effects.remove.extend(old);
        self.effects.clear_refs = true;
        self.effects.put.extend(rows.blocks);
        debug!(root_id = %tree.id, blocks = stats.inserted, replaced = stats.removed.len(), "Indexed tree");
        Ok(stats)
    }

    /// Reconcile the stored rows of a document with a freshly parsed tree
    ///
    /// Blocks whose content hash is unchanged keep their rows. Removed and
    /// changed blocks are deleted, then changed and new blocks are inserted.
    /// Spans, assets, attributes and references of the document are rebuilt
    /// in full.
    pub fn upsert_tree(&mut self, tree: &Tree, blocktree: &BlockTree) -> SqliteResult<UpsertStats> {
        let old = block_hashes(&self.tx, &tree.id)?;
        let rows = tree_rows(tree, &self.options.extract);

        let removed: Vec<String> = {
            let current: HashSet<&str> = rows.blocks.iter().map(|r| r.id.as_str()).collect();
            old.keys()
                .filter(|id| !current.contains(id.as_str()))
                .cloned()
                .collect()
        };
        let (changed, unchanged): (Vec<BlockRow>, Vec<BlockRow>) = rows
            .blocks
            .into_iter()
            .partition(|row| old.get(&row.id) != Some(&row.hash));

        let mut to_delete = removed.clone();
        to_delete.extend(changed.iter().map(|row| row.id.clone()));
        for table in BLOCK_TABLES {
            delete_in(&self.tx, table, "id", &to_delete)?;
        }
        for table in AUX_TABLES {
            self.tx.execute(
                &format!("DELETE FROM {} WHERE root_id = ?1", table),
                [&tree.id],
            )?;
        }

        let refs = tree_refs(tree, blocktree);
        self.insert_blocks(&changed)?;
        insert_rows(&self.tx, &refs.refs)?;
        insert_rows(&self.tx, &refs.file_annotation_refs)?;
        insert_rows(&self.tx, &rows.spans)?;
        insert_rows(&self.tx, &rows.assets)?;
        insert_rows(&self.tx, &rows.attributes)?;

        let stats = UpsertStats {
            removed,
            inserted: changed.len(),
            unchanged: unchanged.len(),
        };
        self.effects.remove.extend(to_delete);
        self.effects.put.extend(changed);
        self.effects.clear_refs = true;
        debug!(
            root_id = %tree.id,
            removed = stats.removed.len(),
            inserted = stats.inserted,
            unchanged = stats.unchanged,
            "Upserted tree"
        );
        Ok(stats)
    }

    /// Delete every row of a document
    pub fn delete_by_root(&mut self, root_id: &str) -> SqliteResult<usize> {
        let ids = select_ids(&self.tx, "SELECT id FROM blocks WHERE root_id = ?1", [root_id])?;
        for table in BLOCK_TABLES.iter().chain(AUX_TABLES.iter()) {
            self.tx.execute(
                &format!("DELETE FROM {} WHERE root_id = ?1", table),
                [root_id],
            )?;
        }
        let count = ids.len();
        self.effects.remove.extend(ids);
        self.effects.clear_refs = true;
        Ok(count)
    }

    /// Delete single blocks and the rows that hang off them
    pub fn delete_by_ids(&mut self, ids: &[String]) -> SqliteResult<usize> {
        let count = delete_in(&self.tx, "blocks", "id", ids)?;
        for table in &BLOCK_TABLES[1..] {
            delete_in(&self.tx, table, "id", ids)?;
        }
        for table in AUX_TABLES {
            delete_in(&self.tx, table, "block_id", ids)?;
        }
        self.effects.remove.extend(ids.iter().cloned());
        self.effects.clear_refs = true;
        Ok(count)
    }

    /// Delete every document stored at or below `prefix` in a container
    pub fn delete_by_path_prefix(&mut self, container: &str, prefix: &str) -> SqliteResult<usize> {
        let ids = select_ids(
            &self.tx,
            "SELECT id FROM blocks WHERE box = ?1 AND substr(path, 1, length(?2)) = ?2",
            params![container, prefix],
        )?;
        for table in BLOCK_TABLES.iter().chain(AUX_TABLES.iter()) {
            let column = if *table == "assets" { "docpath" } else { "path" };
            self.tx.execute(
                &format!(
                    "DELETE FROM {table} WHERE box = ?1 AND substr({column}, 1, length(?2)) = ?2"
                ),
                params![container, prefix],
            )?;
        }
        let count = ids.len();
        self.effects.remove.extend(ids);
        self.effects.clear_refs = true;
        Ok(count)
    }

    /// Delete everything a container contributed, including its checksum
    pub fn delete_container(&mut self, container: &str) -> SqliteResult<usize> {
        let count = self
            .tx
            .execute("DELETE FROM blocks WHERE box = ?1", [container])?;
        for table in BLOCK_TABLES[1..].iter().chain(AUX_TABLES.iter()) {
            self.tx
                .execute(&format!("DELETE FROM {} WHERE box = ?1", table), [container])?;
        }
        self.tx
            .execute("DELETE FROM stat WHERE key = ?1", [checksum_key(container)])?;
        self.effects.clear = true;
        Ok(count)
    }

    /// Apply a document rename: new display path and title on its rows
    pub fn rename(&mut self, tree: &Tree, old_display_path: &str) -> SqliteResult<usize> {
        let mut count = 0;
        for (i, table) in BLOCK_TABLES.iter().enumerate() {
            let changed = self.tx.execute(
                &format!(
                    "UPDATE {} SET hpath = ?1 WHERE box = ?2 AND root_id = ?3 AND hpath = ?4",
                    table
                ),
                params![tree.display_path, tree.container, tree.id, old_display_path],
            )?;
            if i == 0 {
                count = changed;
            }
        }
        self.update_root_content(tree)?;

        let ids = select_ids(&self.tx, "SELECT id FROM blocks WHERE root_id = ?1", [&tree.id])?;
        self.effects.remove.extend(ids);
        Ok(count)
    }

    fn update_root_content(&self, tree: &Tree) -> SqliteResult<()> {
        let title = tree.title();
        let length = tessera_core::content::content_length(title);
        for table in BLOCK_TABLES {
            self.tx.execute(
                &format!(
                    "UPDATE {} SET content = ?1, fcontent = ?1, length = ?2, updated = ?3 WHERE id = ?4",
                    table
                ),
                params![title, length, tree.root.updated(), tree.id],
            )?;
        }
        Ok(())
    }

    /// Rewrite the display path of every row shown at or below `old`
    pub fn rename_subtree(&mut self, container: &str, old: &str, new: &str) -> SqliteResult<usize> {
        let mut count = 0;
        for (i, table) in BLOCK_TABLES.iter().enumerate() {
            let changed = self.tx.execute(
                &format!(
                    "UPDATE {} SET hpath = ?3 || substr(hpath, length(?2) + 1)
                     WHERE box = ?1 AND (hpath = ?2 OR substr(hpath, 1, length(?2) + 1) = ?2 || '/')",
                    table
                ),
                params![container, old, new],
            )?;
            if i == 0 {
                count = changed;
            }
        }
        self.effects.clear = true;
        Ok(count)
    }

    /// Insert the references a tree makes
    pub fn insert_refs(&mut self, tree: &Tree, blocktree: &BlockTree) -> SqliteResult<usize> {
        let refs = tree_refs(tree, blocktree);
        let count = insert_rows(&self.tx, &refs.refs)?
            + insert_rows(&self.tx, &refs.file_annotation_refs)?;
        self.effects.clear_refs = true;
        Ok(count)
    }

    /// Delete the references a document makes
    pub fn delete_refs(&mut self, root_id: &str) -> SqliteResult<usize> {
        let count = self
            .tx
            .execute("DELETE FROM refs WHERE root_id = ?1", [root_id])?
            + self
                .tx
                .execute("DELETE FROM file_annotation_refs WHERE root_id = ?1", [root_id])?;
        self.effects.clear_refs = true;
        Ok(count)
    }

    /// Replace the references a document makes
    pub fn update_refs(&mut self, tree: &Tree, blocktree: &BlockTree) -> SqliteResult<usize> {
        self.delete_refs(&tree.id)?;
        self.insert_refs(tree, blocktree)
    }

    /// Overwrite the text columns of one block in every table and the cache
    ///
    /// Returns false when no row with that ID exists.
    pub fn update_block_content(&mut self, row: &BlockRow) -> SqliteResult<bool> {
        let mut found = false;
        for (i, table) in BLOCK_TABLES.iter().enumerate() {
            let changed = self.tx.execute(
                &format!(
                    "UPDATE {} SET content = ?1, fcontent = ?2, markdown = ?3, length = ?4, tag = ?5, updated = ?6 WHERE id = ?7",
                    table
                ),
                params![
                    row.content,
                    row.fcontent,
                    row.markdown,
                    row.length,
                    row.tag,
                    row.updated,
                    row.id
                ],
            )?;
            if i == 0 {
                found = changed > 0;
            }
        }
        if found {
            self.effects.remove.push(row.id.clone());
            self.effects.put.push(row.clone());
        }
        Ok(found)
    }

    /// Re-derive one block from its tree and overwrite its content
    pub fn refresh_block(&mut self, tree: &Tree, id: &str) -> SqliteResult<bool> {
        match block_row_by_id(tree, id, &self.options.extract) {
            Some(row) => self.update_block_content(&row),
            None => Ok(false),
        }
    }

    /// Delete asset rows by file hash
    pub fn delete_assets(&mut self, hashes: &[String]) -> SqliteResult<usize> {
        delete_in(&self.tx, "assets", "hash", hashes)
    }

    /// Recompute and store the checksum over a container's document hashes
    pub fn update_container_checksum(&mut self, container: &str) -> SqliteResult<String> {
        let checksum = {
            let mut stmt = self.tx.prepare_cached(
                "SELECT hash FROM blocks WHERE type = 'd' AND box = ?1 ORDER BY id DESC",
            )?;
            let mut rows = stmt.query([container])?;
            let mut hasher = blake3::Hasher::new();
            while let Some(row) = rows.next()? {
                let hash: String = row.get(0)?;
                hasher.update(hash.as_bytes());
            }
            hasher.finalize().to_hex().to_string()
        };
        self.tx.execute(
            "INSERT INTO stat (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![checksum_key(container), checksum],
        )?;
        Ok(checksum)
    }

    fn insert_blocks(&self, rows: &[BlockRow]) -> SqliteResult<()> {
        for table in self.options.insert_tables() {
            insert_rows_into(&self.tx, table, rows)?;
        }
        Ok(())
    }
}

pub(crate) fn block_hashes(conn: &Connection, root_id: &str) -> SqliteResult<HashMap<String, String>> {
    let mut stmt = conn.prepare_cached("SELECT id, hash FROM blocks WHERE root_id = ?1")?;
    let hashes = stmt
        .query_map([root_id], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<HashMap<String, String>>>()?;
    Ok(hashes)
}

fn select_ids<P: Params>(conn: &Connection, sql: &str, params: P) -> SqliteResult<Vec<String>> {
    let mut stmt = conn.prepare_cached(sql)?;
    let ids = stmt
        .query_map(params, |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(ids)
}

pub(crate) fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

/// `DELETE FROM table WHERE column IN (...)`, chunked
fn delete_in(conn: &Connection, table: &str, column: &str, values: &[String]) -> SqliteResult<usize> {
    let mut deleted = 0;
    for chunk in values.chunks(INSERT_CHUNK) {
        let sql = format!(
            "DELETE FROM {} WHERE {} IN ({})",
            table,
            column,
            placeholders(chunk.len())
        );
        deleted += conn.execute(&sql, params_from_iter(chunk.iter()))?;
    }
    Ok(deleted)
}

fn insert_rows<R: SqlRow>(conn: &Connection, rows: &[R]) -> SqliteResult<usize> {
    insert_rows_into(conn, R::TABLE, rows)
}

/// Multi-row `INSERT ... VALUES (...), (...)` in chunks of [`INSERT_CHUNK`]
fn insert_rows_into<R: SqlRow>(conn: &Connection, table: &str, rows: &[R]) -> SqliteResult<usize> {
    if rows.is_empty() {
        return Ok(0);
    }
    let columns = R::COLUMNS.join(", ");
    let tuple = format!("({})", placeholders(R::COLUMNS.len()));

    for chunk in rows.chunks(INSERT_CHUNK) {
        let sql = format!(
            "INSERT INTO {} ({}) VALUES {}",
            table,
            columns,
            vec![tuple.as_str(); chunk.len()].join(", ")
        );
        let mut values: Vec<&dyn ToSql> = Vec::with_capacity(chunk.len() * R::COLUMNS.len());
        for row in chunk {
            row.bind(&mut values);
        }
        conn.prepare_cached(&sql)?.execute(values.as_slice())?;
    }
    Ok(rows.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::{Inline, Node};

    fn tree(para_text: &str) -> Tree {
        let root = Node::document("20240101120000-doc0001", "Doc")
            .with_attr("updated", "1")
            .with_child(Node::paragraph("20240101120001-para001", "alpha"))
            .with_child(Node::paragraph("20240101120002-para002", para_text))
            .with_child(Node::paragraph("20240101120003-para003", "gamma"));
        Tree::new("box1", "/20240101120000-doc0001.sy", "/Doc", root)
    }

    fn count(projection: &Projection, sql: &str) -> i64 {
        projection
            .pool()
            .with_connection(|conn| Ok(conn.query_row(sql, [], |row| row.get(0))?))
            .unwrap()
    }

    #[test]
    fn test_index_then_upsert_unchanged_writes_nothing() {
        let projection = Projection::memory(ProjectionOptions::default()).unwrap();
        let blocktree = BlockTree::memory();
        let t = tree("beta");
        blocktree.index(&t);

        assert_eq!(projection.write(|tx| tx.index_tree(&t, &blocktree)).unwrap().inserted, 4);
        let stats = projection.write(|tx| tx.upsert_tree(&t, &blocktree)).unwrap();
        assert_eq!(
            stats,
            UpsertStats {
                removed: Vec::new(),
                inserted: 0,
                unchanged: 4
            }
        );
        assert_eq!(count(&projection, "SELECT COUNT(*) FROM blocks"), 4);
        assert_eq!(count(&projection, "SELECT COUNT(*) FROM blocks_fts"), 4);
        assert_eq!(
            count(&projection, "SELECT COUNT(*) FROM blocks_fts_case_insensitive"),
            4
        );
    }

    #[test]
    fn test_upsert_rewrites_only_changed_block() {
        let projection = Projection::memory(ProjectionOptions::default()).unwrap();
        let blocktree = BlockTree::memory();
        projection
            .write(|tx| tx.upsert_tree(&tree("beta"), &blocktree))
            .unwrap();
        let before = projection.write(|tx| tx.block_hashes("20240101120000-doc0001")).unwrap();

        let stats = projection
            .write(|tx| tx.upsert_tree(&tree("beta edited"), &blocktree))
            .unwrap();
        assert_eq!(stats.inserted, 1);
        assert_eq!(stats.unchanged, 3);

        let after = projection.write(|tx| tx.block_hashes("20240101120000-doc0001")).unwrap();
        assert_eq!(before["20240101120001-para001"], after["20240101120001-para001"]);
        assert_ne!(before["20240101120002-para002"], after["20240101120002-para002"]);
    }

    #[test]
    fn test_removed_block_is_deleted_everywhere() {
        let projection = Projection::memory(ProjectionOptions::default()).unwrap();
        let blocktree = BlockTree::memory();
        let mut t = tree("beta");
        projection.write(|tx| tx.upsert_tree(&t, &blocktree)).unwrap();

        t.root.children.pop();
        let stats = projection.write(|tx| tx.upsert_tree(&t, &blocktree)).unwrap();
        assert_eq!(stats.removed, vec!["20240101120003-para003".to_string()]);
        assert_eq!(
            count(
                &projection,
                "SELECT COUNT(*) FROM blocks_fts WHERE id = '20240101120003-para003'"
            ),
            0
        );
    }

    #[test]
    fn test_index_twice_replaces_rows() {
        let projection = Projection::memory(ProjectionOptions::default()).unwrap();
        let blocktree = BlockTree::memory();
        projection
            .write(|tx| tx.index_tree(&tree("beta"), &blocktree))
            .unwrap();

        let mut t = tree("beta edited");
        t.root.children.pop();
        let stats = projection.write(|tx| tx.index_tree(&t, &blocktree)).unwrap();
        assert_eq!(stats.inserted, 3);
        assert_eq!(stats.removed, vec!["20240101120003-para003".to_string()]);
        for table in ["blocks", "blocks_fts", "blocks_fts_case_insensitive"] {
            assert_eq!(count(&projection, &format!("SELECT COUNT(*) FROM {}", table)), 3);
        }
        assert_eq!(
            projection.get_block("20240101120002-para002").unwrap().unwrap().content,
            "beta edited"
        );
    }

    #[test]
    fn test_case_sensitive_skips_folded_table() {
        let options = ProjectionOptions {
            case_sensitive: true,
            ..ProjectionOptions::default()
        };
        let projection = Projection::memory(options).unwrap();
        projection
            .write(|tx| tx.index_tree(&tree("beta"), &BlockTree::memory()))
            .unwrap();
        assert_eq!(count(&projection, "SELECT COUNT(*) FROM blocks_fts"), 4);
        assert_eq!(
            count(&projection, "SELECT COUNT(*) FROM blocks_fts_case_insensitive"),
            0
        );
    }

    #[test]
    fn test_rollback_leaves_cache_untouched() {
        let projection = Projection::memory(ProjectionOptions::default()).unwrap();
        let blocktree = BlockTree::memory();
        {
            let mut conn = projection.pool().writer();
            let mut tx = projection.begin(&mut conn).unwrap();
            tx.index_tree(&tree("beta"), &blocktree).unwrap();
            tx.rollback().unwrap();
        }
        assert_eq!(projection.cache().stats().entries, 0);
        assert_eq!(count(&projection, "SELECT COUNT(*) FROM blocks"), 0);
    }

    #[test]
    fn test_rename_and_rename_subtree() {
        let projection = Projection::memory(ProjectionOptions::default()).unwrap();
        let blocktree = BlockTree::memory();
        let mut t = tree("beta");
        t.display_path = "/Folder/Doc".to_string();
        projection.write(|tx| tx.index_tree(&t, &blocktree)).unwrap();

        t.display_path = "/Folder/Renamed".to_string();
        t.root.set_attr("title", "Renamed");
        t.root.set_attr("updated", "2");
        let renamed = projection.write(|tx| tx.rename(&t, "/Folder/Doc")).unwrap();
        assert_eq!(renamed, 4);
        assert_eq!(
            count(
                &projection,
                "SELECT COUNT(*) FROM blocks WHERE content = 'Renamed' AND fcontent = 'Renamed'"
            ),
            1
        );

        let moved = projection
            .write(|tx| tx.rename_subtree("box1", "/Folder", "/Archive"))
            .unwrap();
        assert_eq!(moved, 4);
        assert_eq!(
            count(
                &projection,
                "SELECT COUNT(*) FROM blocks_fts WHERE hpath = '/Archive/Renamed'"
            ),
            4
        );
        // A sibling prefix is not a parent folder
        assert_eq!(
            projection
                .write(|tx| tx.rename_subtree("box1", "/Arch", "/X"))
                .unwrap(),
            0
        );
    }

    #[test]
    fn test_chunked_insert_over_limit() {
        let projection = Projection::memory(ProjectionOptions::default()).unwrap();
        let children = (0..INSERT_CHUNK + 10)
            .map(|i| Node::new(format!("20240101120000-p{:06}", i), tessera_core::NodeType::Paragraph)
                .with_inline(Inline::text(format!("row {}", i))));
        let root = Node::document("20240101120000-doc0001", "Big").with_children(children);
        let t = Tree::new("box1", "/big.sy", "/Big", root);

        let stats = projection
            .write(|tx| tx.index_tree(&t, &BlockTree::memory()))
            .unwrap();
        assert_eq!(stats.inserted, INSERT_CHUNK + 11);
        assert_eq!(
            count(&projection, "SELECT COUNT(*) FROM blocks"),
            (INSERT_CHUNK + 11) as i64
        );
    }

    #[test]
    fn test_container_checksum_changes_with_documents() {
        let projection = Projection::memory(ProjectionOptions::default()).unwrap();
        let blocktree = BlockTree::memory();
        let empty = projection
            .write(|tx| tx.update_container_checksum("box1"))
            .unwrap();
        projection
            .write(|tx| tx.index_tree(&tree("beta"), &blocktree))
            .unwrap();
        let filled = projection
            .write(|tx| tx.update_container_checksum("box1"))
            .unwrap();
        assert_ne!(empty, filled);

        projection.write(|tx| tx.delete_container("box1")).unwrap();
        assert_eq!(count(&projection, "SELECT COUNT(*) FROM stat WHERE key LIKE 'container_checksum:%'"), 0);
    }
}
