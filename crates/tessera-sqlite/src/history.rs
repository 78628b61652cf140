//! Full-text index of document history snapshots, kept in its own database

use rusqlite::params;
use tessera_config::IndexConfig;
use tracing::debug;

use crate::config::SqliteConfig;
use crate::connection::SqlitePool;
use crate::error::SqliteResult;
use crate::row::{row_to_history, HistoryRow, SqlRow};
use crate::schema::{self, SchemaState};

pub struct HistoryStore {
    pool: SqlitePool,
}

impl HistoryStore {
    pub fn open(config: &IndexConfig) -> SqliteResult<(Self, SchemaState)> {
        let sqlite = SqliteConfig::from_database(config.history_path(), &config.database);
        let (pool, state) =
            schema::prepare(sqlite, config.index.schema_version, schema::create_history_tables)?;
        Ok((Self { pool }, state))
    }

    pub fn memory() -> SqliteResult<Self> {
        let (pool, _) = schema::prepare(
            SqliteConfig::memory(),
            tessera_config::SCHEMA_VERSION,
            schema::create_history_tables,
        )?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert snapshot rows in one transaction
    pub fn index(&self, rows: &[HistoryRow]) -> SqliteResult<usize> {
        self.pool.with_connection_mut(|conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(&format!(
                    "INSERT INTO {} ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    HistoryRow::TABLE,
                    HistoryRow::COLUMNS.join(", ")
                ))?;
                for row in rows {
                    let mut values = Vec::with_capacity(HistoryRow::COLUMNS.len());
                    row.bind(&mut values);
                    stmt.execute(values.as_slice())?;
                }
            }
            tx.commit()?;
            debug!(count = rows.len(), "Indexed history snapshots");
            Ok(rows.len())
        })
    }

    /// Drop every snapshot stored at or below `prefix`
    pub fn delete_path_prefix(&self, prefix: &str) -> SqliteResult<usize> {
        self.pool.with_connection_mut(|conn| {
            let tx = conn.transaction()?;
            let deleted = tx.execute(
                "DELETE FROM histories_fts WHERE substr(path, 1, length(?1)) = ?1",
                [prefix],
            )?;
            tx.commit()?;
            Ok(deleted)
        })
    }

    /// Snapshots whose title or content contain `keyword`, newest first
    pub fn search(&self, keyword: &str, limit: usize) -> SqliteResult<Vec<HistoryRow>> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Ok(Vec::new());
        }
        self.pool.with_connection(|conn| {
            let phrase = format!("\"{}\"", keyword.replace('"', "\"\""));
            let mut stmt = conn.prepare_cached(
                "SELECT id, type, op, title, content, path, created FROM histories_fts
                 WHERE histories_fts MATCH ?1 ORDER BY created DESC LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(params![phrase, limit as i64], row_to_history)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    pub fn count(&self) -> SqliteResult<usize> {
        self.pool.with_connection(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM histories_fts", [], |row| row.get(0))?;
            Ok(count as usize)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(id: &str, path: &str, content: &str) -> HistoryRow {
        HistoryRow {
            id: id.to_string(),
            history_type: 0,
            op: "update".to_string(),
            title: "Roadmap".to_string(),
            content: content.to_string(),
            path: path.to_string(),
            created: "20240101120000".to_string(),
        }
    }

    #[test]
    fn test_index_search_and_prune() {
        let store = HistoryStore::memory().unwrap();
        store
            .index(&[
                snapshot("20240101120000-his0001", "/2024-01-01-120000-update/a.sy", "quarterly goals"),
                snapshot("20240101120000-his0002", "/2024-01-02-120000-update/a.sy", "weekly notes"),
            ])
            .unwrap();
        assert_eq!(store.count().unwrap(), 2);

        let hits = store.search("GOALS", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "20240101120000-his0001");

        assert_eq!(store.delete_path_prefix("/2024-01-01").unwrap(), 1);
        assert_eq!(store.count().unwrap(), 1);
    }
}
