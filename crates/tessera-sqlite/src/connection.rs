//! SQLite connection pool management
//!
//! One writer connection plus a small set of reader connections, each behind
//! its own mutex. In WAL mode readers see the last committed state while the
//! writer holds a transaction open. In-memory databases use the writer for
//! everything, since a second connection would open a different database.

use crate::config::SqliteConfig;
use crate::error::{SqliteError, SqliteResult};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::Connection;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Reader connections opened up front, regardless of `max_connections`
const MAX_READERS: usize = 4;

/// Thread-safe SQLite connections for one database file
#[derive(Clone)]
pub struct SqlitePool {
    writer: Arc<Mutex<Connection>>,
    readers: Arc<Vec<Mutex<Connection>>>,
    next_reader: Arc<AtomicUsize>,
    config: SqliteConfig,
}

impl SqlitePool {
    /// Open the writer and reader connections
    pub fn new(config: SqliteConfig) -> SqliteResult<Self> {
        info!(path = ?config.path, "Creating SQLite connections");

        let writer = if config.is_memory() {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = config.path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    SqliteError::Connection(format!("Failed to create directory: {}", e))
                })?;
            }
            Connection::open(&config.path)?
        };
        configure_pragmas(&writer, &config)?;

        let reader_count = if config.is_memory() {
            0
        } else {
            config.max_connections.saturating_sub(1).min(MAX_READERS)
        };
        let mut readers = Vec::with_capacity(reader_count);
        for _ in 0..reader_count {
            let conn = Connection::open(&config.path)?;
            configure_pragmas(&conn, &config)?;
            readers.push(Mutex::new(conn));
        }
        debug!(readers = reader_count, "SQLite connections ready");

        Ok(Self {
            writer: Arc::new(Mutex::new(writer)),
            readers: Arc::new(readers),
            next_reader: Arc::new(AtomicUsize::new(0)),
            config,
        })
    }

    /// Create an in-memory pool for testing
    pub fn memory() -> SqliteResult<Self> {
        Self::new(SqliteConfig::memory())
    }

    pub fn config(&self) -> &SqliteConfig {
        &self.config
    }

    /// Execute a closure with a read connection
    ///
    /// Picks the first idle reader, falling back to round robin when all are
    /// busy.
    pub fn with_connection<F, T>(&self, f: F) -> SqliteResult<T>
    where
        F: FnOnce(&Connection) -> SqliteResult<T>,
    {
        if self.readers.is_empty() {
            let conn = self.writer.lock();
            return f(&conn);
        }
        for reader in self.readers.iter() {
            if let Some(conn) = reader.try_lock() {
                return f(&conn);
            }
        }
        let index = self.next_reader.fetch_add(1, Ordering::Relaxed) % self.readers.len();
        let conn = self.readers[index].lock();
        f(&conn)
    }

    /// Execute a closure with mutable access to the writer connection
    pub fn with_connection_mut<F, T>(&self, f: F) -> SqliteResult<T>
    where
        F: FnOnce(&mut Connection) -> SqliteResult<T>,
    {
        let mut conn = self.writer.lock();
        f(&mut conn)
    }

    /// Hold the writer connection, e.g. for a whole flush pass
    pub fn writer(&self) -> MutexGuard<'_, Connection> {
        self.writer.lock()
    }
}

/// Configure SQLite PRAGMA settings for one connection
fn configure_pragmas(conn: &Connection, config: &SqliteConfig) -> SqliteResult<()> {
    debug!("Configuring SQLite pragmas");

    if config.wal_mode {
        // journal_mode returns a row, so it cannot go through execute
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;
        conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
    }

    conn.busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms))?;

    // Negative cache_size is in KiB
    conn.execute_batch(&format!("PRAGMA cache_size = -{};", config.cache_size_kib))?;
    conn.execute_batch("PRAGMA temp_store = MEMORY;")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_memory_pool() {
        let pool = SqlitePool::memory().expect("Failed to create memory pool");

        pool.with_connection(|conn| {
            let result: i64 = conn.query_row("SELECT 1 + 1", [], |row| row.get(0))?;
            assert_eq!(result, 2);
            Ok(())
        })
        .expect("Query failed");
    }

    #[test]
    fn test_file_pool_uses_wal() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("test.db");

        let pool = SqlitePool::new(SqliteConfig::new(&db_path)).expect("Failed to create pool");

        pool.with_connection(|conn| {
            let mode: String = conn.query_row("PRAGMA journal_mode;", [], |row| row.get(0))?;
            assert_eq!(mode.to_lowercase(), "wal");
            Ok(())
        })
        .expect("Query failed");
    }

    #[test]
    fn test_readers_see_committed_writes() {
        let dir = TempDir::new().unwrap();
        let pool = SqlitePool::new(SqliteConfig::new(dir.path().join("rw.db"))).unwrap();

        pool.with_connection_mut(|conn| {
            conn.execute_batch("CREATE TABLE t (v); INSERT INTO t VALUES (42);")?;
            Ok(())
        })
        .unwrap();

        let value: i64 = pool
            .with_connection(|conn| Ok(conn.query_row("SELECT v FROM t", [], |row| row.get(0))?))
            .unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_readers_do_not_wait_for_the_writer() {
        let dir = TempDir::new().unwrap();
        let pool = SqlitePool::new(SqliteConfig::new(dir.path().join("held.db"))).unwrap();
        pool.with_connection_mut(|conn| {
            conn.execute_batch("CREATE TABLE t (v); INSERT INTO t VALUES (1);")?;
            Ok(())
        })
        .unwrap();

        let mut writer = pool.writer();
        let tx = writer.transaction().unwrap();
        tx.execute("INSERT INTO t VALUES (2)", []).unwrap();

        let count: i64 = pool
            .with_connection(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))?))
            .unwrap();
        assert_eq!(count, 1);
        tx.commit().unwrap();
    }
}
