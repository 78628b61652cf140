//! SQLite connection configuration

use std::path::{Path, PathBuf};
use tessera_config::DatabaseConfig;

/// Connection settings for one database file
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Database file, or `:memory:`
    pub path: PathBuf,
    pub wal_mode: bool,
    pub busy_timeout_ms: u64,
    /// Page cache per connection in KiB
    pub cache_size_kib: i64,
    /// Writer plus readers
    pub max_connections: usize,
}

impl SqliteConfig {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self::from_database(path, &DatabaseConfig::default())
    }

    /// Settings from the `[database]` config section
    pub fn from_database(path: impl AsRef<Path>, database: &DatabaseConfig) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            wal_mode: database.wal_mode,
            busy_timeout_ms: database.busy_timeout_ms,
            cache_size_kib: database.cache_size_kib,
            max_connections: database.max_connections,
        }
    }

    /// In-memory database for tests; always a single connection
    pub fn memory() -> Self {
        Self {
            path: PathBuf::from(":memory:"),
            wal_mode: false,
            max_connections: 1,
            ..Self::new(":memory:")
        }
    }

    pub fn is_memory(&self) -> bool {
        self.path.to_str() == Some(":memory:")
    }

    /// The database file plus its WAL and shared memory companions
    pub fn files(&self) -> Vec<PathBuf> {
        if self.is_memory() {
            return Vec::new();
        }
        let base = self.path.as_os_str().to_os_string();
        let mut wal = base.clone();
        wal.push("-wal");
        let mut shm = base;
        shm.push("-shm");
        vec![self.path.clone(), PathBuf::from(wal), PathBuf::from(shm)]
    }
}
