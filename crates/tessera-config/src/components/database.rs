//! Database connection settings

use serde::{Deserialize, Serialize};

/// Settings shared by the projection and history databases
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Upper bound of open connections (one writer, the rest readers)
    pub max_connections: usize,
    pub busy_timeout_ms: u64,
    /// Page cache per connection in KiB
    pub cache_size_kib: i64,
    pub wal_mode: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            max_connections: 20,
            busy_timeout_ms: 7000,
            cache_size_kib: 20 * 1024,
            wal_mode: true,
        }
    }
}
