//! Read cache sizing

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Total cost budget in bytes of cached rows
    pub max_cost: usize,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_cost: 64 * 1024 * 1024,
            max_entries: 10240,
        }
    }
}
