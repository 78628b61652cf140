//! Block identity index persistence

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockTreeConfig {
    /// Period of the dirty shard save job
    pub save_interval_ms: u64,
    /// Dirty shards touched more recently than this are left for a later save
    pub settle_ms: u64,
    /// Worker threads used to load shard files at startup
    pub load_workers: usize,
}

impl BlockTreeConfig {
    pub fn save_interval(&self) -> Duration {
        Duration::from_millis(self.save_interval_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    /// Load workers clamped to the available CPUs
    pub fn effective_load_workers(&self) -> usize {
        self.load_workers.clamp(1, num_cpus::get().max(1))
    }
}

impl Default for BlockTreeConfig {
    fn default() -> Self {
        Self {
            save_interval_ms: 1000,
            settle_ms: 7000,
            load_workers: 4,
        }
    }
}
