//! Indexing behaviour

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Projection schema version the running engine expects
///
/// Bump whenever a table definition or a derived column changes. A database
/// stamped with any other version is rebuilt from scratch.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    /// Search the case-sensitive full-text table instead of the folded one
    pub case_sensitive: bool,
    /// Append asset link destinations to block content
    pub index_asset_path: bool,
    pub schema_version: u32,
    /// Batches larger than this run with the read cache disabled
    pub large_batch_threshold: usize,
    pub flush_interval_ms: u64,
    /// Workspace data directory; when set, linked asset files are hashed
    pub workspace_dir: Option<PathBuf>,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            case_sensitive: false,
            index_asset_path: true,
            schema_version: SCHEMA_VERSION,
            large_batch_threshold: 128,
            flush_interval_ms: 3000,
            workspace_dir: None,
        }
    }
}
