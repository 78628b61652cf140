//! Block identity index errors

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BlockTreeError {
    /// Reading or writing a shard file failed
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A shard could not be encoded for saving
    #[error("Failed to encode shard {shard}: {detail}")]
    Encode { shard: String, detail: String },

    /// A shard file failed to decode; the whole on-disk index was discarded
    #[error("Block tree shard {path} is corrupted: {detail}")]
    Corrupted { path: PathBuf, detail: String },

    /// The shard loading pool could not be started
    #[error("Failed to start shard loader: {0}")]
    ThreadPool(String),
}

impl BlockTreeError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the on-disk index must be rebuilt from the tree files
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::Corrupted { .. })
    }
}

pub type BlockTreeResult<T> = Result<T, BlockTreeError>;
