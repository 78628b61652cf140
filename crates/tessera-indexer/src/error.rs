//! Error types for the indexer
//!
//! Ordinary failures ([`IndexError`]) are confined to the operation that
//! raised them. A [`FatalError`] means the shared database or block tree can no
//! longer be trusted; it ends the flush loop and is handed to the
//! [`Supervisor`](crate::Supervisor).

use std::fmt;
use tessera_blocktree::BlockTreeError;
use tessera_config::ConfigError;
use tessera_sqlite::SqliteError;
use thiserror::Error;

/// Category of an unrecoverable condition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalKind {
    /// The busy timeout ran out while starting a write transaction
    DatabaseLocked,
    /// A block tree shard file failed to decode
    BlockTreeCorrupted,
    /// SQLite reported a malformed database image
    DatabaseCorrupted,
}

impl FatalKind {
    /// Process exit code a host should use when it terminates on this error
    pub fn exit_code(self) -> i32 {
        match self {
            Self::DatabaseLocked => 20,
            Self::BlockTreeCorrupted => 22,
            Self::DatabaseCorrupted => 23,
        }
    }
}

impl fmt::Display for FatalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::DatabaseLocked => "database locked",
            Self::BlockTreeCorrupted => "block tree corrupted",
            Self::DatabaseCorrupted => "database corrupted",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Fatal index error ({kind}): {detail}")]
pub struct FatalError {
    pub kind: FatalKind,
    pub detail: String,
}

impl FatalError {
    pub fn new(kind: FatalKind, detail: impl fmt::Display) -> Self {
        Self {
            kind,
            detail: detail.to_string(),
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.kind.exit_code()
    }
}

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] SqliteError),

    #[error("Block tree error: {0}")]
    BlockTree(#[from] BlockTreeError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The tree loading collaborator failed
    #[error(transparent)]
    TreeSource(#[from] anyhow::Error),

    #[error(transparent)]
    Fatal(#[from] FatalError),
}

impl IndexError {
    /// Promote storage-level errors that poison the shared state to fatal ones
    pub fn classify(self) -> Self {
        match self {
            Self::Sqlite(e) if e.is_corruption() => {
                Self::Fatal(FatalError::new(FatalKind::DatabaseCorrupted, e))
            }
            Self::Sqlite(e) if e.is_locked() => {
                Self::Fatal(FatalError::new(FatalKind::DatabaseLocked, e))
            }
            Self::BlockTree(e) if e.is_corruption() => {
                Self::Fatal(FatalError::new(FatalKind::BlockTreeCorrupted, e))
            }
            other => other,
        }
    }

    pub fn fatal(&self) -> Option<&FatalError> {
        match self {
            Self::Fatal(fatal) => Some(fatal),
            _ => None,
        }
    }
}

pub type IndexResult<T> = Result<T, IndexError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_stable() {
        assert_eq!(FatalKind::DatabaseLocked.exit_code(), 20);
        assert_eq!(FatalKind::BlockTreeCorrupted.exit_code(), 22);
        assert_eq!(FatalKind::DatabaseCorrupted.exit_code(), 23);
    }

    #[test]
    fn test_classify_promotes_corruption() {
        let corrupt = BlockTreeError::Corrupted {
            path: "blocktree/0a".into(),
            detail: "unexpected end".into(),
        };
        let err = IndexError::from(corrupt).classify();
        assert_eq!(err.fatal().map(|f| f.kind), Some(FatalKind::BlockTreeCorrupted));

        let plain = IndexError::Sqlite(SqliteError::Query("bad column".into())).classify();
        assert!(plain.fatal().is_none());
    }
}
