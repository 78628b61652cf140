//! Error types for the SQLite projection

use rusqlite::ErrorCode;
use thiserror::Error;

/// SQLite projection error type
#[derive(Error, Debug)]
pub enum SqliteError {
    /// Database connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Query execution error
    #[error("Query error: {0}")]
    Query(String),

    /// Schema creation or version error
    #[error("Schema error: {0}")]
    Schema(String),

    /// Entity not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// File system error on database files
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Underlying rusqlite error
    #[error("SQLite error: {0}")]
    Rusqlite(#[from] rusqlite::Error),
}

impl SqliteError {
    /// The database file is damaged and must be rebuilt
    pub fn is_corruption(&self) -> bool {
        match self {
            Self::Rusqlite(err) => {
                matches!(
                    err.sqlite_error_code(),
                    Some(ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase)
                ) || err.to_string().contains("database disk image is malformed")
            }
            _ => false,
        }
    }

    /// Another writer holds the database and the busy timeout ran out
    pub fn is_locked(&self) -> bool {
        match self {
            Self::Rusqlite(err) => {
                matches!(
                    err.sqlite_error_code(),
                    Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
                ) || err.to_string().contains("database is locked")
            }
            _ => false,
        }
    }
}

/// Result type for SQLite operations
pub type SqliteResult<T> = Result<T, SqliteError>;
