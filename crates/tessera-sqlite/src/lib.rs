//! SQLite projection of the Tessera block index
//!
//! The projection mirrors every indexed block into a structured `blocks` table
//! and into FTS5 shadow tables holding the same rows, plus side tables for
//! spans, assets, attributes and references. It is derived data: a database
//! with the wrong schema version is thrown away and rebuilt from the tree
//! files.
//!
//! ## Writing
//!
//! Writes go through an [`IndexTx`] obtained from [`Projection::begin`]. Each
//! write touches the structured table and the full-text tables with the same
//! statements inside one transaction, and queues its cache changes until
//! [`IndexTx::commit`]. [`IndexTx::upsert_tree`] compares stored content hashes
//! with the hashes of a freshly parsed tree and rewrites only the blocks that
//! changed.
//!
//! ## Reading
//!
//! Queries live on [`Projection`] and use the reader connections. Single block
//! lookups go through the [`BlockCache`].
//!
//! ```rust,ignore
//! let (projection, _state) = Projection::open(&config)?;
//! let stats = projection.write(|tx| tx.upsert_tree(&tree, &blocktree))?;
//! let hits = projection.search("ownership", 20)?;
//! ```

pub mod cache;
pub mod config;
pub mod connection;
pub mod error;
pub mod extract;
pub mod history;
pub mod projection;
mod query;
pub mod row;
pub mod schema;

// Re-exports
pub use cache::{BlockCache, CacheStats};
pub use config::SqliteConfig;
pub use connection::SqlitePool;
pub use error::{SqliteError, SqliteResult};
pub use extract::ExtractOptions;
pub use history::HistoryStore;
pub use projection::{IndexTx, Projection, ProjectionOptions, UpsertStats};
pub use row::{AssetRow, AttributeRow, BlockRow, FileAnnotationRefRow, HistoryRow, RefRow, SpanRow};
pub use schema::SchemaState;
