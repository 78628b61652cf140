//! Block identity index
//!
//! An in-memory map from block ID to the block's structural metadata
//! ([`BlockRecord`]): document root, parent, container, storage path, display
//! path, update marker and type. Lookups are independent of the SQL projection
//! and cost one shard lock.
//!
//! ## Sharding
//!
//! The map is split into 256 shards, each behind its own mutex. A block lives
//! in the shard named by the first byte of the BLAKE3 digest of its ID, so
//! readers and writers of unrelated blocks rarely contend.
//!
//! ## Persistence
//!
//! Shards remember when they last changed. [`BlockTree::save`] writes only
//! dirty shards, one file per shard, and [`BlockTree::open`] loads them back in
//! parallel.

pub mod error;
pub mod persist;
pub mod record;
pub mod store;

pub use error::{BlockTreeError, BlockTreeResult};
pub use persist::SaveStats;
pub use record::BlockRecord;
pub use store::BlockTree;
