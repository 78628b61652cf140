//! Configuration sections

mod blocktree;
mod cache;
mod database;
mod index;

pub use blocktree::BlockTreeConfig;
pub use cache::CacheConfig;
pub use database::DatabaseConfig;
pub use index::{IndexSettings, SCHEMA_VERSION};
