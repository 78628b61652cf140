//! Core types for the Tessera block index
//!
//! This crate holds the pieces every other Tessera crate agrees on:
//!
//! - **Tree model**: [`Tree`], [`Node`] and [`Inline`], the parsed shape of one
//!   document as handed over by the document parser
//! - **Content derivation**: static text, first-leaf text, tags and container
//!   markdown computed from a node ([`content`])
//! - **Fingerprints**: the content hash that decides whether a block row has to
//!   be rewritten ([`hashing`])
//! - **Identifiers**: block ID helpers ([`id`])
//!
//! Nothing in here touches the disk or the database.

pub mod content;
pub mod error;
pub mod hashing;
pub mod id;
pub mod tree;

pub use error::{CoreError, CoreResult};
pub use hashing::{block_fingerprint, ial_string, shard_of, FingerprintContext, SHARD_COUNT};
pub use tree::{BlockVisit, Inline, ListKind, MarkKind, Node, NodeType, Tree};
