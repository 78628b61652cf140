//! Error types for the tree model

use thiserror::Error;

/// Errors raised while validating a parsed document tree
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// The tree root is not a document node
    #[error("Tree root {id} is a {found} block, expected a document")]
    RootNotDocument { id: String, found: String },

    /// A block in the tree has no ID
    #[error("Block without ID under parent {parent}")]
    MissingId { parent: String },

    /// The same block ID appears twice in one tree
    #[error("Duplicate block ID {0}")]
    DuplicateId(String),

    /// Tree identifiers disagree with the root block
    #[error("Tree ID {tree_id} does not match root block {root_id}")]
    RootMismatch { tree_id: String, root_id: String },
}

/// Result type for tree operations
pub type CoreResult<T> = Result<T, CoreError>;
