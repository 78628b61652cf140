//! Identity index entry

use serde::{Deserialize, Serialize};
use tessera_core::{BlockVisit, Tree};

/// Structural metadata of one block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub id: String,
    /// Document root; equal to `id` for the root itself
    pub root_id: String,
    /// Empty for document roots
    pub parent_id: String,
    pub container: String,
    pub path: String,
    pub display_path: String,
    /// Opaque version marker taken from the block's `updated` attribute
    pub updated: String,
    /// Type tag (`d`, `p`, `h`, ...)
    pub node_type: String,
}

impl BlockRecord {
    /// Record for a block reached while walking `tree`
    pub fn from_visit(tree: &Tree, visit: &BlockVisit<'_>) -> Self {
        Self {
            id: visit.node.id.clone(),
            root_id: tree.id.clone(),
            parent_id: visit.parent_id().to_string(),
            container: tree.container.clone(),
            path: tree.path.clone(),
            display_path: tree.display_path.clone(),
            updated: visit.node.updated().to_string(),
            node_type: visit.node.node_type.abbr().to_string(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.id == self.root_id
    }

    /// Whether any identity field differs from `other`
    ///
    /// A difference in any of these means the block and its whole subtree have
    /// to be written again.
    pub fn identity_differs(&self, other: &BlockRecord) -> bool {
        self.updated != other.updated
            || self.node_type != other.node_type
            || self.path != other.path
            || self.container != other.container
            || self.display_path != other.display_path
            || self.parent_id != other.parent_id
            || self.root_id != other.root_id
    }
}
