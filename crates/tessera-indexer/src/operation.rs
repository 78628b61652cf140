//! Index mutation intents

use std::fmt;
use tessera_core::Tree;
use tessera_sqlite::BlockRow;

/// What an [`Operation`] does, used together with its key to coalesce intents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Index,
    Upsert,
    DeleteByRoot,
    DeleteByIds,
    DeleteByPathPrefix,
    Rename,
    RenameSubtree,
    DeleteContainer,
    InsertRefs,
    UpdateRefs,
    DeleteRefs,
    UpdateBlockContent,
    DeleteAssets,
    IndexNode,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Index => "index",
            Self::Upsert => "upsert",
            Self::DeleteByRoot => "delete_by_root",
            Self::DeleteByIds => "delete_by_ids",
            Self::DeleteByPathPrefix => "delete_by_path_prefix",
            Self::Rename => "rename",
            Self::RenameSubtree => "rename_subtree",
            Self::DeleteContainer => "delete_container",
            Self::InsertRefs => "insert_refs",
            Self::UpdateRefs => "update_refs",
            Self::DeleteRefs => "delete_refs",
            Self::UpdateBlockContent => "update_block_content",
            Self::DeleteAssets => "delete_assets",
            Self::IndexNode => "index_node",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One queued change to the index
#[derive(Debug, Clone)]
pub enum Operation {
    /// Insert every row of a tree without diffing
    Index { tree: Tree },
    /// Diffing upsert of a re-parsed tree
    Upsert { tree: Tree },
    DeleteByRoot { container: String, root_id: String },
    DeleteByIds { root_id: String, ids: Vec<String> },
    DeleteByPathPrefix { container: String, path_prefix: String },
    /// The document's title or display path changed
    Rename { tree: Tree, old_display_path: String },
    /// A folder moved; every display path below it changes
    RenameSubtree {
        container: String,
        old_display_path_prefix: String,
        new_display_path_prefix: String,
    },
    DeleteContainer { container: String },
    InsertRefs { tree: Tree },
    UpdateRefs { tree: Tree },
    DeleteRefs { tree: Tree },
    UpdateBlockContent { block: BlockRow },
    DeleteAssets { hashes: Vec<String> },
    /// Reload the documents holding these blocks and refresh their content
    IndexNode { ids: Vec<String> },
}

impl Operation {
    pub fn action(&self) -> Action {
        match self {
            Self::Index { .. } => Action::Index,
            Self::Upsert { .. } => Action::Upsert,
            Self::DeleteByRoot { .. } => Action::DeleteByRoot,
            Self::DeleteByIds { .. } => Action::DeleteByIds,
            Self::DeleteByPathPrefix { .. } => Action::DeleteByPathPrefix,
            Self::Rename { .. } => Action::Rename,
            Self::RenameSubtree { .. } => Action::RenameSubtree,
            Self::DeleteContainer { .. } => Action::DeleteContainer,
            Self::InsertRefs { .. } => Action::InsertRefs,
            Self::UpdateRefs { .. } => Action::UpdateRefs,
            Self::DeleteRefs { .. } => Action::DeleteRefs,
            Self::UpdateBlockContent { .. } => Action::UpdateBlockContent,
            Self::DeleteAssets { .. } => Action::DeleteAssets,
            Self::IndexNode { .. } => Action::IndexNode,
        }
    }

    /// Coalescing key; two intents with the same action and key are the same intent
    pub fn key(&self) -> String {
        match self {
            Self::Index { tree }
            | Self::Upsert { tree }
            | Self::Rename { tree, .. }
            | Self::InsertRefs { tree }
            | Self::UpdateRefs { tree }
            | Self::DeleteRefs { tree } => tree.id.clone(),
            Self::DeleteByRoot { root_id, .. } | Self::DeleteByIds { root_id, .. } => {
                root_id.clone()
            }
            Self::DeleteByPathPrefix {
                container,
                path_prefix,
            } => format!("{}{}", container, path_prefix),
            Self::RenameSubtree {
                container,
                old_display_path_prefix,
                ..
            } => format!("{}{}", container, old_display_path_prefix),
            Self::DeleteContainer { container } => container.clone(),
            Self::UpdateBlockContent { block } => block.id.clone(),
            Self::DeleteAssets { hashes } => hashes.join(","),
            Self::IndexNode { ids } => ids.join(","),
        }
    }

    pub fn same_intent(&self, other: &Operation) -> bool {
        self.action() == other.action() && self.key() == other.key()
    }

    /// Container whose checksum this operation can change
    pub fn container(&self) -> Option<&str> {
        match self {
            Self::Index { tree }
            | Self::Upsert { tree }
            | Self::Rename { tree, .. }
            | Self::InsertRefs { tree }
            | Self::UpdateRefs { tree }
            | Self::DeleteRefs { tree } => Some(&tree.container),
            Self::DeleteByRoot { container, .. }
            | Self::DeleteByPathPrefix { container, .. }
            | Self::RenameSubtree { container, .. }
            | Self::DeleteContainer { container } => Some(container),
            Self::UpdateBlockContent { block } => Some(&block.container),
            Self::DeleteByIds { .. } | Self::DeleteAssets { .. } | Self::IndexNode { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::Node;

    fn tree(id: &str) -> Tree {
        Tree::new("box1", format!("/{}.sy", id), "/Doc", Node::document(id, "Doc"))
    }

    #[test]
    fn test_keys() {
        let upsert = Operation::Upsert {
            tree: tree("20240101120000-doc0001"),
        };
        assert_eq!(upsert.action(), Action::Upsert);
        assert_eq!(upsert.key(), "20240101120000-doc0001");
        assert_eq!(upsert.container(), Some("box1"));

        let prefix = Operation::DeleteByPathPrefix {
            container: "box1".into(),
            path_prefix: "/folder".into(),
        };
        assert_eq!(prefix.key(), "box1/folder");

        let assets = Operation::DeleteAssets {
            hashes: vec!["a".into(), "b".into()],
        };
        assert_eq!(assets.key(), "a,b");
        assert_eq!(assets.container(), None);
    }

    #[test]
    fn test_same_intent_needs_same_action() {
        let index = Operation::Index {
            tree: tree("20240101120000-doc0001"),
        };
        let upsert = Operation::Upsert {
            tree: tree("20240101120000-doc0001"),
        };
        assert!(!index.same_intent(&upsert));
        assert!(upsert.same_intent(&upsert.clone()));
    }
}
