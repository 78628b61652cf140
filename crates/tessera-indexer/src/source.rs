//! Access to parsed document trees owned by the host

use parking_lot::RwLock;
use std::collections::HashMap;
use tessera_core::Tree;

/// Loads parsed trees from the document store
///
/// The indexer calls this to reload documents for [`Operation::IndexNode`]
/// and to re-index everything after a rebuild.
///
/// [`Operation::IndexNode`]: crate::Operation::IndexNode
pub trait TreeSource: Send + Sync {
    /// Every document tree in the workspace
    fn list_trees(&self) -> anyhow::Result<Vec<Tree>>;

    /// The tree whose root is `root_id`, or `None` when the document is gone
    fn load_tree(&self, root_id: &str) -> anyhow::Result<Option<Tree>>;
}

/// Tree source backed by a map, for embedding hosts that already hold parsed
/// trees and for tests
#[derive(Debug, Default)]
pub struct MemoryTreeSource {
    trees: RwLock<HashMap<String, Tree>>,
}

impl MemoryTreeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, tree: Tree) {
        self.trees.write().insert(tree.id.clone(), tree);
    }

    pub fn remove(&self, root_id: &str) -> Option<Tree> {
        self.trees.write().remove(root_id)
    }

    pub fn len(&self) -> usize {
        self.trees.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.trees.read().is_empty()
    }
}

impl TreeSource for MemoryTreeSource {
    fn list_trees(&self) -> anyhow::Result<Vec<Tree>> {
        let mut trees: Vec<Tree> = self.trees.read().values().cloned().collect();
        trees.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(trees)
    }

    fn load_tree(&self, root_id: &str) -> anyhow::Result<Option<Tree>> {
        Ok(self.trees.read().get(root_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::Node;

    #[test]
    fn test_memory_source_lists_by_path() {
        let source = MemoryTreeSource::new();
        source.insert(Tree::new("box1", "/b.sy", "/B", Node::document("b", "B")));
        source.insert(Tree::new("box1", "/a.sy", "/A", Node::document("a", "A")));

        let ids: Vec<_> = source.list_trees().unwrap().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(source.load_tree("a").unwrap().is_some());

        source.remove("a");
        assert!(source.load_tree("a").unwrap().is_none());
        assert_eq!(source.len(), 1);
    }
}
