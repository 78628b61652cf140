//! Sharded in-memory map from block ID to [`BlockRecord`]

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tessera_core::hashing::{shard_of, SHARD_COUNT};
use tessera_core::Tree;
use tracing::debug;

use crate::record::BlockRecord;

pub(crate) struct Shard {
    pub(crate) blocks: HashMap<String, BlockRecord>,
    /// Time of the last change not yet written to disk, `None` when clean
    pub(crate) changed_at: Option<Instant>,
}

impl Shard {
    fn new() -> Self {
        Self {
            blocks: HashMap::new(),
            changed_at: None,
        }
    }

    fn touch(&mut self) {
        self.changed_at = Some(Instant::now());
    }
}

/// Block identity index
///
/// 256 independently locked shards, selected by the first byte of the BLAKE3
/// digest of the block ID. Every ID maps to exactly one shard, so lookups never
/// need to look anywhere else.
pub struct BlockTree {
    pub(crate) shards: Vec<Mutex<Shard>>,
    /// Shard file directory, `None` for an index that is never persisted
    pub(crate) dir: Option<PathBuf>,
    pub(crate) settle: Duration,
}

impl BlockTree {
    /// Empty index without persistence
    pub fn memory() -> Self {
        Self::with_dir(None, Duration::ZERO)
    }

    pub(crate) fn with_dir(dir: Option<PathBuf>, settle: Duration) -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(Shard::new())).collect(),
            dir,
            settle,
        }
    }

    fn shard(&self, id: &str) -> &Mutex<Shard> {
        &self.shards[shard_of(id)]
    }

    pub fn get(&self, id: &str) -> Option<BlockRecord> {
        self.shard(id).lock().blocks.get(id).cloned()
    }

    /// Look up several IDs, locking each touched shard once
    pub fn get_many<'a>(&self, ids: impl IntoIterator<Item = &'a str>) -> HashMap<String, BlockRecord> {
        let mut by_shard: HashMap<usize, Vec<&str>> = HashMap::new();
        for id in ids {
            by_shard.entry(shard_of(id)).or_default().push(id);
        }

        let mut found = HashMap::new();
        for (shard, ids) in by_shard {
            let guard = self.shards[shard].lock();
            for id in ids {
                if let Some(record) = guard.blocks.get(id) {
                    found.insert(id.to_string(), record.clone());
                }
            }
        }
        found
    }

    /// Insert or replace a single record
    pub fn put(&self, record: BlockRecord) {
        let mut shard = self.shard(&record.id).lock();
        shard.blocks.insert(record.id.clone(), record);
        shard.touch();
    }

    /// Bring the index in line with a freshly parsed tree
    ///
    /// A block whose record is missing or whose identity fields changed is
    /// written together with its whole subtree, since moving a subtree changes
    /// the location of every descendant. Returns the number of records written.
    pub fn index(&self, tree: &Tree) -> usize {
        let visits = tree.blocks();
        let existing = self.get_many(visits.iter().map(|v| v.node.id.as_str()));

        // Pre-order walk: a parent is always decided before its children.
        let mut stale: HashSet<&str> = HashSet::new();
        let mut writes: HashMap<usize, Vec<BlockRecord>> = HashMap::new();
        let mut written = 0;
        for visit in &visits {
            let record = BlockRecord::from_visit(tree, visit);
            let parent_stale = visit
                .parent
                .map(|parent| stale.contains(parent.id.as_str()))
                .unwrap_or(false);
            let changed = parent_stale
                || match existing.get(&record.id) {
                    Some(old) => old.identity_differs(&record),
                    None => true,
                };
            if changed {
                stale.insert(visit.node.id.as_str());
                writes.entry(shard_of(&record.id)).or_default().push(record);
                written += 1;
            }
        }

        for (shard, records) in writes {
            let mut guard = self.shards[shard].lock();
            for record in records {
                guard.blocks.insert(record.id.clone(), record);
            }
            guard.touch();
        }

        debug!(root_id = %tree.id, written, total = visits.len(), "Indexed block tree");
        written
    }

    /// Rewrite only the root record of a moved or renamed document
    pub fn set_root_path(&self, tree: &Tree) {
        let mut shard = self.shard(&tree.id).lock();
        if let Some(record) = shard.blocks.get_mut(&tree.id) {
            record.path = tree.path.clone();
            record.display_path = tree.display_path.clone();
            record.updated = tree.root.updated().to_string();
            shard.touch();
        }
    }

    pub fn remove(&self, id: &str) -> Option<BlockRecord> {
        let mut shard = self.shard(id).lock();
        let removed = shard.blocks.remove(id);
        if removed.is_some() {
            shard.touch();
        }
        removed
    }

    /// Remove every record of a document
    pub fn remove_by_root(&self, root_id: &str) -> Vec<String> {
        self.remove_where(|record| record.root_id == root_id)
    }

    /// Remove every record of a container
    pub fn remove_by_container(&self, container: &str) -> Vec<String> {
        self.remove_where(|record| record.container == container)
    }

    /// Remove every record stored at or below `prefix` in a container
    pub fn remove_by_path_prefix(&self, container: &str, prefix: &str) -> Vec<String> {
        self.remove_where(|record| record.container == container && record.path.starts_with(prefix))
    }

    /// Remove every record of the document stored at exactly `path`
    pub fn remove_by_path(&self, container: &str, path: &str) -> Vec<String> {
        self.remove_where(|record| record.container == container && record.path == path)
    }

    /// Rewrite the display path of every record shown at or below `old`
    ///
    /// Matches `old` itself and anything under `old/`. Returns the number of
    /// records rewritten.
    pub fn rename_display_prefix(&self, container: &str, old: &str, new: &str) -> usize {
        let nested = format!("{}/", old);
        let mut renamed = 0;
        for shard in &self.shards {
            let mut guard = shard.lock();
            let mut touched = false;
            for record in guard.blocks.values_mut() {
                if record.container != container {
                    continue;
                }
                if record.display_path == old {
                    record.display_path = new.to_string();
                } else if let Some(rest) = record.display_path.strip_prefix(&nested) {
                    record.display_path = format!("{}/{}", new, rest);
                } else {
                    continue;
                }
                touched = true;
                renamed += 1;
            }
            if touched {
                guard.touch();
            }
        }
        renamed
    }

    /// Full scan that deletes matching records shard by shard
    fn remove_where(&self, matches: impl Fn(&BlockRecord) -> bool) -> Vec<String> {
        let mut removed = Vec::new();
        for shard in &self.shards {
            let mut guard = shard.lock();
            let ids: Vec<String> = guard
                .blocks
                .values()
                .filter(|record| matches(record))
                .map(|record| record.id.clone())
                .collect();
            if ids.is_empty() {
                continue;
            }
            for id in &ids {
                guard.blocks.remove(id);
            }
            guard.touch();
            removed.extend(ids);
        }
        removed
    }

    /// Visit every record, one shard lock at a time
    fn scan(&self, mut visit: impl FnMut(&BlockRecord)) {
        for shard in &self.shards {
            let guard = shard.lock();
            guard.blocks.values().for_each(&mut visit);
        }
    }

    /// IDs of all blocks belonging to a document
    pub fn ids_by_root(&self, root_id: &str) -> Vec<String> {
        let mut ids = Vec::new();
        self.scan(|record| {
            if record.root_id == root_id {
                ids.push(record.id.clone());
            }
        });
        ids
    }

    /// Document root ID to its update marker
    pub fn root_updated(&self) -> HashMap<String, String> {
        let mut roots = HashMap::new();
        self.scan(|record| {
            if record.is_root() {
                roots.insert(record.id.clone(), record.updated.clone());
            }
        });
        roots
    }

    pub fn count_trees(&self) -> usize {
        let mut count = 0;
        self.scan(|record| {
            if record.is_root() {
                count += 1;
            }
        });
        count
    }

    pub fn count_blocks(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().blocks.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|shard| shard.lock().blocks.is_empty())
    }

    /// Root record of the document stored at `path`
    pub fn root_by_path(&self, container: &str, path: &str) -> Option<BlockRecord> {
        self.find_root(|record| record.container == container && record.path == path)
    }

    /// Root record of the document shown at `display_path`
    pub fn root_by_display_path(&self, container: &str, display_path: &str) -> Option<BlockRecord> {
        self.find_root(|record| record.container == container && record.display_path == display_path)
    }

    fn find_root(&self, matches: impl Fn(&BlockRecord) -> bool) -> Option<BlockRecord> {
        for shard in &self.shards {
            let guard = shard.lock();
            if let Some(record) = guard.blocks.values().find(|r| r.is_root() && matches(r)) {
                return Some(record.clone());
            }
        }
        None
    }

    /// Indexed document paths of a container that are not in `on_disk`
    pub fn redundant_paths(&self, container: &str, on_disk: &[String]) -> Vec<String> {
        let on_disk: HashSet<&str> = on_disk.iter().map(String::as_str).collect();
        let mut redundant: Vec<String> = self
            .root_paths(container)
            .into_iter()
            .filter(|path| !on_disk.contains(path.as_str()))
            .collect();
        redundant.sort();
        redundant
    }

    /// Paths in `on_disk` that have no indexed document
    pub fn missing_paths(&self, container: &str, on_disk: &[String]) -> Vec<String> {
        let indexed = self.root_paths(container);
        on_disk
            .iter()
            .filter(|path| !indexed.contains(path.as_str()))
            .cloned()
            .collect()
    }

    fn root_paths(&self, container: &str) -> HashSet<String> {
        let mut paths = HashSet::new();
        self.scan(|record| {
            if record.is_root() && record.container == container {
                paths.insert(record.path.clone());
            }
        });
        paths
    }

    /// Drop every record; all shards become dirty
    pub fn clear(&self) {
        for shard in &self.shards {
            let mut guard = shard.lock();
            guard.blocks.clear();
            guard.touch();
        }
    }

    /// Whether any shard has unsaved changes
    pub fn is_dirty(&self) -> bool {
        self.shards.iter().any(|shard| shard.lock().changed_at.is_some())
    }
}

impl Default for BlockTree {
    fn default() -> Self {
        Self::memory()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::{Node, NodeType};

    fn doc(path: &str, display_path: &str) -> Tree {
        let root = Node::document("20240101120000-doc0001", "Doc")
            .with_attr("updated", "1")
            .with_child(
                Node::new("20240101120001-list001", NodeType::List)
                    .with_attr("updated", "1")
                    .with_child(
                        Node::new("20240101120002-item001", NodeType::ListItem)
                            .with_attr("updated", "1")
                            .with_child(
                                Node::paragraph("20240101120003-para001", "a")
                                    .with_attr("updated", "1"),
                            ),
                    ),
            )
            .with_child(Node::paragraph("20240101120004-para002", "b").with_attr("updated", "1"));
        Tree::new("box1", path, display_path, root)
    }

    #[test]
    fn test_index_and_get() {
        let bt = BlockTree::memory();
        let tree = doc("/20240101120000-doc0001.sy", "/Doc");
        assert_eq!(bt.index(&tree), 5);

        let record = bt.get("20240101120003-para001").unwrap();
        assert_eq!(record.root_id, "20240101120000-doc0001");
        assert_eq!(record.parent_id, "20240101120002-item001");
        assert_eq!(record.node_type, "p");
        assert!(bt.get("missing").is_none());
        assert_eq!(bt.count_trees(), 1);
        assert_eq!(bt.count_blocks(), 5);
    }

    #[test]
    fn test_reindex_unchanged_writes_nothing() {
        let bt = BlockTree::memory();
        let tree = doc("/a.sy", "/Doc");
        bt.index(&tree);
        assert_eq!(bt.index(&tree), 0);
    }

    #[test]
    fn test_changed_block_rewrites_subtree() {
        let bt = BlockTree::memory();
        let mut tree = doc("/a.sy", "/Doc");
        bt.index(&tree);

        tree.root
            .find_mut("20240101120001-list001")
            .unwrap()
            .set_attr("updated", "2");
        // list, item and the nested paragraph; the sibling paragraph is untouched
        assert_eq!(bt.index(&tree), 3);
    }

    #[test]
    fn test_remove_scans() {
        let bt = BlockTree::memory();
        bt.index(&doc("/a.sy", "/Doc"));

        let removed = bt.remove_by_root("20240101120000-doc0001");
        assert_eq!(removed.len(), 5);
        assert!(bt.is_empty());

        bt.index(&doc("/folder/a.sy", "/F/Doc"));
        assert!(bt.remove_by_path_prefix("box2", "/folder").is_empty());
        assert_eq!(bt.remove_by_path_prefix("box1", "/folder").len(), 5);

        bt.index(&doc("/a.sy", "/Doc"));
        assert_eq!(bt.remove_by_container("box1").len(), 5);
        assert_eq!(bt.count_blocks(), 0);
    }

    #[test]
    fn test_root_lookups_and_path_checks() {
        let bt = BlockTree::memory();
        bt.index(&doc("/a.sy", "/Doc"));

        assert!(bt.root_by_path("box1", "/a.sy").is_some());
        assert!(bt.root_by_display_path("box1", "/Doc").is_some());
        assert!(bt.root_by_path("box1", "/b.sy").is_none());

        let on_disk = vec!["/b.sy".to_string()];
        assert_eq!(bt.redundant_paths("box1", &on_disk), vec!["/a.sy".to_string()]);
        assert_eq!(bt.missing_paths("box1", &on_disk), vec!["/b.sy".to_string()]);

        let updated = bt.root_updated();
        assert_eq!(updated.get("20240101120000-doc0001").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_set_root_path_touches_only_root() {
        let bt = BlockTree::memory();
        bt.index(&doc("/a.sy", "/Doc"));
        bt.set_root_path(&doc("/b.sy", "/Renamed"));

        assert_eq!(bt.get("20240101120000-doc0001").unwrap().path, "/b.sy");
        assert_eq!(bt.get("20240101120004-para002").unwrap().path, "/a.sy");
    }

    #[test]
    fn test_rename_display_prefix() {
        let bt = BlockTree::memory();
        bt.index(&doc("/a.sy", "/Notes/Doc"));

        assert_eq!(bt.rename_display_prefix("box1", "/Note", "/X"), 0);
        assert_eq!(bt.rename_display_prefix("box2", "/Notes", "/Archive"), 0);
        assert_eq!(bt.rename_display_prefix("box1", "/Notes", "/Archive"), 5);
        assert_eq!(
            bt.get("20240101120003-para001").unwrap().display_path,
            "/Archive/Doc"
        );
        assert!(bt.root_by_display_path("box1", "/Archive/Doc").is_some());
    }
}
