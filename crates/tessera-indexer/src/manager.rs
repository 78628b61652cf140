//! The index manager
//!
//! [`IndexManager`] owns the projection, the block tree, the mutation queue
//! and the history queue. Callers enqueue [`Operation`]s; a background loop
//! ([`IndexManager::run`]) drains the queue on a fixed interval and persists
//! dirty block tree shards.
//!
//! ## Flush passes
//!
//! A pass swaps out the whole queue and applies the captured operations in
//! order, one transaction each, while holding the projection's writer
//! connection. A failing operation is rolled back and logged; the pass moves
//! on. When a transaction cannot even begin, the operations that never ran are
//! put back at the front of the queue. Storage corruption and lock exhaustion
//! end the pass with a [`FatalError`].

use parking_lot::{Mutex, RwLock};
use rusqlite::Connection;
use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tessera_blocktree::BlockTree;
use tessera_config::IndexConfig;
use tessera_core::Tree;
use tessera_sqlite::schema::remove_database_files;
use tessera_sqlite::{
    HistoryStore, IndexTx, Projection, ProjectionOptions, SchemaState, SqliteConfig,
};
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::{FatalError, FatalKind, IndexError, IndexResult};
use crate::history_queue::{HistoryOperation, HistoryQueue};
use crate::operation::Operation;
use crate::queue::MutationQueue;
use crate::source::TreeSource;

const SLOW_PASS: Duration = Duration::from_secs(5);
const SLOW_CHECKSUM_PASS: Duration = Duration::from_secs(1);
const IDLE_POLL: Duration = Duration::from_millis(50);
const IDLE_WARN: Duration = Duration::from_secs(10);

/// Outcome of one flush pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub applied: usize,
    pub failed: usize,
    /// Operations put back on the queue because they never started
    pub requeued: usize,
    /// Containers whose checksum was recomputed
    pub checksums: usize,
}

impl FlushReport {
    pub fn is_empty(&self) -> bool {
        self.applied == 0 && self.failed == 0 && self.requeued == 0
    }
}

pub struct IndexManager {
    config: IndexConfig,
    projection: RwLock<Arc<Projection>>,
    blocktree: Arc<BlockTree>,
    history: HistoryStore,
    queue: MutationQueue,
    history_queue: HistoryQueue,
    source: Arc<dyn TreeSource>,
    /// Held for the duration of a flush pass
    flush_lock: Mutex<()>,
    persistent: bool,
}

impl IndexManager {
    /// Open the projection, block tree and history store under `config.data_dir`
    ///
    /// A projection rebuilt because of a schema change takes the block tree
    /// with it; the returned [`SchemaState`] tells the host to re-index. A
    /// corrupted block tree takes the projection with it and fails with
    /// [`FatalKind::BlockTreeCorrupted`]; the next open starts fresh.
    pub fn open(config: IndexConfig, source: Arc<dyn TreeSource>) -> IndexResult<(Self, SchemaState)> {
        config.validate()?;

        let (projection, state) = match Projection::open(&config) {
            Ok(opened) => opened,
            Err(e) if e.is_corruption() => {
                error!(path = %config.database_path().display(), error = %e, "Projection is corrupted, removing it");
                let sqlite = SqliteConfig::from_database(config.database_path(), &config.database);
                if let Err(remove) = remove_database_files(&sqlite) {
                    error!(error = %remove, "Failed to remove corrupted projection");
                }
                return Err(FatalError::new(FatalKind::DatabaseCorrupted, e).into());
            }
            Err(e) => return Err(IndexError::from(e).classify()),
        };

        let blocktree_dir = config.blocktree_dir();
        if state == SchemaState::Rebuilt && blocktree_dir.exists() {
            info!(dir = %blocktree_dir.display(), "Schema changed, discarding block tree");
            std::fs::remove_dir_all(&blocktree_dir)?;
        }
        let blocktree = match BlockTree::open(&blocktree_dir, &config.blocktree) {
            Ok(blocktree) => blocktree,
            Err(e) if e.is_corruption() => {
                // The projection was written against the lost records; both start over.
                error!(error = %e, "Block tree is corrupted, removing the projection as well");
                drop(projection);
                let sqlite = SqliteConfig::from_database(config.database_path(), &config.database);
                if let Err(remove) = remove_database_files(&sqlite) {
                    error!(error = %remove, "Failed to remove projection");
                }
                return Err(FatalError::new(FatalKind::BlockTreeCorrupted, e).into());
            }
            Err(e) => return Err(IndexError::from(e).classify()),
        };
        let (history, _) = HistoryStore::open(&config).map_err(|e| IndexError::from(e).classify())?;

        info!(data_dir = %config.data_dir.display(), ?state, "Index manager opened");
        Ok((Self::assemble(config, projection, blocktree, history, source, true), state))
    }

    /// Manager backed by in-memory stores, for tests and embedding
    pub fn memory(config: IndexConfig, source: Arc<dyn TreeSource>) -> IndexResult<Self> {
        let projection = Projection::memory(ProjectionOptions::from_settings(&config.index))?;
        let history = HistoryStore::memory()?;
        Ok(Self::assemble(
            config,
            projection,
            BlockTree::memory(),
            history,
            source,
            false,
        ))
    }

    fn assemble(
        config: IndexConfig,
        projection: Projection,
        blocktree: BlockTree,
        history: HistoryStore,
        source: Arc<dyn TreeSource>,
        persistent: bool,
    ) -> Self {
        Self {
            config,
            projection: RwLock::new(Arc::new(projection)),
            blocktree: Arc::new(blocktree),
            history,
            queue: MutationQueue::new(),
            history_queue: HistoryQueue::new(),
            source,
            flush_lock: Mutex::new(()),
            persistent,
        }
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Current projection; replaced wholesale by [`rebuild`](Self::rebuild)
    pub fn projection(&self) -> Arc<Projection> {
        self.projection.read().clone()
    }

    pub fn blocktree(&self) -> &BlockTree {
        &self.blocktree
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn queue(&self) -> &MutationQueue {
        &self.queue
    }

    pub fn is_shutting_down(&self) -> bool {
        self.queue.is_closed()
    }

    /// Queue an operation; returns `false` when shutting down
    pub fn enqueue(&self, op: Operation) -> bool {
        self.queue.push(op)
    }

    pub fn enqueue_history(&self, op: HistoryOperation) {
        self.history_queue.push(op);
    }

    /// Apply every queued operation
    pub fn flush(&self) -> Result<FlushReport, FatalError> {
        let _pass = self.flush_lock.lock();
        let ops = self.queue.take();
        if ops.is_empty() {
            return Ok(FlushReport::default());
        }

        let projection = self.projection();
        let cache = projection.cache();
        let bypass_cache =
            ops.len() > self.config.index.large_batch_threshold && cache.is_enabled();
        if bypass_cache {
            debug!(operations = ops.len(), "Large batch, bypassing block cache");
            cache.set_enabled(false);
        }

        let result = self.run_pass(&projection, ops);

        if bypass_cache {
            cache.set_enabled(true);
        }
        if let Err(fatal) = &result {
            error!(kind = %fatal.kind, detail = %fatal.detail, "Flush pass hit a fatal error");
            if fatal.kind == FatalKind::DatabaseCorrupted {
                if let Err(e) = projection.remove_files() {
                    error!(error = %e, "Failed to remove corrupted projection");
                }
            }
        }
        result
    }

    fn run_pass(&self, projection: &Projection, ops: Vec<Operation>) -> Result<FlushReport, FatalError> {
        let start = Instant::now();
        let total = ops.len();
        let mut report = FlushReport::default();
        let mut touched = BTreeSet::new();

        let mut conn = projection.pool().writer();
        let mut pending = ops.into_iter();
        while let Some(op) = pending.next() {
            if self.is_shutting_down() {
                let rest: Vec<_> = std::iter::once(op).chain(pending).collect();
                info!(remaining = rest.len(), "Shutting down, stopping flush pass");
                report.requeued = rest.len();
                self.queue.requeue_front(rest);
                break;
            }

            let mut tx = match projection.begin(&mut conn) {
                Ok(tx) => tx,
                Err(e) => {
                    let rest: Vec<_> = std::iter::once(op).chain(pending).collect();
                    report.requeued = rest.len();
                    self.queue.requeue_front(rest);
                    match IndexError::from(e).classify() {
                        IndexError::Fatal(fatal) => return Err(fatal),
                        other => {
                            error!(
                                error = %other,
                                requeued = report.requeued,
                                "Failed to begin index transaction, ending flush pass"
                            );
                            break;
                        }
                    }
                }
            };

            let mut changes = Vec::new();
            let outcome = match self.apply(&mut tx, &op, &mut changes) {
                Ok(()) => tx.commit().map_err(IndexError::from),
                Err(e) => {
                    if let Err(rollback) = tx.rollback() {
                        warn!(error = %rollback, "Rollback failed");
                    }
                    Err(e)
                }
            };

            match outcome.map_err(IndexError::classify) {
                Ok(()) => {
                    for change in changes {
                        change.apply(&self.blocktree);
                    }
                    report.applied += 1;
                    if let Some(container) = op.container() {
                        touched.insert(container.to_string());
                    }
                }
                Err(IndexError::Fatal(fatal)) => {
                    drop(changes);
                    if fatal.kind == FatalKind::DatabaseLocked {
                        let rest: Vec<_> = std::iter::once(op).chain(pending).collect();
                        self.queue.requeue_front(rest);
                    }
                    return Err(fatal);
                }
                Err(e) => {
                    report.failed += 1;
                    error!(action = %op.action(), key = %op.key(), error = %e, "Index operation failed");
                }
            }
        }

        let elapsed = start.elapsed();
        if elapsed > SLOW_PASS {
            info!(
                elapsed_ms = elapsed.as_millis() as u64,
                operations = total,
                "Slow index flush pass"
            );
        } else {
            debug!(
                elapsed_ms = elapsed.as_millis() as u64,
                applied = report.applied,
                failed = report.failed,
                "Flushed index operations"
            );
        }

        if !touched.is_empty() {
            let start = Instant::now();
            match update_checksums(projection, &mut conn, &touched) {
                Ok(count) => report.checksums = count,
                Err(e) => match e.classify() {
                    IndexError::Fatal(fatal) => return Err(fatal),
                    other => error!(error = %other, "Failed to update container checksums"),
                },
            }
            let elapsed = start.elapsed();
            if elapsed > SLOW_CHECKSUM_PASS {
                info!(
                    elapsed_ms = elapsed.as_millis() as u64,
                    containers = touched.len(),
                    "Slow container checksum pass"
                );
            }
        }

        Ok(report)
    }

    /// Write `op` into the transaction
    ///
    /// Block tree changes are collected in `changes` and only applied by the
    /// caller once the transaction has committed.
    fn apply<'a>(
        &self,
        tx: &mut IndexTx<'_>,
        op: &'a Operation,
        changes: &mut Vec<TreeChange<'a>>,
    ) -> IndexResult<()> {
        let blocktree = &*self.blocktree;
        match op {
            Operation::Index { tree } => {
                let stats = tx.index_tree(tree, blocktree)?;
                changes.push(TreeChange::Remove(stats.removed));
                changes.push(TreeChange::Index(Cow::Borrowed(tree)));
            }
            Operation::Upsert { tree } => {
                let stats = tx.upsert_tree(tree, blocktree)?;
                changes.push(TreeChange::Remove(stats.removed));
                changes.push(TreeChange::Index(Cow::Borrowed(tree)));
            }
            Operation::DeleteByRoot { container, root_id } => {
                let rows = tx.delete_by_root(root_id)?;
                debug!(container = %container, root_id = %root_id, rows, "Deleted tree");
                changes.push(TreeChange::RemoveByRoot(root_id));
            }
            Operation::DeleteByIds { root_id, ids } => {
                let rows = tx.delete_by_ids(ids)?;
                debug!(root_id = %root_id, rows, "Deleted blocks");
                changes.push(TreeChange::Remove(ids.clone()));
            }
            Operation::DeleteByPathPrefix {
                container,
                path_prefix,
            } => {
                let rows = tx.delete_by_path_prefix(container, path_prefix)?;
                debug!(container = %container, path_prefix = %path_prefix, rows, "Deleted path");
                changes.push(TreeChange::RemoveByPathPrefix {
                    container,
                    prefix: path_prefix,
                });
            }
            Operation::Rename {
                tree,
                old_display_path,
            } => {
                tx.rename(tree, old_display_path)?;
                changes.push(TreeChange::Index(Cow::Borrowed(tree)));
            }
            Operation::RenameSubtree {
                container,
                old_display_path_prefix,
                new_display_path_prefix,
            } => {
                let rows =
                    tx.rename_subtree(container, old_display_path_prefix, new_display_path_prefix)?;
                debug!(container = %container, rows, "Renamed subtree");
                changes.push(TreeChange::RenameDisplayPrefix {
                    container,
                    old: old_display_path_prefix,
                    new: new_display_path_prefix,
                });
            }
            Operation::DeleteContainer { container } => {
                let rows = tx.delete_container(container)?;
                info!(container = %container, rows, "Deleted container");
                changes.push(TreeChange::RemoveByContainer(container));
            }
            Operation::InsertRefs { tree } => {
                tx.insert_refs(tree, blocktree)?;
            }
            Operation::UpdateRefs { tree } => {
                tx.update_refs(tree, blocktree)?;
            }
            Operation::DeleteRefs { tree } => {
                tx.delete_refs(&tree.id)?;
            }
            Operation::UpdateBlockContent { block } => {
                if !tx.update_block_content(block)? {
                    debug!(id = %block.id, "Block not indexed, content update skipped");
                }
            }
            Operation::DeleteAssets { hashes } => {
                tx.delete_assets(hashes)?;
            }
            Operation::IndexNode { ids } => self.index_nodes(tx, ids, changes)?,
        }
        Ok(())
    }

    /// Reload each block's document and refresh the block's row
    fn index_nodes(
        &self,
        tx: &mut IndexTx<'_>,
        ids: &[String],
        changes: &mut Vec<TreeChange<'_>>,
    ) -> IndexResult<()> {
        let mut by_root: BTreeMap<String, Vec<&str>> = BTreeMap::new();
        for id in ids {
            match self.blocktree.get(id) {
                Some(record) => by_root.entry(record.root_id).or_default().push(id),
                None => warn!(id = %id, "Block not in block tree, skipping"),
            }
        }

        for (root_id, ids) in by_root {
            let Some(tree) = self.source.load_tree(&root_id)? else {
                warn!(root_id = %root_id, "Tree not found, skipping");
                continue;
            };
            for id in ids {
                if !tx.refresh_block(&tree, id)? {
                    warn!(id = %id, root_id = %root_id, "Block missing from reloaded tree");
                }
            }
            changes.push(TreeChange::Index(Cow::Owned(tree)));
        }
        Ok(())
    }

    /// Apply queued history operations
    pub fn flush_history(&self) -> usize {
        self.history_queue.flush(&self.history, || self.is_shutting_down())
    }

    /// Persist dirty block tree shards
    pub fn save_blocktree(&self, force: bool) -> IndexResult<()> {
        self.blocktree.save(force)?;
        Ok(())
    }

    /// Wait until the queue is empty and no pass is running
    pub async fn wait_for_idle(&self, timeout: Duration) -> bool {
        let start = Instant::now();
        let mut warned = false;
        loop {
            if self.queue.is_empty() && self.flush_lock.try_lock().is_some() {
                return true;
            }
            let waited = start.elapsed();
            if waited >= timeout {
                return false;
            }
            if !warned && waited > IDLE_WARN {
                warn!(waited_ms = waited.as_millis() as u64, pending = self.queue.len(), "Index is still busy");
                warned = true;
            }
            tokio::time::sleep(IDLE_POLL).await;
        }
    }

    /// Stop accepting operations, let the running one finish, then save the block tree
    pub fn shutdown(&self) -> IndexResult<()> {
        self.queue.close();
        info!("Index manager shutting down");
        let _pass = self.flush_lock.lock();
        self.blocktree.save(true)?;
        Ok(())
    }

    /// Throw away the projection and block tree and queue a full re-index
    ///
    /// Returns the number of trees queued.
    pub fn rebuild(&self) -> IndexResult<usize> {
        let _pass = self.flush_lock.lock();
        warn!("Rebuilding index from the tree source");

        let old = self.projection();
        old.remove_files()?;
        let projection = if self.persistent {
            let (projection, _) = Projection::open(&self.config)?;
            projection
        } else {
            Projection::memory(ProjectionOptions::from_settings(&self.config.index))?
        };
        *self.projection.write() = Arc::new(projection);

        self.blocktree.destroy()?;
        self.queue.clear();
        self.reindex_all()
    }

    /// Queue an `Index` operation for every tree the source lists
    pub fn reindex_all(&self) -> IndexResult<usize> {
        let trees = self.source.list_trees()?;
        let count = trees.len();
        for tree in trees {
            self.queue.push(Operation::Index { tree });
        }
        info!(trees = count, "Queued full re-index");
        Ok(count)
    }

    /// Background loop: flush on every tick and persist the block tree
    ///
    /// Returns when `shutdown` turns true, or with the first fatal error.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Result<(), FatalError> {
        let mut flush_tick = interval(self.config.flush_interval());
        flush_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut save_tick = interval(self.config.blocktree.save_interval());
        save_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            flush_interval_ms = self.config.index.flush_interval_ms,
            save_interval_ms = self.config.blocktree.save_interval_ms,
            "Index flush loop started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = flush_tick.tick() => {
                    let manager = Arc::clone(&self);
                    let result = tokio::task::spawn_blocking(move || {
                        let report = manager.flush();
                        manager.flush_history();
                        report
                    })
                    .await;
                    match result {
                        Ok(Ok(report)) => {
                            if !report.is_empty() {
                                debug!(applied = report.applied, failed = report.failed, requeued = report.requeued, "Flush tick");
                            }
                        }
                        Ok(Err(fatal)) => return Err(fatal),
                        Err(e) => error!(error = %e, "Flush task failed"),
                    }
                }
                _ = save_tick.tick() => {
                    let manager = Arc::clone(&self);
                    match tokio::task::spawn_blocking(move || manager.save_blocktree(false)).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => warn!(error = %e, "Failed to save block tree"),
                        Err(e) => error!(error = %e, "Block tree save task failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Index flush loop stopped");
        Ok(())
    }
}

/// Block tree change held back until its transaction commits
enum TreeChange<'a> {
    Index(Cow<'a, Tree>),
    Remove(Vec<String>),
    RemoveByRoot(&'a str),
    RemoveByPathPrefix { container: &'a str, prefix: &'a str },
    RemoveByContainer(&'a str),
    RenameDisplayPrefix {
        container: &'a str,
        old: &'a str,
        new: &'a str,
    },
}

impl TreeChange<'_> {
    fn apply(self, blocktree: &BlockTree) {
        match self {
            Self::Index(tree) => {
                blocktree.index(&tree);
            }
            Self::Remove(ids) => {
                for id in &ids {
                    blocktree.remove(id);
                }
            }
            Self::RemoveByRoot(root_id) => {
                let removed = blocktree.remove_by_root(root_id);
                debug!(root_id = %root_id, records = removed.len(), "Removed block records");
            }
            Self::RemoveByPathPrefix { container, prefix } => {
                let removed = blocktree.remove_by_path_prefix(container, prefix);
                debug!(container = %container, prefix = %prefix, records = removed.len(), "Removed block records");
            }
            Self::RemoveByContainer(container) => {
                let removed = blocktree.remove_by_container(container);
                debug!(container = %container, records = removed.len(), "Removed block records");
            }
            Self::RenameDisplayPrefix { container, old, new } => {
                let renamed = blocktree.rename_display_prefix(container, old, new);
                debug!(container = %container, records = renamed, "Renamed block records");
            }
        }
    }
}

fn update_checksums(
    projection: &Projection,
    conn: &mut Connection,
    containers: &BTreeSet<String>,
) -> IndexResult<usize> {
    let mut tx = projection.begin(conn)?;
    for container in containers {
        tx.update_container_checksum(container)?;
    }
    tx.commit()?;
    Ok(containers.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemoryTreeSource;
    use tessera_core::{Node, Tree};

    const DOC: &str = "20240101120000-doc0001";
    const PARA: &str = "20240101120001-para001";

    fn tree(text: &str) -> Tree {
        Tree::new(
            "box1",
            format!("/{}.sy", DOC),
            "/Journal",
            Node::document(DOC, "Journal").with_child(Node::paragraph(PARA, text)),
        )
    }

    fn manager(source: Arc<MemoryTreeSource>) -> IndexManager {
        IndexManager::memory(IndexConfig::default(), source).unwrap()
    }

    #[test]
    fn test_flush_applies_and_checksums() {
        let manager = manager(Arc::new(MemoryTreeSource::new()));
        assert!(manager.enqueue(Operation::Upsert { tree: tree("hello") }));

        let report = manager.flush().unwrap();
        assert_eq!(report.applied, 1);
        assert_eq!(report.checksums, 1);
        assert!(manager.queue().is_empty());
        assert_eq!(manager.projection().count_blocks_by_root(DOC).unwrap(), 2);
        assert!(manager.blocktree().get(PARA).is_some());
        assert!(manager.projection().container_checksum("box1").unwrap().is_some());
    }

    struct BrokenSource;

    impl TreeSource for BrokenSource {
        fn list_trees(&self) -> anyhow::Result<Vec<Tree>> {
            anyhow::bail!("workspace unreadable")
        }

        fn load_tree(&self, root_id: &str) -> anyhow::Result<Option<Tree>> {
            anyhow::bail!("failed to parse {}", root_id)
        }
    }

    #[test]
    fn test_failed_operation_does_not_block_batch() {
        let manager = IndexManager::memory(IndexConfig::default(), Arc::new(BrokenSource)).unwrap();
        manager.enqueue(Operation::Index { tree: tree("first") });
        manager.flush().unwrap();

        // Reloading the document fails inside the source
        manager.enqueue(Operation::IndexNode {
            ids: vec![PARA.to_string()],
        });
        let other = Tree::new(
            "box1",
            "/20240202000000-other01.sy",
            "/Other",
            Node::document("20240202000000-other01", "Other"),
        );
        manager.enqueue(Operation::Upsert { tree: other });

        let report = manager.flush().unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.applied, 1);
        assert_eq!(
            manager.projection().count_blocks_by_root("20240202000000-other01").unwrap(),
            1
        );
        assert_eq!(
            manager.projection().get_block(PARA).unwrap().unwrap().content,
            "first"
        );
        assert!(manager.rebuild().is_err());
    }

    #[test]
    fn test_rolled_back_operation_leaves_block_tree_alone() {
        let manager = manager(Arc::new(MemoryTreeSource::new()));
        manager.enqueue(Operation::Index { tree: tree("first") });
        manager.flush().unwrap();

        // Every document write touches the attributes table
        manager
            .projection()
            .write(|tx| Ok(tx.connection().execute_batch("DROP TABLE attributes")?))
            .unwrap();

        let moved = Tree::new(
            "box1",
            format!("/archive/{}.sy", DOC),
            "/Archive/Journal",
            Node::document(DOC, "Journal")
                .with_child(Node::paragraph("20240101120009-para009", "replacement")),
        );
        manager.enqueue(Operation::Upsert { tree: moved });
        assert_eq!(manager.flush().unwrap().failed, 1);

        manager.enqueue(Operation::DeleteByRoot {
            container: "box1".into(),
            root_id: DOC.into(),
        });
        assert_eq!(manager.flush().unwrap().failed, 1);

        let blocktree = manager.blocktree();
        assert_eq!(blocktree.get(DOC).unwrap().display_path, "/Journal");
        assert!(blocktree.get(PARA).is_some());
        assert!(blocktree.get("20240101120009-para009").is_none());
        assert_eq!(manager.projection().count_blocks_by_root(DOC).unwrap(), 2);
    }

    #[test]
    fn test_index_node_reloads_from_source() {
        let source = Arc::new(MemoryTreeSource::new());
        let manager = manager(Arc::clone(&source));
        manager.enqueue(Operation::Index { tree: tree("before") });
        manager.flush().unwrap();

        source.insert(tree("after the reload"));
        manager.enqueue(Operation::IndexNode {
            ids: vec![PARA.to_string(), "20991231000000-missing".to_string()],
        });
        let report = manager.flush().unwrap();
        assert_eq!(report.applied, 1);
        assert_eq!(
            manager.projection().get_block(PARA).unwrap().unwrap().content,
            "after the reload"
        );
    }

    #[test]
    fn test_shutdown_rejects_new_work() {
        let manager = manager(Arc::new(MemoryTreeSource::new()));
        manager.shutdown().unwrap();
        assert!(manager.is_shutting_down());
        assert!(!manager.enqueue(Operation::Upsert { tree: tree("late") }));
        assert_eq!(manager.flush().unwrap(), FlushReport::default());
    }

    #[test]
    fn test_rebuild_requeues_every_tree() {
        let source = Arc::new(MemoryTreeSource::new());
        source.insert(tree("hello"));
        let manager = manager(Arc::clone(&source));
        manager.enqueue(Operation::Index { tree: tree("hello") });
        manager.flush().unwrap();

        assert_eq!(manager.rebuild().unwrap(), 1);
        assert_eq!(manager.projection().count_blocks_by_root(DOC).unwrap(), 0);
        assert!(manager.blocktree().is_empty());

        manager.flush().unwrap();
        assert_eq!(manager.projection().count_blocks_by_root(DOC).unwrap(), 2);
        assert_eq!(manager.blocktree().count_trees(), 1);
    }
}
