//! Coalescing write-behind queue of index operations
//!
//! At most one operation per `(action, key)` is pending at any time. A newer
//! intent for a pending key replaces the payload in place, so the key keeps
//! its original position while unrelated keys keep their relative order.
//! Deletions by block ID are the exception: their ID sets do not supersede each
//! other, so a second set for the same document is merged into the pending one.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, trace};

use crate::operation::{Action, Operation};

#[derive(Debug, Default)]
pub struct MutationQueue {
    ops: Mutex<Vec<Operation>>,
    closed: AtomicBool,
}

impl MutationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an intent; returns `false` once the queue is closed for shutdown
    pub fn push(&self, op: Operation) -> bool {
        if self.closed.load(Ordering::Acquire) {
            debug!(action = %op.action(), key = %op.key(), "Rejected operation while shutting down");
            return false;
        }

        let mut ops = self.ops.lock();
        match &op {
            Operation::DeleteByRoot { root_id, .. } => {
                ops.retain(|pending| !is_upsert_of(pending, |tree| tree.id == *root_id));
            }
            Operation::DeleteByPathPrefix {
                container,
                path_prefix,
            } => {
                ops.retain(|pending| {
                    !is_upsert_of(pending, |tree| {
                        tree.container == *container && tree.path.starts_with(path_prefix.as_str())
                    })
                });
            }
            _ => {}
        }
        coalesce(&mut ops, op);
        true
    }

    /// Swap out every pending operation, leaving a fresh queue for callers
    pub fn take(&self) -> Vec<Operation> {
        std::mem::take(&mut *self.ops.lock())
    }

    /// Put operations a flush pass could not start back at the front
    ///
    /// Intents enqueued after the pass began are newer; for a shared key the
    /// live entry wins and the returned operation is dropped. Deletions by
    /// block ID are merged instead.
    pub fn requeue_front(&self, remainder: Vec<Operation>) {
        if remainder.is_empty() {
            return;
        }
        let mut ops = self.ops.lock();
        let live = std::mem::take(&mut *ops);
        let mut merged = Vec::with_capacity(remainder.len() + live.len());
        for op in remainder {
            if accumulates(&op) || !live.iter().any(|newer| newer.same_intent(&op)) {
                coalesce(&mut merged, op);
            }
        }
        for op in live {
            coalesce(&mut merged, op);
        }
        debug!(pending = merged.len(), "Requeued unstarted operations");
        *ops = merged;
    }

    pub fn len(&self) -> usize {
        self.ops.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.lock().is_empty()
    }

    pub fn clear(&self) {
        self.ops.lock().clear();
    }

    /// Refuse new operations from now on
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn reopen(&self) {
        self.closed.store(false, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

fn is_upsert_of(op: &Operation, matches: impl Fn(&tessera_core::Tree) -> bool) -> bool {
    match op {
        Operation::Upsert { tree } => matches(tree),
        _ => false,
    }
}

fn accumulates(op: &Operation) -> bool {
    matches!(op, Operation::DeleteByIds { .. })
}

// Linear scan; queues stay in the hundreds between flushes.
fn coalesce(ops: &mut Vec<Operation>, op: Operation) {
    let action: Action = op.action();
    let key = op.key();
    if let Some(slot) = ops
        .iter_mut()
        .find(|pending| pending.action() == action && pending.key() == key)
    {
        if let (Operation::DeleteByIds { ids: pending, .. }, Operation::DeleteByIds { ids, .. }) =
            (&mut *slot, &op)
        {
            for id in ids {
                if !pending.contains(id) {
                    pending.push(id.clone());
                }
            }
            trace!(key = %key, ids = pending.len(), "Merged pending block deletions");
            return;
        }
        trace!(action = %action, key = %key, "Replaced pending operation");
        *slot = op;
    } else {
        ops.push(op);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::{Node, Tree};

    fn tree(id: &str, text: &str) -> Tree {
        Tree::new(
            "box1",
            format!("/{}.sy", id),
            "/Doc",
            Node::document(id, "Doc").with_child(Node::paragraph(format!("{}-p", id), text)),
        )
    }

    fn upsert(id: &str, text: &str) -> Operation {
        Operation::Upsert { tree: tree(id, text) }
    }

    fn keys(ops: &[Operation]) -> Vec<String> {
        ops.iter().map(|op| format!("{}:{}", op.action(), op.key())).collect()
    }

    #[test]
    fn test_same_key_replaces_in_place() {
        let queue = MutationQueue::new();
        queue.push(upsert("a", "v1"));
        queue.push(upsert("b", "v1"));
        queue.push(upsert("a", "v2"));
        assert_eq!(queue.len(), 2);

        let ops = queue.take();
        assert_eq!(keys(&ops), vec!["upsert:a", "upsert:b"]);
        match &ops[0] {
            Operation::Upsert { tree } => {
                assert_eq!(tree.find("a-p").map(|n| n.markdown.as_str()), Some("v2"))
            }
            other => panic!("unexpected operation {:?}", other),
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn test_different_actions_do_not_coalesce() {
        let queue = MutationQueue::new();
        queue.push(upsert("a", "v1"));
        queue.push(Operation::UpdateRefs { tree: tree("a", "v1") });
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_delete_prunes_pending_upserts() {
        let queue = MutationQueue::new();
        queue.push(upsert("a", "v1"));
        queue.push(upsert("b", "v1"));
        queue.push(Operation::DeleteByRoot {
            container: "box1".into(),
            root_id: "a".into(),
        });
        assert_eq!(keys(&queue.take()), vec!["upsert:b", "delete_by_root:a"]);

        queue.push(upsert("c", "v1"));
        queue.push(Operation::DeleteByPathPrefix {
            container: "box1".into(),
            path_prefix: "/c".into(),
        });
        assert_eq!(keys(&queue.take()), vec!["delete_by_path_prefix:box1/c"]);
    }

    #[test]
    fn test_requeue_front_newer_intent_wins() {
        let queue = MutationQueue::new();
        queue.push(upsert("b", "newer"));
        queue.push(upsert("c", "v1"));
        queue.requeue_front(vec![upsert("a", "old"), upsert("b", "old")]);

        let ops = queue.take();
        assert_eq!(keys(&ops), vec!["upsert:a", "upsert:b", "upsert:c"]);
        match &ops[1] {
            Operation::Upsert { tree } => {
                assert_eq!(tree.find("b-p").map(|n| n.markdown.as_str()), Some("newer"))
            }
            other => panic!("unexpected operation {:?}", other),
        }
    }

    fn delete_ids(root_id: &str, ids: &[&str]) -> Operation {
        Operation::DeleteByIds {
            root_id: root_id.into(),
            ids: ids.iter().map(|id| id.to_string()).collect(),
        }
    }

    fn deleted_ids(op: &Operation) -> Vec<String> {
        match op {
            Operation::DeleteByIds { ids, .. } => ids.clone(),
            other => panic!("unexpected operation {:?}", other),
        }
    }

    #[test]
    fn test_block_deletions_for_one_document_merge() {
        let queue = MutationQueue::new();
        queue.push(delete_ids("a", &["a-1"]));
        queue.push(upsert("b", "v1"));
        queue.push(delete_ids("a", &["a-2", "a-1"]));

        let ops = queue.take();
        assert_eq!(keys(&ops), vec!["delete_by_ids:a", "upsert:b"]);
        assert_eq!(deleted_ids(&ops[0]), vec!["a-1", "a-2"]);
    }

    #[test]
    fn test_requeued_block_deletions_merge_with_live_ones() {
        let queue = MutationQueue::new();
        queue.push(delete_ids("a", &["a-2"]));
        queue.requeue_front(vec![delete_ids("a", &["a-1"])]);

        let ops = queue.take();
        assert_eq!(ops.len(), 1);
        assert_eq!(deleted_ids(&ops[0]), vec!["a-1", "a-2"]);
    }

    #[test]
    fn test_closed_queue_rejects() {
        let queue = MutationQueue::new();
        queue.close();
        assert!(!queue.push(upsert("a", "v1")));
        assert!(queue.is_empty());
        queue.reopen();
        assert!(queue.push(upsert("a", "v1")));
    }
}
