//! Write-behind queue for the history projection

use parking_lot::Mutex;
use tessera_sqlite::{HistoryRow, HistoryStore};
use tracing::{debug, error};

#[derive(Debug, Clone)]
pub enum HistoryOperation {
    Index { histories: Vec<HistoryRow> },
    DeletePathPrefix { prefix: String },
}

impl HistoryOperation {
    fn name(&self) -> &'static str {
        match self {
            Self::Index { .. } => "index",
            Self::DeletePathPrefix { .. } => "delete_path_prefix",
        }
    }
}

#[derive(Debug, Default)]
pub struct HistoryQueue {
    ops: Mutex<Vec<HistoryOperation>>,
}

impl HistoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, op: HistoryOperation) {
        self.ops.lock().push(op);
    }

    pub fn len(&self) -> usize {
        self.ops.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.lock().is_empty()
    }

    /// Apply pending operations one transaction each
    ///
    /// A failing operation ends the pass; the rest of the captured batch is
    /// dropped. Once `stopping` returns true the operations not yet started
    /// go back to the front of the queue.
    pub fn flush(&self, store: &HistoryStore, stopping: impl Fn() -> bool) -> usize {
        let ops = std::mem::take(&mut *self.ops.lock());
        if ops.is_empty() {
            return 0;
        }

        let total = ops.len();
        let mut applied = 0;
        let mut pending = ops.into_iter();
        while let Some(op) = pending.next() {
            if stopping() {
                let mut queued = self.ops.lock();
                let newer = std::mem::take(&mut *queued);
                queued.extend(std::iter::once(op).chain(pending));
                queued.extend(newer);
                debug!(requeued = queued.len(), "Shutting down, stopping history flush");
                break;
            }
            let result = match &op {
                HistoryOperation::Index { histories } => store.index(histories),
                HistoryOperation::DeletePathPrefix { prefix } => store.delete_path_prefix(prefix),
            };
            match result {
                Ok(_) => applied += 1,
                Err(e) => {
                    error!(
                        action = op.name(),
                        error = %e,
                        dropped = total - applied - 1,
                        "History operation failed"
                    );
                    break;
                }
            }
        }
        debug!(applied, total, "Flushed history queue");
        applied
    }
}
