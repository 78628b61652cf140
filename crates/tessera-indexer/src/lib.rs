//! Write-behind indexing for the Tessera block index
//!
//! Editors produce re-parsed document trees far more often than the index can
//! afford to rewrite them. This crate sits between the two: callers enqueue
//! [`Operation`]s on an [`IndexManager`], the [`MutationQueue`] keeps only the
//! latest intent per document, and a background loop applies the queue as
//! one transaction per operation against the SQLite projection and the block
//! tree.
//!
//! ```rust,ignore
//! let source = Arc::new(MemoryTreeSource::new());
//! let (manager, state) = IndexManager::open(config, source)?;
//! let manager = Arc::new(manager);
//! if state == SchemaState::Rebuilt {
//!     manager.reindex_all()?;
//! }
//!
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! let supervisor = Supervisor::new(Arc::clone(&manager), FatalPolicy::Terminate);
//! let handle = tokio::spawn(async move { supervisor.run(shutdown_rx).await });
//!
//! manager.enqueue(Operation::Upsert { tree });
//! ```
//!
//! Fatal conditions never exit the process. They surface as [`FatalError`]
//! from the flush loop and the [`Supervisor`] applies its [`FatalPolicy`].

pub mod error;
pub mod history_queue;
pub mod logging;
pub mod manager;
pub mod operation;
pub mod queue;
pub mod source;
pub mod supervisor;

pub use error::{FatalError, FatalKind, IndexError, IndexResult};
pub use history_queue::{HistoryOperation, HistoryQueue};
pub use logging::{init_logging, LoggingConfig};
pub use manager::{FlushReport, IndexManager};
pub use operation::{Action, Operation};
pub use queue::MutationQueue;
pub use source::{MemoryTreeSource, TreeSource};
pub use supervisor::{FatalPolicy, Supervisor};

pub use tessera_config::IndexConfig;
pub use tessera_core::Tree;
pub use tessera_sqlite::SchemaState;
