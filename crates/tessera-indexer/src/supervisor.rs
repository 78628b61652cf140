//! Top-level handling of fatal index errors

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::error::{FatalError, IndexError};
use crate::manager::IndexManager;

/// What to do when the flush loop stops with a [`FatalError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FatalPolicy {
    /// Hand the error back; the host exits with [`FatalError::exit_code`]
    #[default]
    Terminate,
    /// Discard the projection and block tree, re-index from the tree source
    /// and resume, at most `max_attempts` times
    RebuildAndRetry { max_attempts: u32 },
}

pub struct Supervisor {
    manager: Arc<IndexManager>,
    policy: FatalPolicy,
}

impl Supervisor {
    pub fn new(manager: Arc<IndexManager>, policy: FatalPolicy) -> Self {
        Self { manager, policy }
    }

    pub fn manager(&self) -> &Arc<IndexManager> {
        &self.manager
    }

    pub fn policy(&self) -> FatalPolicy {
        self.policy
    }

    /// Drive the flush loop until `shutdown` turns true
    ///
    /// Returns the number of rebuilds performed, or the fatal error the policy
    /// gave up on.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<u32, FatalError> {
        let mut rebuilds = 0;
        loop {
            let fatal = match Arc::clone(&self.manager).run(shutdown.clone()).await {
                Ok(()) => return Ok(rebuilds),
                Err(fatal) => fatal,
            };

            let max_attempts = match self.policy {
                FatalPolicy::Terminate => {
                    error!(kind = %fatal.kind, exit_code = fatal.exit_code(), "Index stopped on fatal error");
                    return Err(fatal);
                }
                FatalPolicy::RebuildAndRetry { max_attempts } => max_attempts,
            };
            if rebuilds >= max_attempts {
                error!(kind = %fatal.kind, rebuilds, "Giving up after repeated rebuilds");
                return Err(fatal);
            }

            rebuilds += 1;
            warn!(kind = %fatal.kind, attempt = rebuilds, max_attempts, "Rebuilding index after fatal error");
            let manager = Arc::clone(&self.manager);
            match tokio::task::spawn_blocking(move || manager.rebuild()).await {
                Ok(Ok(trees)) => info!(trees, "Index rebuilt, resuming"),
                Ok(Err(e)) => {
                    error!(error = %e, "Rebuild failed");
                    return Err(rebuild_failure(e, fatal));
                }
                Err(e) => {
                    error!(error = %e, "Rebuild task failed");
                    return Err(fatal);
                }
            }
        }
    }
}

fn rebuild_failure(err: IndexError, original: FatalError) -> FatalError {
    match err.classify() {
        IndexError::Fatal(fatal) => fatal,
        _ => original,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemoryTreeSource;
    use tessera_config::IndexConfig;

    #[tokio::test]
    async fn test_clean_shutdown_returns_zero_rebuilds() {
        let manager = Arc::new(
            IndexManager::memory(IndexConfig::default(), Arc::new(MemoryTreeSource::new())).unwrap(),
        );
        let supervisor = Supervisor::new(manager, FatalPolicy::RebuildAndRetry { max_attempts: 2 });
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        assert_eq!(supervisor.run(rx).await, Ok(0));
    }

    #[test]
    fn test_default_policy_terminates() {
        assert_eq!(FatalPolicy::default(), FatalPolicy::Terminate);
    }
}
