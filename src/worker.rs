//! Runs node updates as independent tokio tasks.
//!
//! Each [`UpdateWorker`] owns one [`NodeUpdater`] (and through it one command
//! runner); workers share nothing, so a slow or failing node never holds up
//! another. The orchestrator joins a worker and then reads its exit code.

use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};

use futures::future::join_all;
use tokio::task::JoinHandle;

use crate::error::UpdateError;
use crate::updater::NodeUpdater;

/// Exit code of a worker whose update succeeded.
pub const EXIT_SUCCESS: i32 = 0;

/// Exit code of a worker that has not finished or did not succeed.
pub const EXIT_FAILURE: i32 = -1;

/// Outcome of a joined worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateExit {
    Succeeded,
    /// The update failed and the failure was already reported.
    Failed,
}

pub struct UpdateWorker {
    node_id: String,
    handle: Option<JoinHandle<Result<(), UpdateError>>>,
    exit_code: Arc<AtomicI32>,
}

impl std::fmt::Debug for UpdateWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateWorker")
            .field("node_id", &self.node_id)
            .field("exit_code", &self.exit_code())
            .finish()
    }
}

impl UpdateWorker {
    /// Start `updater` on its own task. Must be called inside a tokio runtime.
    pub fn spawn(mut updater: NodeUpdater) -> Self {
        let node_id = updater.node_id().to_string();
        let exit_code = Arc::new(AtomicI32::new(EXIT_FAILURE));
        let slot = exit_code.clone();

        let handle = tokio::spawn(async move {
            match updater.run().await {
                Ok(()) => {
                    slot.store(EXIT_SUCCESS, Ordering::SeqCst);
                    Ok(())
                }
                // Already logged and tagged; nothing left to propagate.
                Err(e) if e.is_reported() => Ok(()),
                Err(e) => Err(e),
            }
        });

        Self {
            node_id,
            handle: Some(handle),
            exit_code,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// [`EXIT_SUCCESS`] once the update has succeeded, [`EXIT_FAILURE`] otherwise.
    pub fn exit_code(&self) -> i32 {
        self.exit_code.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }

    /// Stop the update at its next suspension point.
    pub fn abort(&self) {
        if let Some(handle) = &self.handle {
            tracing::warn!("Aborting update of {}", self.node_id);
            handle.abort();
        }
    }

    /// Wait for the update to finish.
    ///
    /// Reported failures resolve to [`UpdateExit::Failed`]; any other failure
    /// is returned as an error. Joining again returns the recorded exit.
    pub async fn join(&mut self) -> Result<UpdateExit, UpdateError> {
        if let Some(handle) = self.handle.take() {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(e),
                Err(join_err) => {
                    return Err(UpdateError::Worker {
                        node_id: self.node_id.clone(),
                        reason: join_err.to_string(),
                    });
                }
            }
        }
        Ok(if self.exit_code() == EXIT_SUCCESS {
            UpdateExit::Succeeded
        } else {
            UpdateExit::Failed
        })
    }
}

/// Update every node concurrently and collect each node's outcome.
pub async fn update_nodes(
    updaters: Vec<NodeUpdater>,
) -> Vec<(String, Result<UpdateExit, UpdateError>)> {
    let workers: Vec<UpdateWorker> = updaters.into_iter().map(UpdateWorker::spawn).collect();
    join_all(workers.into_iter().map(|mut worker| async move {
        let result = worker.join().await;
        (worker.node_id, result)
    }))
    .await
}
