//! Shared handles passed to every pipeline component

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::MonitorConfig;
use crate::processing::JobQueue;
use crate::storage::StateStore;

/// Built once at startup and cloned into the scan loop and the worker
#[derive(Debug, Clone)]
pub struct IntakeContext {
    pub config: Arc<MonitorConfig>,
    pub queue: Arc<JobQueue>,
    pub store: Arc<StateStore>,
    /// Cancelled when shutdown begins
    pub cancel: CancellationToken,
}

impl IntakeContext {
    /// Bundle the shared handles; `config` is frozen behind an `Arc`
    pub fn new(
        config: MonitorConfig,
        queue: Arc<JobQueue>,
        store: Arc<StateStore>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config: Arc::new(config),
            queue,
            store,
            cancel,
        }
    }

    /// Write the current snapshot on the blocking pool (the write syncs and
    /// renames). Failures are logged and the in-memory state stays
    /// authoritative until the next successful flush.
    pub async fn flush_state(&self) -> bool {
        let store = self.store.clone();
        let queue = self.queue.clone();
        match tokio::task::spawn_blocking(move || store.flush(&queue)).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::error!("Failed to save state: {}", e);
                false
            }
            Err(e) => {
                tracing::error!("State flush task failed: {}", e);
                false
            }
        }
    }
}
