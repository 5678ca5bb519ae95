//! Sweep of STARTED tasks that outlived their deadline.

use std::sync::Arc;
use tracing::debug;

use super::terminator::{TaskTerminator, Termination};
use crate::error::Result;
use crate::store::TaskStore;

pub struct TaskExpiryReconciler {
    store: Arc<dyn TaskStore>,
    terminator: Arc<TaskTerminator>,
    batch_size: usize,
}

impl TaskExpiryReconciler {
    pub fn new(
        store: Arc<dyn TaskStore>,
        terminator: Arc<TaskTerminator>,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            terminator,
            batch_size,
        }
    }

    /// Terminate up to one batch of STARTED tasks with `expiry < now`.
    pub async fn run(&self, now: i64) -> Result<Termination> {
        let ids = self.store.find_expired_started(now, self.batch_size).await?;
        if ids.is_empty() {
            return Ok(Termination::default());
        }
        debug!(count = ids.len(), "expiring stalled started tasks");
        Ok(self.terminator.end_tasks(&ids, now, "started").await)
    }
}
