//! Re-announcing unclaimed tasks to delegates.
//!
//! Runs on every replica. Each task is advanced with a compare-and-swap on
//! its `broadcastCount`, so concurrent replicas advance it at most once per
//! observed count and only the winner broadcasts.

use std::sync::Arc;
use tracing::{debug, warn};

use super::strategy::AssignmentStrategy;
use crate::error::Result;
use crate::model::Task;
use crate::services::BroadcastHelper;
use crate::store::{TaskFilter, TaskStore, TaskUpdate};
use crate::telemetry::metrics;

/// Counts from one rebroadcast pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebroadcastOutcome {
    pub rebroadcast: usize,
    /// Tasks another replica advanced first.
    pub conflicts: usize,
}

pub struct RebroadcastEngine {
    store: Arc<dyn TaskStore>,
    broadcaster: Arc<dyn BroadcastHelper>,
    strategy: Arc<dyn AssignmentStrategy>,
    batch_size: usize,
}

impl RebroadcastEngine {
    pub fn new(
        store: Arc<dyn TaskStore>,
        broadcaster: Arc<dyn BroadcastHelper>,
        strategy: Arc<dyn AssignmentStrategy>,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            broadcaster,
            strategy,
            batch_size,
        }
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Rebroadcast unclaimed QUEUED tasks of `version` that are due at `now`.
    pub async fn run(&self, now: i64, version: &str) -> Result<RebroadcastOutcome> {
        let tasks = self
            .store
            .find_rebroadcast_candidates(now, version, self.batch_size)
            .await?;

        let mut outcome = RebroadcastOutcome::default();
        for task in &tasks {
            match self.rebroadcast(task, now).await {
                Ok(true) => outcome.rebroadcast += 1,
                Ok(false) => outcome.conflicts += 1,
                Err(e) => {
                    warn!(task_id = %task.uuid, account_id = %task.account_id, error = %e, "rebroadcast failed");
                }
            }
        }

        if outcome.rebroadcast > 0 {
            metrics::tasks_rebroadcast().add(outcome.rebroadcast as u64, &[]);
        }
        if outcome.conflicts > 0 {
            metrics::rebroadcast_conflicts().add(outcome.conflicts as u64, &[]);
        }
        Ok(outcome)
    }

    /// `Ok(false)` when another writer moved the task on first.
    async fn rebroadcast(&self, task: &Task, now: i64) -> Result<bool> {
        let mut update = TaskUpdate::new();
        update
            .set_last_broadcast_at(now)
            .set_broadcast_count(task.broadcast_count + 1)
            .set_next_broadcast(self.broadcaster.find_next_broadcast_time_for_task(task, now));
        self.strategy.prepare(task, &mut update).await?;

        let filter = TaskFilter::by_id(task.uuid).broadcast_count(task.broadcast_count);
        let Some(updated) = self.store.find_and_modify(&filter, &update).await? else {
            debug!(task_id = %task.uuid, broadcast_count = task.broadcast_count, "task already rebroadcast");
            return Ok(false);
        };

        self.broadcaster.rebroadcast_delegate_task(&updated).await?;
        debug!(
            task_id = %updated.uuid,
            broadcast_count = updated.broadcast_count,
            pre_assigned = ?updated.pre_assigned_delegate_id,
            "task rebroadcast"
        );
        Ok(true)
    }
}
