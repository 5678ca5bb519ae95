//! Force execution: pin a high-priority task to a delegate instead of
//! letting it expire.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::model::{Task, TaskStatus};
use crate::services::{AssignmentService, SelectionLogService};
use crate::store::{TaskFilter, TaskStore, TaskUpdate};
use crate::telemetry::metrics;

/// Tries the account's active delegates in order and pins the task to the
/// first one that can take it.
pub struct ForceExecutionAssigner {
    store: Arc<dyn TaskStore>,
    assignment: Arc<dyn AssignmentService>,
    selection_log: Arc<dyn SelectionLogService>,
}

impl ForceExecutionAssigner {
    pub fn new(
        store: Arc<dyn TaskStore>,
        assignment: Arc<dyn AssignmentService>,
        selection_log: Arc<dyn SelectionLogService>,
    ) -> Self {
        Self {
            store,
            assignment,
            selection_log,
        }
    }

    /// Returns `true` only when the task was actually pinned.
    ///
    /// The task keeps living for `extraTimeoutForForceExecution` past `now`,
    /// is made due for broadcast right away and loses its force flag. The
    /// write only applies while the task is still QUEUED under the same
    /// account.
    pub async fn try_assign(&self, task: &Task, now: i64) -> Result<bool> {
        let mut batch = self.selection_log.create_batch(task);
        let candidates = self
            .assignment
            .retrieve_active_delegates(&task.account_id, &mut batch)
            .await?;

        let mut chosen = None;
        for delegate_id in candidates {
            if self
                .assignment
                .can_assign(&mut batch, &delegate_id, task)
                .await?
            {
                chosen = Some(delegate_id);
                break;
            }
        }
        let Some(delegate_id) = chosen else {
            debug!(task_id = %task.uuid, account_id = %task.account_id, "no delegate can force-execute task");
            return Ok(false);
        };

        if let Err(e) = self.selection_log.save(batch).await {
            warn!(task_id = %task.uuid, error = %e, "failed to save selection log");
        }

        let mut update = TaskUpdate::new();
        update
            .set_expiry(now.saturating_add(task.extra_timeout_for_force_execution))
            .set_pre_assigned_delegate(&delegate_id)
            .set_must_execute_on(&delegate_id)
            .set_next_broadcast(0)
            .set_force_execute(false);
        let filter = TaskFilter::by_id(task.uuid)
            .account(task.account_id.clone())
            .status(TaskStatus::Queued);

        let assigned = self.store.find_and_modify(&filter, &update).await?.is_some();
        if assigned {
            metrics::tasks_force_assigned().add(1, &[]);
            info!(
                task_id = %task.uuid,
                account_id = %task.account_id,
                delegate_id = %delegate_id,
                "task pinned for force execution"
            );
        } else {
            debug!(task_id = %task.uuid, "task changed before it could be pinned");
        }
        Ok(assigned)
    }
}
