//! Failing tasks that ran out of time.
//!
//! Termination deletes first and notifies second, and only for the ids the
//! delete actually removed. A waiter is therefore never told a task failed
//! while it is still in the store, and two replicas racing on the same task
//! cannot both notify.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{Instrument, debug, error, warn};

use super::force_exec::ForceExecutionAssigner;
use crate::model::response::{AssignmentReason, TaskResponse};
use crate::model::{AccountId, DelegateId, Task, TaskId};
use crate::services::{AssignmentService, OutcomeNotifier};
use crate::store::{TaskRead, TaskStore};
use crate::telemetry::{metrics, tick};
use opentelemetry::KeyValue;

const EXPIRED_PREFIX: &str = "Task expired. ";

/// Explanation used when the stored task was too damaged to ask the
/// assignment service about it.
pub const UNKNOWN_DELEGATE_MESSAGE: &str = "Unable to determine delegate for the task";

/// Counts from one [`TaskTerminator::end_tasks`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Termination {
    /// Tasks deleted by this call.
    pub expired: usize,
    pub force_assigned: usize,
    pub notified: usize,
    /// Deleted tasks of which nothing could be read.
    pub unreadable: usize,
}

/// How much of a doomed task survived reading.
enum Doomed {
    Full(Box<Task>),
    WaitIdOnly(Option<String>),
    Unreadable,
}

impl Doomed {
    fn wait_id(&self) -> Option<&str> {
        match self {
            Doomed::Full(task) => task.wait_id(),
            Doomed::WaitIdOnly(wait_id) => wait_id.as_deref().filter(|w| !w.trim().is_empty()),
            Doomed::Unreadable => None,
        }
    }
}

/// Deletes expired tasks and tells their waiters.
pub struct TaskTerminator {
    store: Arc<dyn TaskStore>,
    assignment: Arc<dyn AssignmentService>,
    notifier: Arc<dyn OutcomeNotifier>,
    force_exec: ForceExecutionAssigner,
}

impl TaskTerminator {
    pub fn new(
        store: Arc<dyn TaskStore>,
        assignment: Arc<dyn AssignmentService>,
        notifier: Arc<dyn OutcomeNotifier>,
        force_exec: ForceExecutionAssigner,
    ) -> Self {
        Self {
            store,
            assignment,
            notifier,
            force_exec,
        }
    }

    /// Terminate the given tasks, believed expired at `now`.
    ///
    /// `phase` labels metrics and logs (`started` or `queued`). Never fails:
    /// per-task problems are logged and the rest of the batch proceeds.
    pub async fn end_tasks(&self, ids: &[TaskId], now: i64, phase: &'static str) -> Termination {
        let mut outcome = Termination::default();
        if ids.is_empty() {
            return outcome;
        }

        let doomed = match self.store.fetch_tasks(ids).await {
            Ok(tasks) => {
                let mut doomed = Vec::with_capacity(tasks.len());
                for task in tasks {
                    if self.rescue(&task, now, &mut outcome).await {
                        continue;
                    }
                    doomed.push((task.uuid, Doomed::Full(Box::new(task))));
                }
                doomed
            }
            Err(e) => {
                warn!(phase, error = %e, "bulk task read failed, reading tasks one by one");
                self.read_one_by_one(ids, now, &mut outcome).await
            }
        };
        if doomed.is_empty() {
            return outcome;
        }

        let doomed_ids: Vec<TaskId> = doomed.iter().map(|(id, _)| *id).collect();
        let deleted: HashSet<TaskId> = match self.store.delete_by_ids(&doomed_ids).await {
            Ok(deleted) => deleted.into_iter().collect(),
            Err(e) => {
                error!(phase, count = doomed_ids.len(), error = %e, "failed to delete expired tasks");
                return outcome;
            }
        };

        for (id, task) in doomed {
            if !deleted.contains(&id) {
                debug!(task_id = %id, "task already removed elsewhere");
                continue;
            }
            outcome.expired += 1;
            if matches!(task, Doomed::Unreadable) {
                outcome.unreadable += 1;
            }
            if let Some(wait_id) = task.wait_id() {
                let span = tick::start_task_span(&id, phase);
                if self
                    .notify(id, wait_id, &task)
                    .instrument(span)
                    .await
                {
                    outcome.notified += 1;
                }
            }
        }

        metrics::tasks_expired().add(outcome.expired as u64, &[KeyValue::new("phase", phase)]);
        if outcome.unreadable > 0 {
            metrics::tasks_unreadable().add(outcome.unreadable as u64, &[]);
        }
        outcome
    }

    /// Whether force execution keeps this task alive. Assignment failures
    /// leave the task alone until the next tick.
    async fn rescue(&self, task: &Task, now: i64, outcome: &mut Termination) -> bool {
        if !task.force_execute {
            return false;
        }
        match self.force_exec.try_assign(task, now).await {
            Ok(true) => {
                outcome.force_assigned += 1;
                true
            }
            Ok(false) => false,
            Err(e) => {
                warn!(task_id = %task.uuid, error = %e, "force execution failed, retrying next tick");
                true
            }
        }
    }

    async fn read_one_by_one(
        &self,
        ids: &[TaskId],
        now: i64,
        outcome: &mut Termination,
    ) -> Vec<(TaskId, Doomed)> {
        let mut doomed = Vec::with_capacity(ids.len());
        for &id in ids {
            match self.store.read_task(id).await {
                Ok(TaskRead::Full(task)) => {
                    if !self.rescue(&task, now, outcome).await {
                        doomed.push((id, Doomed::Full(task)));
                    }
                }
                Ok(TaskRead::WaitIdOnly(wait_id)) => {
                    warn!(task_id = %id, "task document is corrupt, only its wait id is readable");
                    doomed.push((id, Doomed::WaitIdOnly(wait_id)));
                }
                Ok(TaskRead::Unreadable) => {
                    warn!(task_id = %id, "task document is unreadable");
                    doomed.push((id, Doomed::Unreadable));
                }
                Err(e) => {
                    warn!(task_id = %id, error = %e, "failed to read task, retrying next tick");
                }
            }
        }
        doomed
    }

    async fn notify(&self, id: TaskId, wait_id: &str, task: &Doomed) -> bool {
        let (account_id, delegate_id): (Option<AccountId>, Option<&DelegateId>) = match task {
            Doomed::Full(task) => (Some(task.account_id.clone()), task.delegate_id.as_ref()),
            _ => (None, None),
        };
        let reason = match task {
            Doomed::Full(task) => self.explain(task).await,
            _ => UNKNOWN_DELEGATE_MESSAGE.to_string(),
        };
        let response = TaskResponse::expired(id, account_id, format!("{EXPIRED_PREFIX}{reason}"));
        match self
            .notifier
            .handle_response(wait_id, delegate_id, &response)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                error!(task_id = %id, wait_id, error = %e, "failed to notify task waiter");
                false
            }
        }
    }

    async fn explain(&self, task: &Task) -> String {
        match self
            .assignment
            .active_delegate_assignment_error_message(AssignmentReason::Expired, task)
            .await
        {
            Ok(message) if !message.trim().is_empty() => message,
            Ok(_) => UNKNOWN_DELEGATE_MESSAGE.to_string(),
            Err(e) => {
                warn!(task_id = %task.uuid, error = %e, "failed to explain task expiry");
                UNKNOWN_DELEGATE_MESSAGE.to_string()
            }
        }
    }
}
