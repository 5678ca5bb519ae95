//! Delegate registry backed by the `delegates` table.
//!
//! Delegates heartbeat into Postgres from the out-of-band registration path.
//! A delegate counts as active while its last heartbeat is within
//! `heartbeat_timeout`, and can run a task when it serves the task's type
//! group (an empty group list serves everything).

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use super::{AssignmentService, SelectionLogBatch, SelectionLogService};
use crate::db::Db;
use crate::db::delegates::DelegateRecord;
use crate::error::Result;
use crate::model::response::AssignmentReason;
use crate::model::{AccountId, DelegateId, Task};

/// Why a delegate was passed over for a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    Disconnected,
    PinnedElsewhere(DelegateId),
    UnsupportedGroup(String),
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::Disconnected => write!(f, "delegate is not connected"),
            Rejection::PinnedElsewhere(other) => {
                write!(f, "task must execute on delegate {other}")
            }
            Rejection::UnsupportedGroup(group) => {
                write!(f, "delegate does not support task group {group}")
            }
        }
    }
}

/// Decide whether `delegate` may run `task`, given the heartbeat cutoff.
pub fn eligibility(
    delegate: &DelegateRecord,
    task: &Task,
    heartbeat_cutoff: i64,
) -> std::result::Result<(), Rejection> {
    if delegate.last_heartbeat < heartbeat_cutoff {
        return Err(Rejection::Disconnected);
    }
    if let Some(pinned) = task.must_execute_on()
        && *pinned != delegate.id
    {
        return Err(Rejection::PinnedElsewhere(pinned.clone()));
    }
    if let Some(ref group) = task.task_type_group
        && !delegate.task_groups.is_empty()
        && !delegate.task_groups.iter().any(|g| g == group)
    {
        return Err(Rejection::UnsupportedGroup(group.clone()));
    }
    Ok(())
}

/// Assignment and selection-log services over Postgres.
pub struct DelegateRegistry {
    db: Arc<Db>,
    heartbeat_timeout: Duration,
}

impl DelegateRegistry {
    pub fn new(db: Arc<Db>, heartbeat_timeout: Duration) -> Self {
        Self {
            db,
            heartbeat_timeout,
        }
    }

    fn heartbeat_cutoff(&self) -> i64 {
        let timeout_ms = i64::try_from(self.heartbeat_timeout.as_millis()).unwrap_or(i64::MAX);
        chrono::Utc::now()
            .timestamp_millis()
            .saturating_sub(timeout_ms)
    }

    async fn active(&self, account_id: &AccountId) -> Result<Vec<DelegateRecord>> {
        self.db
            .active_delegates(account_id, self.heartbeat_cutoff())
            .await
    }
}

#[async_trait]
impl AssignmentService for DelegateRegistry {
    async fn retrieve_active_delegates(
        &self,
        account_id: &AccountId,
        batch: &mut SelectionLogBatch,
    ) -> Result<Vec<DelegateId>> {
        let delegates = self.active(account_id).await?;
        for delegate in &delegates {
            batch.record(&delegate.id, "Active", "delegate heartbeat is current");
        }
        Ok(delegates.into_iter().map(|d| d.id).collect())
    }

    async fn can_assign(
        &self,
        batch: &mut SelectionLogBatch,
        delegate_id: &DelegateId,
        task: &Task,
    ) -> Result<bool> {
        let Some(delegate) = self.db.delegate(&task.account_id, delegate_id).await? else {
            batch.record(delegate_id, "Rejected", "delegate is not registered");
            return Ok(false);
        };
        match eligibility(&delegate, task, self.heartbeat_cutoff()) {
            Ok(()) => {
                batch.record(delegate_id, "Eligible", "delegate can run the task");
                Ok(true)
            }
            Err(rejection) => {
                batch.record(delegate_id, "Rejected", rejection.to_string());
                Ok(false)
            }
        }
    }

    async fn obtain_capable_delegate_id(
        &self,
        task: &Task,
        exclude: &BTreeSet<DelegateId>,
    ) -> Result<Option<DelegateId>> {
        let cutoff = self.heartbeat_cutoff();
        Ok(self
            .active(&task.account_id)
            .await?
            .into_iter()
            .filter(|d| !exclude.contains(&d.id))
            .find(|d| eligibility(d, task, cutoff).is_ok())
            .map(|d| d.id))
    }

    async fn active_delegate_assignment_error_message(
        &self,
        reason: AssignmentReason,
        task: &Task,
    ) -> Result<String> {
        let delegates = self.active(&task.account_id).await?;
        Ok(assignment_error_message(
            reason,
            task,
            &delegates,
            self.heartbeat_cutoff(),
        ))
    }
}

#[async_trait]
impl SelectionLogService for DelegateRegistry {
    async fn save(&self, batch: SelectionLogBatch) -> Result<()> {
        self.db.insert_selection_logs(&batch).await
    }
}

/// Explain why none of `delegates` ended up running `task`.
pub fn assignment_error_message(
    reason: AssignmentReason,
    task: &Task,
    delegates: &[DelegateRecord],
    heartbeat_cutoff: i64,
) -> String {
    let AssignmentReason::Expired = reason;
    if delegates.is_empty() {
        return format!(
            "No active delegates were available for account {}",
            task.account_id
        );
    }
    if let Some(ref claimed) = task.delegate_id {
        return format!("Delegate {claimed} did not finish the task before it expired");
    }
    let reasons: Vec<String> = delegates
        .iter()
        .filter_map(|d| {
            eligibility(d, task, heartbeat_cutoff)
                .err()
                .map(|r| format!("{}: {r}", d.id))
        })
        .collect();
    if reasons.is_empty() {
        let ids: Vec<&str> = delegates.iter().map(|d| d.id.as_str()).collect();
        format!(
            "Eligible delegates [{}] did not acquire the task in time",
            ids.join(", ")
        )
    } else {
        format!("No eligible delegates: {}", reasons.join("; "))
    }
}
