//! Collaborators the reconciliation engine calls out to.
//!
//! The engine owns none of these concerns; it only needs the narrow
//! operations below. Production implementations backed by Postgres and pgmq
//! live in the submodules, tests use recording doubles.

pub mod assignment;
pub mod broadcast;
pub mod flags;
pub mod notify;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::Result;
use crate::model::response::{AssignmentReason, TaskResponse};
use crate::model::{AccountId, DelegateId, Task, TaskId};

pub use assignment::DelegateRegistry;
pub use broadcast::{BroadcastBackoff, PgmqBroadcaster};
pub use flags::StaticFeatureFlags;
pub use notify::PgmqOutcomeNotifier;

/// Feature flag that switches an account to capability-based assignment.
pub const CAPABILITY_ASSIGNMENT: &str = "DELEGATE_CAPABILITY_ASSIGNMENT";

// ---------------------------------------------------------------------------
// Selection log
// ---------------------------------------------------------------------------

/// One audit line explaining why a delegate was or wasn't chosen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionLogEntry {
    pub delegate_id: DelegateId,
    pub conclusion: String,
    pub message: String,
}

/// Audit batch collected while selecting a delegate for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionLogBatch {
    pub task_id: TaskId,
    pub account_id: AccountId,
    pub entries: Vec<SelectionLogEntry>,
}

impl SelectionLogBatch {
    pub fn new(task: &Task) -> Self {
        Self {
            task_id: task.uuid,
            account_id: task.account_id.clone(),
            entries: Vec::new(),
        }
    }

    pub fn record(
        &mut self,
        delegate_id: &DelegateId,
        conclusion: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.entries.push(SelectionLogEntry {
            delegate_id: delegate_id.clone(),
            conclusion: conclusion.into(),
            message: message.into(),
        });
    }
}

// ---------------------------------------------------------------------------
// Ports
// ---------------------------------------------------------------------------

/// Knows which delegates exist, which are alive and what they can run.
#[async_trait]
pub trait AssignmentService: Send + Sync {
    /// Active delegates of the account, in preference order.
    async fn retrieve_active_delegates(
        &self,
        account_id: &AccountId,
        batch: &mut SelectionLogBatch,
    ) -> Result<Vec<DelegateId>>;

    /// Whether `delegate_id` may run `task` right now.
    async fn can_assign(
        &self,
        batch: &mut SelectionLogBatch,
        delegate_id: &DelegateId,
        task: &Task,
    ) -> Result<bool>;

    /// A delegate able to run `task`, skipping `exclude`.
    async fn obtain_capable_delegate_id(
        &self,
        task: &Task,
        exclude: &BTreeSet<DelegateId>,
    ) -> Result<Option<DelegateId>>;

    /// Human-readable explanation of why no delegate picked the task up.
    async fn active_delegate_assignment_error_message(
        &self,
        reason: AssignmentReason,
        task: &Task,
    ) -> Result<String>;
}

/// Persists selection audit batches.
#[async_trait]
pub trait SelectionLogService: Send + Sync {
    fn create_batch(&self, task: &Task) -> SelectionLogBatch {
        SelectionLogBatch::new(task)
    }

    async fn save(&self, batch: SelectionLogBatch) -> Result<()>;
}

/// Wakes whoever is waiting on a task.
#[async_trait]
pub trait OutcomeNotifier: Send + Sync {
    async fn handle_response(
        &self,
        wait_id: &str,
        previous_delegate_id: Option<&DelegateId>,
        response: &TaskResponse,
    ) -> Result<()>;
}

/// Announces tasks to delegates and paces re-announcements.
#[async_trait]
pub trait BroadcastHelper: Send + Sync {
    async fn rebroadcast_delegate_task(&self, task: &Task) -> Result<()>;

    /// When the task should next be broadcast, given it is broadcast at `now`.
    fn find_next_broadcast_time_for_task(&self, task: &Task, now: i64) -> i64;
}

/// Per-account feature switches.
#[async_trait]
pub trait FeatureFlagService: Send + Sync {
    async fn is_enabled(&self, flag: &str, account_id: &AccountId) -> Result<bool>;
}
