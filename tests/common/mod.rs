//! Recording test doubles for the engine's collaborators.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use delegate_queue::engine::strategy::AssignmentStrategy;
use delegate_queue::engine::{
    Collaborators, ControlPlane, ForceExecutionAssigner, LegacyAssignmentStrategy, ReconcileConfig,
    TaskTerminator,
};
use delegate_queue::error::{Error, Result};
use delegate_queue::model::response::{AssignmentReason, TaskResponse};
use delegate_queue::model::{AccountId, DelegateId, Task, TaskId};
use delegate_queue::services::{
    AssignmentService, BroadcastHelper, FeatureFlagService, OutcomeNotifier, SelectionLogBatch,
    SelectionLogService,
};
use delegate_queue::store::InMemoryTaskStore;

pub const NOW: i64 = 1_700_000_000_000;
pub const VERSION: &str = "1.0.0";

pub fn account() -> AccountId {
    AccountId::new("acc1")
}

pub fn delegate(id: &str) -> DelegateId {
    DelegateId::new(id)
}

// ---------------------------------------------------------------------------
// Assignment
// ---------------------------------------------------------------------------

/// Active delegates per account; `assignable` decides `can_assign`.
#[derive(Default)]
pub struct FakeAssignment {
    pub active: Mutex<HashMap<AccountId, Vec<DelegateId>>>,
    pub assignable: Mutex<HashSet<DelegateId>>,
    pub capable: Mutex<Vec<DelegateId>>,
    pub fail: Mutex<bool>,
    pub exclusions_seen: Mutex<Vec<BTreeSet<DelegateId>>>,
}

impl FakeAssignment {
    pub fn with_active(self, account: AccountId, delegates: &[&str]) -> Self {
        self.active
            .lock()
            .unwrap()
            .insert(account, delegates.iter().map(|d| delegate(d)).collect());
        self
    }

    pub fn with_assignable(self, delegates: &[&str]) -> Self {
        self.assignable
            .lock()
            .unwrap()
            .extend(delegates.iter().map(|d| delegate(d)));
        self
    }

    pub fn with_capable(self, delegates: &[&str]) -> Self {
        *self.capable.lock().unwrap() = delegates.iter().map(|d| delegate(d)).collect();
        self
    }

    pub fn failing(self) -> Self {
        *self.fail.lock().unwrap() = true;
        self
    }

    fn check(&self) -> Result<()> {
        if *self.fail.lock().unwrap() {
            Err(Error::Assignment("assignment service unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl AssignmentService for FakeAssignment {
    async fn retrieve_active_delegates(
        &self,
        account_id: &AccountId,
        _batch: &mut SelectionLogBatch,
    ) -> Result<Vec<DelegateId>> {
        self.check()?;
        Ok(self
            .active
            .lock()
            .unwrap()
            .get(account_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn can_assign(
        &self,
        batch: &mut SelectionLogBatch,
        delegate_id: &DelegateId,
        _task: &Task,
    ) -> Result<bool> {
        self.check()?;
        let ok = self.assignable.lock().unwrap().contains(delegate_id);
        batch.record(delegate_id, if ok { "Eligible" } else { "Rejected" }, "test");
        Ok(ok)
    }

    async fn obtain_capable_delegate_id(
        &self,
        _task: &Task,
        exclude: &BTreeSet<DelegateId>,
    ) -> Result<Option<DelegateId>> {
        self.check()?;
        self.exclusions_seen.lock().unwrap().push(exclude.clone());
        Ok(self
            .capable
            .lock()
            .unwrap()
            .iter()
            .find(|d| !exclude.contains(*d))
            .cloned())
    }

    async fn active_delegate_assignment_error_message(
        &self,
        _reason: AssignmentReason,
        task: &Task,
    ) -> Result<String> {
        self.check()?;
        Ok(format!("No delegate picked up task for account {}", task.account_id))
    }
}

// ---------------------------------------------------------------------------
// Selection log
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingSelectionLog {
    pub saved: Mutex<Vec<SelectionLogBatch>>,
}

#[async_trait]
impl SelectionLogService for RecordingSelectionLog {
    async fn save(&self, batch: SelectionLogBatch) -> Result<()> {
        self.saved.lock().unwrap().push(batch);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub wait_id: String,
    pub previous_delegate_id: Option<DelegateId>,
    pub response: TaskResponse,
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }

    pub fn for_task(&self, id: TaskId) -> Vec<Notification> {
        self.sent()
            .into_iter()
            .filter(|n| n.response.task_id == id)
            .collect()
    }
}

#[async_trait]
impl OutcomeNotifier for RecordingNotifier {
    async fn handle_response(
        &self,
        wait_id: &str,
        previous_delegate_id: Option<&DelegateId>,
        response: &TaskResponse,
    ) -> Result<()> {
        self.sent.lock().unwrap().push(Notification {
            wait_id: wait_id.to_string(),
            previous_delegate_id: previous_delegate_id.cloned(),
            response: response.clone(),
        });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Broadcaster
// ---------------------------------------------------------------------------

/// Broadcasts are recorded; the next broadcast is always `now + 1000`.
#[derive(Default)]
pub struct RecordingBroadcaster {
    pub broadcast: Mutex<Vec<Task>>,
}

impl RecordingBroadcaster {
    pub fn broadcast(&self) -> Vec<Task> {
        self.broadcast.lock().unwrap().clone()
    }
}

#[async_trait]
impl BroadcastHelper for RecordingBroadcaster {
    async fn rebroadcast_delegate_task(&self, task: &Task) -> Result<()> {
        self.broadcast.lock().unwrap().push(task.clone());
        Ok(())
    }

    fn find_next_broadcast_time_for_task(&self, _task: &Task, now: i64) -> i64 {
        now + 1_000
    }
}

// ---------------------------------------------------------------------------
// Flags
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeFlags {
    pub enabled_for: Mutex<HashSet<AccountId>>,
}

impl FakeFlags {
    pub fn enabled_for(accounts: &[&str]) -> Self {
        Self {
            enabled_for: Mutex::new(accounts.iter().map(|a| AccountId::new(*a)).collect()),
        }
    }
}

#[async_trait]
impl FeatureFlagService for FakeFlags {
    async fn is_enabled(&self, _flag: &str, account_id: &AccountId) -> Result<bool> {
        Ok(self.enabled_for.lock().unwrap().contains(account_id))
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub store: Arc<InMemoryTaskStore>,
    pub assignment: Arc<FakeAssignment>,
    pub selection_log: Arc<RecordingSelectionLog>,
    pub notifier: Arc<RecordingNotifier>,
    pub broadcaster: Arc<RecordingBroadcaster>,
}

impl Harness {
    pub fn new(assignment: FakeAssignment) -> Self {
        Self {
            store: Arc::new(InMemoryTaskStore::new()),
            assignment: Arc::new(assignment),
            selection_log: Arc::new(RecordingSelectionLog::default()),
            notifier: Arc::new(RecordingNotifier::default()),
            broadcaster: Arc::new(RecordingBroadcaster::default()),
        }
    }

    pub fn collaborators(&self, strategy: Arc<dyn AssignmentStrategy>) -> Collaborators {
        Collaborators {
            store: self.store.clone(),
            assignment: self.assignment.clone(),
            selection_log: self.selection_log.clone(),
            notifier: self.notifier.clone(),
            broadcaster: self.broadcaster.clone(),
            strategy,
        }
    }

    pub fn force_exec(&self) -> ForceExecutionAssigner {
        ForceExecutionAssigner::new(
            self.store.clone(),
            self.assignment.clone(),
            self.selection_log.clone(),
        )
    }

    pub fn terminator(&self) -> TaskTerminator {
        TaskTerminator::new(
            self.store.clone(),
            self.assignment.clone(),
            self.notifier.clone(),
            self.force_exec(),
        )
    }

    pub fn control_plane(&self) -> ControlPlane {
        self.control_plane_with(Arc::new(LegacyAssignmentStrategy))
    }

    pub fn control_plane_with(&self, strategy: Arc<dyn AssignmentStrategy>) -> ControlPlane {
        ControlPlane::new(
            self.collaborators(strategy),
            ReconcileConfig {
                version: VERSION.to_string(),
                ..ReconcileConfig::default()
            },
        )
    }
}
