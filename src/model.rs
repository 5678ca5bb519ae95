//! Core data model.
//!
//! A task is a unit of work queued for a delegate. The manager only sees it
//! between the moment it is queued and the moment a delegate finishes it;
//! everything the reconciliation engine needs lives on this one record.

pub mod response;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Newtype for task IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Account that owns a task. Opaque to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a delegate (remote worker agent).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DelegateId(pub String);

impl DelegateId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Display for DelegateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Waiting for a delegate to claim it.
    Queued,
    /// Waiting on an external condition before it may be claimed.
    Parked,
    /// Claimed by a delegate and executing.
    Started,
    /// Completed by the delegate. Terminal.
    Finished,
    /// Failed on the delegate. Terminal.
    Error,
    /// Aborted by a user. Terminal.
    Aborted,
}

impl TaskStatus {
    /// The wire form, as stored in the task document.
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Queued => "QUEUED",
            TaskStatus::Parked => "PARKED",
            TaskStatus::Started => "STARTED",
            TaskStatus::Finished => "FINISHED",
            TaskStatus::Error => "ERROR",
            TaskStatus::Aborted => "ABORTED",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> crate::error::Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "QUEUED" => Ok(TaskStatus::Queued),
            "PARKED" => Ok(TaskStatus::Parked),
            "STARTED" => Ok(TaskStatus::Started),
            "FINISHED" => Ok(TaskStatus::Finished),
            "ERROR" => Ok(TaskStatus::Error),
            "ABORTED" => Ok(TaskStatus::Aborted),
            _ => Err(crate::error::Error::Other(format!("unknown task status: {s}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// Field names of the stored task document.
///
/// The store filters and updates by these names, so they must stay in sync
/// with the serde representation of [`Task`].
pub mod keys {
    pub const UUID: &str = "uuid";
    pub const ACCOUNT_ID: &str = "accountId";
    pub const STATUS: &str = "status";
    pub const EXPIRY: &str = "expiry";
    pub const CREATED_AT: &str = "createdAt";
    pub const NEXT_BROADCAST: &str = "nextBroadcast";
    pub const LAST_BROADCAST_AT: &str = "lastBroadcastAt";
    pub const BROADCAST_COUNT: &str = "broadcastCount";
    pub const DELEGATE_ID: &str = "delegateId";
    pub const PRE_ASSIGNED_DELEGATE_ID: &str = "preAssignedDelegateId";
    pub const MUST_EXECUTE_ON_DELEGATE_ID: &str = "mustExecuteOnDelegateId";
    pub const ALREADY_TRIED_DELEGATES: &str = "alreadyTriedDelegates";
    pub const WAIT_ID: &str = "waitId";
    pub const FORCE_EXECUTE: &str = "forceExecute";
    pub const VERSION: &str = "version";
}

/// A task record as persisted in the shared task collection.
///
/// All timestamps are epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub uuid: TaskId,
    pub account_id: AccountId,
    pub status: TaskStatus,

    /// Absolute deadline after which the task is failed.
    pub expiry: i64,
    pub created_at: i64,

    /// Earliest time at which the task may be broadcast again.
    #[serde(default)]
    pub next_broadcast: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_broadcast_at: Option<i64>,
    /// Monotonic; doubles as the optimistic-concurrency token for rebroadcast.
    #[serde(default)]
    pub broadcast_count: i64,

    /// Set once a delegate has claimed the task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegate_id: Option<DelegateId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_assigned_delegate_id: Option<DelegateId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub must_execute_on_delegate_id: Option<DelegateId>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub already_tried_delegates: BTreeSet<DelegateId>,

    /// Correlation token used to wake up whoever created the task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_type_group: Option<String>,

    #[serde(default)]
    pub force_execute: bool,
    /// Milliseconds added to the deadline when force execution pins the task.
    #[serde(default)]
    pub extra_timeout_for_force_execution: i64,

    /// Manager version the task was created under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl Task {
    /// A freshly queued task. Mostly useful for tests and tooling; real tasks
    /// are created upstream.
    pub fn queued(account_id: AccountId, created_at: i64, expiry: i64) -> Self {
        Self {
            uuid: TaskId::new(),
            account_id,
            status: TaskStatus::Queued,
            expiry,
            created_at,
            next_broadcast: 0,
            last_broadcast_at: None,
            broadcast_count: 0,
            delegate_id: None,
            pre_assigned_delegate_id: None,
            must_execute_on_delegate_id: None,
            already_tried_delegates: BTreeSet::new(),
            wait_id: None,
            task_type_group: None,
            force_execute: false,
            extra_timeout_for_force_execution: 0,
            version: None,
        }
    }

    pub fn wait_id(&self) -> Option<&str> {
        self.wait_id.as_deref().filter(|w| !w.trim().is_empty())
    }

    pub fn pre_assigned_delegate(&self) -> Option<&DelegateId> {
        self.pre_assigned_delegate_id
            .as_ref()
            .filter(|d| !d.is_blank())
    }

    pub fn must_execute_on(&self) -> Option<&DelegateId> {
        self.must_execute_on_delegate_id
            .as_ref()
            .filter(|d| !d.is_blank())
    }

    // Builder-style setters used by tooling and tests.

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_wait_id(mut self, wait_id: impl Into<String>) -> Self {
        self.wait_id = Some(wait_id.into());
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_delegate(mut self, delegate_id: DelegateId) -> Self {
        self.delegate_id = Some(delegate_id);
        self
    }

    pub fn with_force_execution(mut self, extra_timeout_ms: i64) -> Self {
        self.force_execute = true;
        self.extra_timeout_for_force_execution = extra_timeout_ms;
        self
    }
}
