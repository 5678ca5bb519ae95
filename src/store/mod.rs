//! Typed access to the shared task collection.
//!
//! The store is the only thing replicas share. Every mutation the engine
//! relies on is a single conditional operation against one document
//! ([`TaskStore::find_and_modify`]) or one batch delete, so correctness never
//! depends on which replica wins a race.

pub mod memory;

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeSet;

use crate::error::Result;
use crate::model::{AccountId, DelegateId, Task, TaskId, TaskStatus, keys};

pub use memory::InMemoryTaskStore;

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

/// How much of a stored task could be read.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskRead {
    /// The whole document deserialized.
    Full(Box<Task>),
    /// The body is corrupt, but the `waitId` projection was readable.
    WaitIdOnly(Option<String>),
    /// Nothing usable could be read (or the document is gone).
    Unreadable,
}

impl TaskRead {
    /// Classify a raw stored document.
    pub fn from_document(doc: Value) -> Self {
        if !doc.is_object() {
            return TaskRead::Unreadable;
        }
        let wait_id = match doc.get(keys::WAIT_ID) {
            None | Some(Value::Null) => Some(None),
            Some(Value::String(wait_id)) => Some(Some(wait_id.clone())),
            Some(_) => None,
        };
        match serde_json::from_value::<Task>(doc) {
            Ok(task) => TaskRead::Full(Box::new(task)),
            Err(_) => match wait_id {
                Some(wait_id) => TaskRead::WaitIdOnly(wait_id),
                None => TaskRead::Unreadable,
            },
        }
    }
}

/// Random partition of the backlog by creation time.
///
/// Matches tasks with `createdAt % modulus == remainder`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sampling {
    pub modulus: i64,
    pub remainder: i64,
}

impl Sampling {
    pub fn matches(&self, created_at: i64) -> bool {
        created_at.rem_euclid(self.modulus) == self.remainder
    }
}

// ---------------------------------------------------------------------------
// Conditional update
// ---------------------------------------------------------------------------

/// Match condition for [`TaskStore::find_and_modify`].
#[derive(Debug, Clone, PartialEq)]
pub struct TaskFilter {
    pub uuid: TaskId,
    pub account_id: Option<AccountId>,
    pub status: Option<TaskStatus>,
    pub broadcast_count: Option<i64>,
}

impl TaskFilter {
    pub fn by_id(uuid: TaskId) -> Self {
        Self {
            uuid,
            account_id: None,
            status: None,
            broadcast_count: None,
        }
    }

    pub fn account(mut self, account_id: AccountId) -> Self {
        self.account_id = Some(account_id);
        self
    }

    pub fn status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn broadcast_count(mut self, count: i64) -> Self {
        self.broadcast_count = Some(count);
        self
    }

    /// Evaluate the filter against a raw stored document.
    pub fn matches(&self, doc: &Value) -> bool {
        let uuid = self.uuid.to_string();
        if doc.get(keys::UUID).and_then(Value::as_str) != Some(uuid.as_str()) {
            return false;
        }
        if let Some(ref account) = self.account_id
            && doc.get(keys::ACCOUNT_ID).and_then(Value::as_str) != Some(account.as_str())
        {
            return false;
        }
        if let Some(status) = self.status
            && doc.get(keys::STATUS).and_then(Value::as_str) != Some(status.as_str())
        {
            return false;
        }
        if let Some(count) = self.broadcast_count {
            // An absent counter reads as zero, same as the serde default.
            let stored = doc
                .get(keys::BROADCAST_COUNT)
                .map_or(Some(0), Value::as_i64);
            if stored != Some(count) {
                return false;
            }
        }
        true
    }
}

/// Field writes and removals applied to one task document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdate {
    sets: Map<String, Value>,
    unsets: BTreeSet<String>,
}

impl TaskUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty() && self.unsets.is_empty()
    }

    fn set(&mut self, key: &str, value: Value) -> &mut Self {
        self.unsets.remove(key);
        self.sets.insert(key.to_string(), value);
        self
    }

    pub fn unset(&mut self, key: &str) -> &mut Self {
        self.sets.remove(key);
        self.unsets.insert(key.to_string());
        self
    }

    pub fn set_expiry(&mut self, expiry: i64) -> &mut Self {
        self.set(keys::EXPIRY, Value::from(expiry))
    }

    pub fn set_next_broadcast(&mut self, at: i64) -> &mut Self {
        self.set(keys::NEXT_BROADCAST, Value::from(at))
    }

    pub fn set_last_broadcast_at(&mut self, at: i64) -> &mut Self {
        self.set(keys::LAST_BROADCAST_AT, Value::from(at))
    }

    pub fn set_broadcast_count(&mut self, count: i64) -> &mut Self {
        self.set(keys::BROADCAST_COUNT, Value::from(count))
    }

    pub fn set_force_execute(&mut self, force: bool) -> &mut Self {
        self.set(keys::FORCE_EXECUTE, Value::Bool(force))
    }

    pub fn set_pre_assigned_delegate(&mut self, delegate_id: &DelegateId) -> &mut Self {
        self.set(
            keys::PRE_ASSIGNED_DELEGATE_ID,
            Value::String(delegate_id.0.clone()),
        )
    }

    pub fn set_must_execute_on(&mut self, delegate_id: &DelegateId) -> &mut Self {
        self.set(
            keys::MUST_EXECUTE_ON_DELEGATE_ID,
            Value::String(delegate_id.0.clone()),
        )
    }

    /// Set the pre-assigned delegate, or remove the field when there is none.
    pub fn set_or_unset_pre_assigned_delegate(
        &mut self,
        delegate_id: Option<&DelegateId>,
    ) -> &mut Self {
        match delegate_id {
            Some(id) => self.set_pre_assigned_delegate(id),
            None => self.unset(keys::PRE_ASSIGNED_DELEGATE_ID),
        }
    }

    pub fn set_already_tried_delegates(&mut self, tried: &BTreeSet<DelegateId>) -> &mut Self {
        let ids = tried
            .iter()
            .map(|d| Value::String(d.0.clone()))
            .collect::<Vec<_>>();
        self.set(keys::ALREADY_TRIED_DELEGATES, Value::Array(ids))
    }

    /// Fields written by this update, as a JSON object.
    pub fn sets(&self) -> &Map<String, Value> {
        &self.sets
    }

    /// Fields removed by this update.
    pub fn unsets(&self) -> impl Iterator<Item = &str> {
        self.unsets.iter().map(String::as_str)
    }

    /// Apply to a raw stored document. Non-object documents are left alone.
    pub fn apply_to(&self, doc: &mut Value) {
        if let Value::Object(fields) = doc {
            for (key, value) in &self.sets {
                fields.insert(key.clone(), value.clone());
            }
            for key in &self.unsets {
                fields.remove(key);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Store port
// ---------------------------------------------------------------------------

/// Typed queries and conditional updates against the task collection.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Persist a new task.
    async fn insert(&self, task: &Task) -> Result<()>;

    /// Fetch one task, if present and readable.
    async fn get(&self, id: TaskId) -> Result<Option<Task>>;

    /// List tasks, optionally by status, oldest first.
    async fn list(&self, status: Option<TaskStatus>, limit: usize) -> Result<Vec<Task>>;

    /// STARTED tasks whose `expiry < now`.
    async fn find_expired_started(&self, now: i64, limit: usize) -> Result<Vec<TaskId>>;

    /// QUEUED or PARKED tasks whose `expiry < now`, optionally sampled.
    async fn find_long_queued(
        &self,
        now: i64,
        sampling: Option<Sampling>,
        limit: usize,
    ) -> Result<Vec<TaskId>>;

    /// Unclaimed QUEUED tasks of this manager version that are due for
    /// broadcast (`nextBroadcast < now < expiry`). Unreadable documents are
    /// skipped.
    async fn find_rebroadcast_candidates(
        &self,
        now: i64,
        version: &str,
        limit: usize,
    ) -> Result<Vec<Task>>;

    /// Bulk full read. Fails as a whole if any present document is unreadable.
    async fn fetch_tasks(&self, ids: &[TaskId]) -> Result<Vec<Task>>;

    /// Per-id read that degrades to the `waitId` projection.
    async fn read_task(&self, id: TaskId) -> Result<TaskRead>;

    /// Atomically apply `update` to the document matching `filter` and return
    /// the new document, or `None` when nothing matched.
    async fn find_and_modify(&self, filter: &TaskFilter, update: &TaskUpdate)
    -> Result<Option<Task>>;

    /// Delete the given ids in one batch. Returns the ids actually removed.
    async fn delete_by_ids(&self, ids: &[TaskId]) -> Result<Vec<TaskId>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn filter_matches_on_raw_document() {
        let id = TaskId::new();
        let doc = json!({
            "uuid": id.to_string(),
            "accountId": "acc1",
            "status": "QUEUED",
            "broadcastCount": 3,
        });

        assert!(TaskFilter::by_id(id).matches(&doc));
        assert!(
            TaskFilter::by_id(id)
                .account(AccountId::new("acc1"))
                .status(TaskStatus::Queued)
                .broadcast_count(3)
                .matches(&doc)
        );
        assert!(!TaskFilter::by_id(id).broadcast_count(2).matches(&doc));
        assert!(!TaskFilter::by_id(id).status(TaskStatus::Started).matches(&doc));
        assert!(!TaskFilter::by_id(TaskId::new()).matches(&doc));
    }

    #[test]
    fn absent_broadcast_count_matches_zero() {
        let id = TaskId::new();
        let doc = json!({ "uuid": id.to_string() });
        assert!(TaskFilter::by_id(id).broadcast_count(0).matches(&doc));
    }

    #[test]
    fn update_set_and_unset_are_exclusive() {
        let delegate = DelegateId::new("d1");
        let mut update = TaskUpdate::new();
        update.set_pre_assigned_delegate(&delegate);
        update.set_or_unset_pre_assigned_delegate(None);

        assert!(!update.sets().contains_key(keys::PRE_ASSIGNED_DELEGATE_ID));
        assert_eq!(
            update.unsets().collect::<Vec<_>>(),
            vec![keys::PRE_ASSIGNED_DELEGATE_ID]
        );
    }

    #[test]
    fn update_applies_to_document() {
        let mut doc = json!({ "expiry": 1, "preAssignedDelegateId": "d0", "forceExecute": true });
        let mut update = TaskUpdate::new();
        update
            .set_expiry(42)
            .set_force_execute(false)
            .set_or_unset_pre_assigned_delegate(None);
        update.apply_to(&mut doc);

        assert_eq!(doc, json!({ "expiry": 42, "forceExecute": false }));
    }

    #[test]
    fn non_object_document_is_unreadable() {
        assert_eq!(TaskRead::from_document(json!("garbage")), TaskRead::Unreadable);
        assert_eq!(TaskRead::from_document(json!([])), TaskRead::Unreadable);
        assert_eq!(TaskRead::from_document(Value::Null), TaskRead::Unreadable);
    }

    #[test]
    fn sampling_uses_non_negative_remainder() {
        let sampling = Sampling {
            modulus: 4,
            remainder: 1,
        };
        assert!(sampling.matches(9));
        assert!(!sampling.matches(10));
    }
}
