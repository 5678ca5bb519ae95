//! In-memory task store.
//!
//! Keeps raw JSON documents, exactly like the shared document store would,
//! so queries keep working on documents that no longer deserialize into a
//! [`Task`]. A single async mutex guards the collection; `find_and_modify`
//! evaluates the filter and applies the update under one lock acquisition.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::warn;

use super::{Sampling, TaskFilter, TaskRead, TaskStore, TaskUpdate};
use crate::error::Result;
use crate::model::{Task, TaskId, TaskStatus, keys};

/// Document store held in process memory. Insertion order is query order.
#[derive(Default)]
pub struct InMemoryTaskStore {
    docs: Mutex<Vec<(TaskId, Value)>>,
}

fn field_i64(doc: &Value, key: &str) -> Option<i64> {
    doc.get(key).and_then(Value::as_i64)
}

fn field_str<'a>(doc: &'a Value, key: &str) -> Option<&'a str> {
    doc.get(key).and_then(Value::as_str)
}

fn has_status(doc: &Value, statuses: &[TaskStatus]) -> bool {
    field_str(doc, keys::STATUS).is_some_and(|s| statuses.iter().any(|st| st.as_str() == s))
}

fn is_absent(doc: &Value, key: &str) -> bool {
    doc.get(key).is_none_or(Value::is_null)
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a raw document under `id`, bypassing serialization.
    ///
    /// Lets tests plant documents that no longer match the [`Task`] shape.
    pub async fn insert_raw(&self, id: TaskId, doc: Value) {
        let mut docs = self.docs.lock().await;
        docs.retain(|(existing, _)| *existing != id);
        docs.push((id, doc));
    }

    /// Raw document for `id`, if present.
    pub async fn raw(&self, id: TaskId) -> Option<Value> {
        let docs = self.docs.lock().await;
        docs.iter()
            .find(|(existing, _)| *existing == id)
            .map(|(_, doc)| doc.clone())
    }

    pub async fn len(&self) -> usize {
        self.docs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.docs.lock().await.is_empty()
    }

    pub async fn contains(&self, id: TaskId) -> bool {
        let docs = self.docs.lock().await;
        docs.iter().any(|(existing, _)| *existing == id)
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert(&self, task: &Task) -> Result<()> {
        let doc = serde_json::to_value(task)?;
        self.insert_raw(task.uuid, doc).await;
        Ok(())
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>> {
        match self.raw(id).await {
            Some(doc) => Ok(Some(serde_json::from_value(doc)?)),
            None => Ok(None),
        }
    }

    async fn list(&self, status: Option<TaskStatus>, limit: usize) -> Result<Vec<Task>> {
        let docs = self.docs.lock().await;
        let mut tasks = Vec::new();
        for (id, doc) in docs.iter() {
            if tasks.len() >= limit {
                break;
            }
            if status.is_some_and(|s| !has_status(doc, &[s])) {
                continue;
            }
            match serde_json::from_value::<Task>(doc.clone()) {
                Ok(task) => tasks.push(task),
                Err(e) => warn!(task_id = %id, error = %e, "skipping unreadable task"),
            }
        }
        Ok(tasks)
    }

    async fn find_expired_started(&self, now: i64, limit: usize) -> Result<Vec<TaskId>> {
        let docs = self.docs.lock().await;
        Ok(docs
            .iter()
            .filter(|(_, doc)| has_status(doc, &[TaskStatus::Started]))
            .filter(|(_, doc)| field_i64(doc, keys::EXPIRY).is_some_and(|e| e < now))
            .map(|(id, _)| *id)
            .take(limit)
            .collect())
    }

    async fn find_long_queued(
        &self,
        now: i64,
        sampling: Option<Sampling>,
        limit: usize,
    ) -> Result<Vec<TaskId>> {
        let docs = self.docs.lock().await;
        Ok(docs
            .iter()
            .filter(|(_, doc)| has_status(doc, &[TaskStatus::Queued, TaskStatus::Parked]))
            .filter(|(_, doc)| field_i64(doc, keys::EXPIRY).is_some_and(|e| e < now))
            .filter(|(_, doc)| match sampling {
                Some(s) => field_i64(doc, keys::CREATED_AT).is_some_and(|c| s.matches(c)),
                None => true,
            })
            .map(|(id, _)| *id)
            .take(limit)
            .collect())
    }

    async fn find_rebroadcast_candidates(
        &self,
        now: i64,
        version: &str,
        limit: usize,
    ) -> Result<Vec<Task>> {
        let docs = self.docs.lock().await;
        let mut tasks = Vec::new();
        let due = docs.iter().filter(|(_, doc)| {
            has_status(doc, &[TaskStatus::Queued])
                && field_str(doc, keys::VERSION) == Some(version)
                && field_i64(doc, keys::NEXT_BROADCAST).unwrap_or(0) < now
                && field_i64(doc, keys::EXPIRY).is_some_and(|e| e > now)
                && is_absent(doc, keys::DELEGATE_ID)
        });
        for (id, doc) in due {
            if tasks.len() >= limit {
                break;
            }
            match serde_json::from_value::<Task>(doc.clone()) {
                Ok(task) => tasks.push(task),
                Err(e) => warn!(task_id = %id, error = %e, "skipping unreadable task"),
            }
        }
        Ok(tasks)
    }

    async fn fetch_tasks(&self, ids: &[TaskId]) -> Result<Vec<Task>> {
        let docs = self.docs.lock().await;
        let mut tasks = Vec::with_capacity(ids.len());
        for (id, doc) in docs.iter() {
            if ids.contains(id) {
                tasks.push(serde_json::from_value(doc.clone())?);
            }
        }
        Ok(tasks)
    }

    async fn read_task(&self, id: TaskId) -> Result<TaskRead> {
        Ok(match self.raw(id).await {
            Some(doc) => TaskRead::from_document(doc),
            None => TaskRead::Unreadable,
        })
    }

    async fn find_and_modify(
        &self,
        filter: &TaskFilter,
        update: &TaskUpdate,
    ) -> Result<Option<Task>> {
        let mut docs = self.docs.lock().await;
        let Some((_, doc)) = docs.iter_mut().find(|(_, doc)| filter.matches(doc)) else {
            return Ok(None);
        };
        update.apply_to(doc);
        Ok(Some(serde_json::from_value(doc.clone())?))
    }

    async fn delete_by_ids(&self, ids: &[TaskId]) -> Result<Vec<TaskId>> {
        let mut docs = self.docs.lock().await;
        let mut deleted = Vec::new();
        docs.retain(|(id, _)| {
            if ids.contains(id) {
                deleted.push(*id);
                false
            } else {
                true
            }
        });
        Ok(deleted)
    }
}
