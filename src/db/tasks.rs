//! Task collection over Postgres.
//!
//! Each task is one `jsonb` document in `delegate_tasks.body`. The columns
//! the engine queries on are generated from the body, so a conditional
//! update only ever writes the document and the projections follow.

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::error::Result;
use crate::model::{Task, TaskId, TaskStatus};
use crate::store::{Sampling, TaskFilter, TaskRead, TaskStore, TaskUpdate};

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn uuids(ids: &[TaskId]) -> Vec<Uuid> {
    ids.iter().map(|id| id.0).collect()
}

fn decode_readable(rows: Vec<(Uuid, Value)>) -> Vec<Task> {
    rows.into_iter()
        .filter_map(|(id, body)| match serde_json::from_value::<Task>(body) {
            Ok(task) => Some(task),
            Err(e) => {
                warn!(task_id = %id, error = %e, "skipping unreadable task");
                None
            }
        })
        .collect()
}

#[async_trait]
impl TaskStore for super::Db {
    async fn insert(&self, task: &Task) -> Result<()> {
        let body = serde_json::to_value(task)?;
        sqlx::query("INSERT INTO delegate_tasks (uuid, body) VALUES ($1, $2)")
            .bind(task.uuid.0)
            .bind(&body)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>> {
        let row: Option<(Value,)> = sqlx::query_as("SELECT body FROM delegate_tasks WHERE uuid = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some((body,)) => Ok(Some(serde_json::from_value(body)?)),
            None => Ok(None),
        }
    }

    async fn list(&self, status: Option<TaskStatus>, limit: usize) -> Result<Vec<Task>> {
        let rows: Vec<(Uuid, Value)> = sqlx::query_as(
            "SELECT uuid, body FROM delegate_tasks
             WHERE ($1::text IS NULL OR status = $1)
             ORDER BY created_at
             LIMIT $2",
        )
        .bind(status.map(|s| s.as_str()))
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(decode_readable(rows))
    }

    async fn find_expired_started(&self, now: i64, limit: usize) -> Result<Vec<TaskId>> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT uuid FROM delegate_tasks
             WHERE status = 'STARTED' AND expiry < $1
             LIMIT $2",
        )
        .bind(now)
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| TaskId(id)).collect())
    }

    async fn find_long_queued(
        &self,
        now: i64,
        sampling: Option<Sampling>,
        limit: usize,
    ) -> Result<Vec<TaskId>> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT uuid FROM delegate_tasks
             WHERE status IN ('QUEUED', 'PARKED') AND expiry < $1
               AND ($2::bigint IS NULL OR ((created_at % $2) + $2) % $2 = $3)
             LIMIT $4",
        )
        .bind(now)
        .bind(sampling.map(|s| s.modulus))
        .bind(sampling.map(|s| s.remainder))
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| TaskId(id)).collect())
    }

    async fn find_rebroadcast_candidates(
        &self,
        now: i64,
        version: &str,
        limit: usize,
    ) -> Result<Vec<Task>> {
        let rows: Vec<(Uuid, Value)> = sqlx::query_as(
            "SELECT uuid, body FROM delegate_tasks
             WHERE status = 'QUEUED' AND version = $2
               AND next_broadcast < $1 AND expiry > $1
               AND delegate_id IS NULL
             ORDER BY next_broadcast
             LIMIT $3",
        )
        .bind(now)
        .bind(version)
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(decode_readable(rows))
    }

    async fn fetch_tasks(&self, ids: &[TaskId]) -> Result<Vec<Task>> {
        let rows: Vec<(Value,)> = sqlx::query_as(
            "SELECT body FROM delegate_tasks WHERE uuid = ANY($1) ORDER BY created_at",
        )
        .bind(uuids(ids))
        .fetch_all(&self.pool)
        .await?;
        let mut tasks = Vec::with_capacity(rows.len());
        for (body,) in rows {
            tasks.push(serde_json::from_value(body)?);
        }
        Ok(tasks)
    }

    async fn read_task(&self, id: TaskId) -> Result<TaskRead> {
        let row: Option<(Value,)> = sqlx::query_as("SELECT body FROM delegate_tasks WHERE uuid = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(match row {
            Some((body,)) => TaskRead::from_document(body),
            None => TaskRead::Unreadable,
        })
    }

    async fn find_and_modify(
        &self,
        filter: &TaskFilter,
        update: &TaskUpdate,
    ) -> Result<Option<Task>> {
        let sets = Value::Object(update.sets().clone());
        let unsets: Vec<String> = update.unsets().map(str::to_string).collect();
        let row: Option<(Value,)> = sqlx::query_as(
            "UPDATE delegate_tasks
             SET body = (body || $2::jsonb) - $3::text[]
             WHERE uuid = $1
               AND ($4::text IS NULL OR account_id = $4)
               AND ($5::text IS NULL OR status = $5)
               AND ($6::bigint IS NULL OR broadcast_count = $6)
             RETURNING body",
        )
        .bind(filter.uuid.0)
        .bind(&sets)
        .bind(&unsets)
        .bind(filter.account_id.as_ref().map(|a| a.as_str()))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.broadcast_count)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some((body,)) => Ok(Some(serde_json::from_value(body)?)),
            None => Ok(None),
        }
    }

    async fn delete_by_ids(&self, ids: &[TaskId]) -> Result<Vec<TaskId>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows: Vec<(Uuid,)> =
            sqlx::query_as("DELETE FROM delegate_tasks WHERE uuid = ANY($1) RETURNING uuid")
                .bind(uuids(ids))
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(id,)| TaskId(id)).collect())
    }
}
