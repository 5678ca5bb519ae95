//! Delegate registry and selection audit tables.

use crate::error::Result;
use crate::model::{AccountId, DelegateId};
use crate::services::SelectionLogBatch;

/// A registered delegate, as last reported by its heartbeat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegateRecord {
    pub id: DelegateId,
    pub account_id: AccountId,
    /// Epoch millis of the last heartbeat.
    pub last_heartbeat: i64,
    /// Task type groups served; empty serves every group.
    pub task_groups: Vec<String>,
}

type DelegateRow = (String, String, i64, Vec<String>);

fn into_record((id, account_id, last_heartbeat, task_groups): DelegateRow) -> DelegateRecord {
    DelegateRecord {
        id: DelegateId(id),
        account_id: AccountId(account_id),
        last_heartbeat,
        task_groups,
    }
}

impl super::Db {
    /// Enabled delegates of the account that heartbeated at or after
    /// `heartbeat_after`, most recent first.
    pub async fn active_delegates(
        &self,
        account_id: &AccountId,
        heartbeat_after: i64,
    ) -> Result<Vec<DelegateRecord>> {
        let rows: Vec<DelegateRow> = sqlx::query_as(
            "SELECT uuid, account_id, last_heartbeat, task_groups FROM delegates
             WHERE account_id = $1 AND status = 'ENABLED' AND last_heartbeat >= $2
             ORDER BY last_heartbeat DESC",
        )
        .bind(account_id.as_str())
        .bind(heartbeat_after)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(into_record).collect())
    }

    /// One enabled delegate of the account, regardless of heartbeat.
    pub async fn delegate(
        &self,
        account_id: &AccountId,
        delegate_id: &DelegateId,
    ) -> Result<Option<DelegateRecord>> {
        let row: Option<DelegateRow> = sqlx::query_as(
            "SELECT uuid, account_id, last_heartbeat, task_groups FROM delegates
             WHERE account_id = $1 AND uuid = $2 AND status = 'ENABLED'",
        )
        .bind(account_id.as_str())
        .bind(delegate_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(into_record))
    }

    /// Register or refresh a delegate.
    pub async fn upsert_delegate(&self, delegate: &DelegateRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO delegates (uuid, account_id, status, last_heartbeat, task_groups)
             VALUES ($1, $2, 'ENABLED', $3, $4)
             ON CONFLICT (uuid) DO UPDATE
             SET account_id = EXCLUDED.account_id,
                 status = 'ENABLED',
                 last_heartbeat = EXCLUDED.last_heartbeat,
                 task_groups = EXCLUDED.task_groups",
        )
        .bind(delegate.id.as_str())
        .bind(delegate.account_id.as_str())
        .bind(delegate.last_heartbeat)
        .bind(&delegate.task_groups)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Persist every entry of a selection batch in one transaction.
    pub async fn insert_selection_logs(&self, batch: &SelectionLogBatch) -> Result<()> {
        if batch.entries.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        let now = chrono::Utc::now();
        for entry in &batch.entries {
            sqlx::query(
                "INSERT INTO selection_logs (task_id, account_id, delegate_id, conclusion, message, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(batch.task_id.0)
            .bind(batch.account_id.as_str())
            .bind(entry.delegate_id.as_str())
            .bind(&entry.conclusion)
            .bind(&entry.message)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
