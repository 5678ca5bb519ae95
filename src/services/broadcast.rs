//! Task broadcast over pgmq, with step backoff between rounds.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::BroadcastHelper;
use crate::db::Db;
use crate::error::Result;
use crate::model::Task;

/// pgmq queue delegates poll for announcements.
pub const BROADCAST_QUEUE: &str = "delegate_broadcast";

/// Step backoff between broadcast rounds, indexed by `broadcastCount`.
/// Rounds past the end of the schedule reuse `ceiling`.
#[derive(Debug, Clone)]
pub struct BroadcastBackoff {
    pub steps: Vec<Duration>,
    pub ceiling: Duration,
}

impl Default for BroadcastBackoff {
    fn default() -> Self {
        Self {
            steps: vec![
                Duration::from_secs(5),
                Duration::from_secs(30),
                Duration::from_secs(60),
                Duration::from_secs(120),
                Duration::from_secs(300),
            ],
            ceiling: Duration::from_secs(600),
        }
    }
}

impl BroadcastBackoff {
    /// Delay before the round after `broadcast_count` rounds have happened.
    pub fn delay(&self, broadcast_count: i64) -> Duration {
        usize::try_from(broadcast_count)
            .ok()
            .and_then(|i| self.steps.get(i).copied())
            .unwrap_or(self.ceiling)
    }

    pub fn next_broadcast(&self, broadcast_count: i64, now: i64) -> i64 {
        let delay_ms = i64::try_from(self.delay(broadcast_count).as_millis()).unwrap_or(i64::MAX);
        now.saturating_add(delay_ms)
    }
}

/// Publishes task announcements to the [`BROADCAST_QUEUE`] pgmq queue.
pub struct PgmqBroadcaster {
    db: Arc<Db>,
    backoff: BroadcastBackoff,
}

impl PgmqBroadcaster {
    pub fn new(db: Arc<Db>, backoff: BroadcastBackoff) -> Self {
        Self { db, backoff }
    }
}

#[async_trait]
impl BroadcastHelper for PgmqBroadcaster {
    async fn rebroadcast_delegate_task(&self, task: &Task) -> Result<()> {
        let payload = serde_json::json!({
            "taskId": task.uuid,
            "accountId": task.account_id,
            "taskTypeGroup": task.task_type_group,
            "preAssignedDelegateId": task.pre_assigned_delegate_id,
            "mustExecuteOnDelegateId": task.must_execute_on_delegate_id,
            "broadcastCount": task.broadcast_count,
        });
        let msg_id = self.db.send_to_queue(BROADCAST_QUEUE, &payload, 0).await?;
        debug!(task_id = %task.uuid, msg_id, "task broadcast");
        Ok(())
    }

    fn find_next_broadcast_time_for_task(&self, task: &Task, now: i64) -> i64 {
        self.backoff.next_broadcast(task.broadcast_count, now)
    }
}
