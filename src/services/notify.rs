//! Outcome delivery to task waiters over pgmq.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use super::OutcomeNotifier;
use crate::db::Db;
use crate::error::Result;
use crate::model::DelegateId;
use crate::model::response::TaskResponse;

/// pgmq queue the waiting side consumes, keyed by `waitId`.
pub const OUTCOME_QUEUE: &str = "task_outcomes";

/// Sends task responses to the [`OUTCOME_QUEUE`] pgmq queue.
pub struct PgmqOutcomeNotifier {
    db: Arc<Db>,
}

impl PgmqOutcomeNotifier {
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl OutcomeNotifier for PgmqOutcomeNotifier {
    async fn handle_response(
        &self,
        wait_id: &str,
        previous_delegate_id: Option<&DelegateId>,
        response: &TaskResponse,
    ) -> Result<()> {
        let payload = serde_json::json!({
            "waitId": wait_id,
            "delegateId": previous_delegate_id,
            "response": response,
        });
        let msg_id = self.db.send_to_queue(OUTCOME_QUEUE, &payload, 0).await?;
        info!(
            task_id = %response.task_id,
            wait_id,
            code = ?response.code,
            msg_id,
            "task outcome delivered"
        );
        Ok(())
    }
}
