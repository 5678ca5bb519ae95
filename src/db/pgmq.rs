//! pgmq queue operations via direct SQLx.
//!
//! The manager only produces: broadcasts for delegates and outcomes for
//! task waiters. Consumers live elsewhere.

use crate::error::Result;
use crate::telemetry::metrics;
use opentelemetry::KeyValue;

impl super::Db {
    /// Create a pgmq queue (idempotent).
    pub async fn create_queue(&self, queue_name: &str) -> Result<()> {
        sqlx::query("SELECT pgmq.create($1)")
            .bind(queue_name)
            .execute(&self.pool)
            .await?;
        metrics::queue_operations().add(
            1,
            &[
                KeyValue::new("queue", queue_name.to_string()),
                KeyValue::new("operation", "create"),
            ],
        );
        Ok(())
    }

    /// Send a message to a pgmq queue. Returns the message ID.
    /// delay_seconds: 0 for immediate, >0 for delayed delivery.
    pub async fn send_to_queue(
        &self,
        queue_name: &str,
        payload: &serde_json::Value,
        delay_seconds: i32,
    ) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT pgmq.send($1, $2, $3)")
            .bind(queue_name)
            .bind(payload)
            .bind(delay_seconds)
            .fetch_one(&self.pool)
            .await?;
        metrics::queue_operations().add(
            1,
            &[
                KeyValue::new("queue", queue_name.to_string()),
                KeyValue::new("operation", "send"),
            ],
        );
        Ok(row.0)
    }
}
