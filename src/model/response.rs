//! Response envelopes handed to whoever is waiting on a task.

use serde::{Deserialize, Serialize};

use super::{AccountId, TaskId};

/// Outcome code of a task response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseCode {
    Failed,
}

/// Why the assignment service is being asked to explain a task's fate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssignmentReason {
    Expired,
}

/// Envelope delivered to the waiter of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResponse {
    pub task_id: TaskId,
    /// Unknown when the stored task could only be partially read.
    pub account_id: Option<AccountId>,
    pub code: ResponseCode,
    pub error_message: Option<String>,
    #[serde(default)]
    pub expired: bool,
}

impl TaskResponse {
    /// A FAILED response for a task that ran out of time.
    pub fn expired(task_id: TaskId, account_id: Option<AccountId>, message: String) -> Self {
        Self {
            task_id,
            account_id,
            code: ResponseCode::Failed,
            error_message: Some(message),
            expired: true,
        }
    }
}
