//! Error types for delegate-queue.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("unreadable task document: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("delegate assignment failed: {0}")]
    Assignment(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
