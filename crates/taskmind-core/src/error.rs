//! Error types shared by every TaskMind crate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TaskMindError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for TaskMindError {
    fn from(e: serde_json::Error) -> Self {
        TaskMindError::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TaskMindError>;
