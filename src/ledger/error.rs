use thiserror::Error;

use crate::task::TaskId;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Task already exists: {0}")]
    DuplicateTask(TaskId),

    #[error("Corrupt record under key {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LedgerError>;
