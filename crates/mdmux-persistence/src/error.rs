//! Persistence error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Write task failed: {0}")]
    Task(String),
}

pub type PersistenceResult<T> = Result<T, PersistenceError>;
