//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Topic error: {0}")]
    Topic(#[from] mdmux_core::CoreError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] mdmux_persistence::PersistenceError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] mdmux_telemetry::TelemetryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
