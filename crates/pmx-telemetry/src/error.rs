//! Error types for pmx-telemetry.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("logging init failed: {0}")]
    LoggingInit(String),

    #[error("metrics encode failed: {0}")]
    MetricsEncode(#[from] prometheus::Error),
}

pub type TelemetryResult<T> = std::result::Result<T, TelemetryError>;
