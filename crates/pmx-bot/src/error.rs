//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("feed error: {0}")]
    Feed(#[from] pmx_feed::FeedError),

    #[error("engine error: {0}")]
    Engine(#[from] pmx_engine::EngineError),

    #[error("telemetry error: {0}")]
    Telemetry(#[from] pmx_telemetry::TelemetryError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
