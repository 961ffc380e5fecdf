//! Error types for pmx-core.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("decimal parse error: {0}")]
    DecimalParse(#[from] rust_decimal::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
