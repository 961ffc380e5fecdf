//! Error types for pmx-engine.

use pmx_core::{ConfigVersion, GatewayError, MarketId, StoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("entry blocked: {0}")]
    EntryBlocked(String),

    #[error("entry order did not fill")]
    EntryUnfilled,

    #[error("no market data for {0}")]
    NoMarketData(MarketId),

    #[error("unknown config version {0}")]
    UnknownConfigVersion(ConfigVersion),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
