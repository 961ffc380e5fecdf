//! Core domain types for the pmx execution engine.
//!
//! This crate provides the fundamental types used throughout the system:
//! - `Price`, `Qty`: fixed-point (4 dp) numeric types for the money path
//! - `MarketId`, `Side`: binary prediction-market identifiers
//! - `Position`, `TrailingStopState`: open exposure and its stop state
//! - `MarketTick`, `ConnectionHealth`: market data and feed health
//! - `StrategyConfig`, `ConfigStore`: immutable versioned strategy bundles
//! - the consumed external-interface traits (`MarketDataSource`,
//!   `OrderGateway`, `PositionStore`)

pub mod config;
pub mod decimal;
pub mod error;
pub mod events;
pub mod health;
pub mod market;
pub mod order;
pub mod ports;
pub mod position;
pub mod signal;
pub mod tick;

pub use config::{
    BreakerThresholds, ConfigStore, ConfigVersion, CorrelationCaps, CorrelationTier,
    EntryThresholds, ExitThresholds, StrategyConfig,
};
pub use decimal::{Price, Qty, PRICE_SCALE};
pub use error::{CoreError, Result};
pub use events::EngineEvent;
pub use health::{ConnState, ConnectionHealth};
pub use market::{MarketId, Side};
pub use order::{aggregate_fills, ClientOrderId, Fill, OrderId, OrderKind, OrderRequest};
pub use ports::{
    GatewayError, GatewayResult, MarketDataSource, OrderGateway, PositionStore, SourceError,
    SourceResult, StoreError, StoreResult,
};
pub use position::{Position, PositionId, PositionStatus, TrailingStopState};
pub use signal::{ExitCondition, ExitPriority, ExitSignal};
pub use tick::{MarketTick, TickSource};
