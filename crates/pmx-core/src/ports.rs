//! Interfaces the engine consumes from its collaborators.
//!
//! Broker plumbing, database schemas and config-file management live behind
//! these traits; the engine only sees typed operations and typed failures.

use crate::{Fill, MarketId, MarketTick, OrderId, OrderRequest, Position, PositionId, Price};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc;

/// Market data source failures.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("subscribe failed: {0}")]
    SubscribeFailed(String),

    #[error("poll failed: {0}")]
    PollFailed(String),

    #[error("request timed out after {0}ms")]
    Timeout(u64),
}

pub type SourceResult<T> = std::result::Result<T, SourceError>;

/// Market data source: one push channel plus a polling fallback.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Establish the transport.
    async fn connect(&self) -> SourceResult<()>;

    /// Authenticate the established transport.
    async fn authenticate(&self) -> SourceResult<()>;

    /// Subscribe to the given markets and return the push tick stream.
    /// Each call replaces any previous stream.
    async fn subscribe(&self, markets: &[MarketId]) -> SourceResult<mpsc::Receiver<MarketTick>>;

    /// Fetch every update for a market since `since`, oldest first.
    /// Ticks returned here must carry `TickSource::Poll`.
    async fn poll_since(
        &self,
        market: &MarketId,
        since: DateTime<Utc>,
    ) -> SourceResult<Vec<MarketTick>>;
}

/// Order gateway failures.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Transient: retried once with backoff before aborting.
    #[error("gateway request timed out after {0}ms")]
    Timeout(u64),

    /// Transient: rate limited by the broker.
    #[error("rate limited")]
    RateLimited,

    /// Terminal for the order: invalid price, closed market, etc.
    #[error("order rejected: {0}")]
    Rejected(String),

    /// Cancel/amend raced a fill; the fill is authoritative.
    #[error("order already filled")]
    AlreadyFilled,

    #[error("transport error: {0}")]
    Transport(String),
}

impl GatewayError {
    /// Transient errors get exactly one local retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::RateLimited)
    }
}

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Order gateway. All prices and quantities are fixed-point decimal.
#[async_trait]
pub trait OrderGateway: Send + Sync {
    async fn place_order(&self, request: &OrderRequest) -> GatewayResult<OrderId>;

    async fn amend_order(&self, order_id: &OrderId, new_price: Price) -> GatewayResult<()>;

    async fn cancel_order(&self, order_id: &OrderId) -> GatewayResult<()>;

    /// All fills recorded so far for an order, oldest first.
    async fn fills(&self, order_id: &OrderId) -> GatewayResult<Vec<Fill>>;
}

/// Position store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Optimistic-concurrency conflict: another writer got there first.
    /// Handled by skip-and-retry-next-tick, never silently applied.
    #[error("version mismatch for {id}: expected {expected}, actual {actual}")]
    VersionMismatch {
        id: PositionId,
        expected: u64,
        actual: u64,
    },

    #[error("position not found: {0}")]
    NotFound(PositionId),

    #[error("store backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Position store with optimistic versioning.
#[async_trait]
pub trait PositionStore: Send + Sync {
    async fn open_positions(&self) -> StoreResult<Vec<Position>>;

    async fn get(&self, id: &PositionId) -> StoreResult<Position>;

    async fn insert(&self, position: Position) -> StoreResult<()>;

    /// Compare-and-swap on the version counter. On success returns the new
    /// version; on conflict returns `StoreError::VersionMismatch`.
    async fn update(&self, position: &Position, expected_version: u64) -> StoreResult<u64>;

    /// Terminal transition: mark closed and archive.
    async fn close(&self, id: &PositionId, exit_price: Price, reason: &str) -> StoreResult<()>;
}
