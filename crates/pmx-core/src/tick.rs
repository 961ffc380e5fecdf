//! Market tick snapshots.

use crate::{MarketId, Price, Qty, Side};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a tick came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TickSource {
    /// Live push channel.
    Push,
    /// Polling fallback (or gap replay).
    Poll,
}

/// Immutable best bid/ask snapshot for one market.
///
/// Prices are quoted in yes-probability space. Use `bid_for`/`ask_for` to
/// read them from the perspective of the side a position holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketTick {
    pub market: MarketId,
    pub bid: Price,
    pub ask: Price,
    pub volume: Qty,
    pub timestamp: DateTime<Utc>,
    pub source: TickSource,
    /// Set by the data source when it knows the quote is not current.
    pub stale: bool,
}

impl MarketTick {
    pub fn new(market: MarketId, bid: Price, ask: Price, volume: Qty, source: TickSource) -> Self {
        Self {
            market,
            bid,
            ask,
            volume,
            timestamp: Utc::now(),
            source,
            stale: false,
        }
    }

    /// Mid price: (bid + ask) / 2.
    pub fn mid(&self) -> Price {
        Price::new((self.bid.inner() + self.ask.inner()) / rust_decimal::Decimal::TWO)
    }

    /// Spread: ask - bid.
    pub fn spread(&self) -> Price {
        self.ask - self.bid
    }

    /// Best bid from `side`'s perspective: the price a holder of `side`
    /// could sell at right now. For `No` this is the complement of the ask.
    pub fn bid_for(&self, side: Side) -> Price {
        match side {
            Side::Yes => self.bid,
            Side::No => self.ask.complement(),
        }
    }

    /// Best ask from `side`'s perspective: the price a buyer of `side`
    /// would pay right now. For `No` this is the complement of the bid.
    pub fn ask_for(&self, side: Side) -> Price {
        match side {
            Side::Yes => self.ask,
            Side::No => self.bid.complement(),
        }
    }

    /// Age of this tick in milliseconds relative to `now`.
    pub fn age_ms(&self, now: DateTime<Utc>) -> i64 {
        (now - self.timestamp).num_milliseconds()
    }

    /// A tick is stale when the source flagged it or it is older than
    /// the staleness window.
    pub fn is_stale(&self, now: DateTime<Utc>, staleness_window_ms: i64) -> bool {
        self.stale || self.age_ms(now) > staleness_window_ms
    }

    /// Book validity: both sides present and bid < ask.
    pub fn is_valid_book(&self) -> bool {
        self.bid.is_positive() && self.ask.is_positive() && self.bid < self.ask
    }
}
