//! Position records and trailing-stop state.

use crate::config::ConfigVersion;
use crate::{MarketId, MarketTick, Price, Qty, Side};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Stable business identifier for a position. Never changes across updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PositionId(Uuid);

impl PositionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PositionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PositionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
    Open,
    /// An exit walk is in flight.
    Closing,
    Closed,
}

/// Trailing stop owned 1:1 by a position.
///
/// All prices are in the position's own side space, so the position is
/// always "long": favorable moves are up, and once activated the stop only
/// tightens toward the market, never loosens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrailingStopState {
    pub enabled: bool,
    /// Favorable price at which the stop arms.
    pub activation_price: Price,
    /// Distance the stop trails behind the best favorable price.
    pub stop_distance: Price,
    /// Current stop level. `None` until activated.
    pub current_stop: Option<Price>,
    /// Best favorable exit price seen so far.
    pub highest_favorable: Option<Price>,
}

impl TrailingStopState {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            activation_price: Price::ZERO,
            stop_distance: Price::ZERO,
            current_stop: None,
            highest_favorable: None,
        }
    }

    pub fn new(activation_price: Price, stop_distance: Price) -> Self {
        Self {
            enabled: true,
            activation_price,
            stop_distance,
            current_stop: None,
            highest_favorable: None,
        }
    }

    /// Record a favorable price observation and recompute the stop.
    ///
    /// Invariant: `current_stop` is monotonically non-decreasing once set.
    /// Returns true when the stop moved.
    pub fn observe(&mut self, favorable: Price) -> bool {
        if !self.enabled {
            return false;
        }

        let best = match self.highest_favorable {
            Some(h) if h >= favorable => h,
            _ => {
                self.highest_favorable = Some(favorable);
                favorable
            }
        };

        if best < self.activation_price {
            return false;
        }

        let candidate = best - self.stop_distance;
        match self.current_stop {
            Some(current) if current >= candidate => false,
            _ => {
                self.current_stop = Some(candidate);
                true
            }
        }
    }

    /// Whether the stop is armed and the current exit price has fallen
    /// through it.
    pub fn breached(&self, exit_price: Price) -> bool {
        matches!(self.current_stop, Some(stop) if exit_price <= stop)
    }
}

/// One open or closed market exposure.
///
/// `entry_price` and `mark_price` are in the position's own side space
/// (the price of the outcome held, not the yes quote).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    /// Optimistic-concurrency counter, bumped by the store on every update.
    pub version: u64,
    pub market: MarketId,
    pub side: Side,
    pub quantity: Qty,
    pub entry_price: Price,
    pub mark_price: Price,
    pub unrealized_pnl: Decimal,
    pub opened_at: DateTime<Utc>,
    /// Market settlement time, when known.
    pub expires_at: Option<DateTime<Utc>>,
    /// Model confidence at the last strategy refresh, in `[0, 1]`.
    pub model_confidence: Decimal,
    /// Strategy config version active at entry. Immutable for the life of
    /// the position (SCD-2 style attribution).
    pub config_version: ConfigVersion,
    pub status: PositionStatus,
    pub trailing: TrailingStopState,
    /// Last time `mark_price` was refreshed from a tick.
    pub last_mark_update: DateTime<Utc>,
}

impl Position {
    pub fn new(
        market: MarketId,
        side: Side,
        quantity: Qty,
        entry_price: Price,
        config_version: ConfigVersion,
        trailing: TrailingStopState,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: PositionId::new(),
            version: 0,
            market,
            side,
            quantity,
            entry_price,
            mark_price: entry_price,
            unrealized_pnl: Decimal::ZERO,
            opened_at: now,
            expires_at: None,
            model_confidence: Decimal::ONE,
            config_version,
            status: PositionStatus::Open,
            trailing,
            last_mark_update: now,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Price this position could exit at right now.
    pub fn exit_price(&self, tick: &MarketTick) -> Price {
        tick.bid_for(self.side)
    }

    /// Refresh mark price and unrealized P&L from a tick.
    pub fn apply_mark(&mut self, tick: &MarketTick, now: DateTime<Utc>) {
        self.mark_price = self.exit_price(tick);
        self.unrealized_pnl =
            (self.mark_price.inner() - self.entry_price.inner()) * self.quantity.inner();
        self.last_mark_update = now;
    }

    /// Unrealized gain as a percentage of entry. Negative for a loss.
    pub fn pnl_pct(&self) -> Option<Decimal> {
        self.mark_price.pct_from(self.entry_price)
    }

    /// Reduce quantity after a partial exit fill.
    pub fn reduce(&mut self, filled: Qty) {
        self.quantity = self.quantity.saturating_sub(filled);
    }

    /// Milliseconds since the mark price was last refreshed.
    pub fn mark_age_ms(&self, now: DateTime<Utc>) -> i64 {
        (now - self.last_mark_update).num_milliseconds()
    }
}
