//! Order types and identifiers.

use crate::{MarketId, Price, Qty, Side};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Broker-assigned order identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(String);

impl OrderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Client order ID for idempotency.
///
/// CRITICAL: every order must carry a unique cloid so a retry after a
/// gateway timeout can never double-submit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientOrderId(String);

impl ClientOrderId {
    /// Create a new unique client order ID.
    ///
    /// Format: `pmx_{timestamp_ms}_{uuid_short}`
    pub fn new() -> Self {
        let ts = Utc::now().timestamp_millis();
        let uuid_short = &Uuid::new_v4().to_string()[..8];
        Self(format!("pmx_{ts}_{uuid_short}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ClientOrderId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Order kind accepted by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderKind {
    /// Resting limit order.
    Limit,
    /// Aggressively priced order guaranteed to fill (crosses the spread).
    Marketable,
}

impl fmt::Display for OrderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Limit => write!(f, "limit"),
            Self::Marketable => write!(f, "marketable"),
        }
    }
}

/// Order request submitted to the gateway.
///
/// `side` is the outcome being sold or bought; `selling` distinguishes an
/// exit (sell) from an entry (buy) of that outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub client_id: ClientOrderId,
    pub market: MarketId,
    pub side: Side,
    pub selling: bool,
    pub price: Price,
    pub qty: Qty,
    pub kind: OrderKind,
}

impl OrderRequest {
    /// Limit sell of `side` at `price` (exit path).
    pub fn exit_limit(market: MarketId, side: Side, price: Price, qty: Qty) -> Self {
        Self {
            client_id: ClientOrderId::new(),
            market,
            side,
            selling: true,
            price,
            qty,
            kind: OrderKind::Limit,
        }
    }

    /// Marketable sell of `side` (forced exit).
    pub fn exit_marketable(market: MarketId, side: Side, price: Price, qty: Qty) -> Self {
        Self {
            client_id: ClientOrderId::new(),
            market,
            side,
            selling: true,
            price,
            qty,
            kind: OrderKind::Marketable,
        }
    }

    /// Limit buy of `side` at `price` (entry path).
    pub fn entry_limit(market: MarketId, side: Side, price: Price, qty: Qty) -> Self {
        Self {
            client_id: ClientOrderId::new(),
            market,
            side,
            selling: false,
            price,
            qty,
            kind: OrderKind::Limit,
        }
    }
}

/// One fill reported by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fill {
    pub qty: Qty,
    pub price: Price,
    pub timestamp: DateTime<Utc>,
}

impl Fill {
    pub fn new(qty: Qty, price: Price) -> Self {
        Self {
            qty,
            price,
            timestamp: Utc::now(),
        }
    }
}

/// Sum fills into (total qty, volume-weighted average price).
pub fn aggregate_fills(fills: &[Fill]) -> (Qty, Price) {
    let mut total = Qty::ZERO;
    let mut notional = rust_decimal::Decimal::ZERO;
    for fill in fills {
        total = total + fill.qty;
        notional += fill.qty.notional(fill.price);
    }
    if total.is_zero() {
        (Qty::ZERO, Price::ZERO)
    } else {
        (total, Price::new(notional / total.inner()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_client_order_id_unique() {
        assert_ne!(ClientOrderId::new(), ClientOrderId::new());
    }

    #[test]
    fn test_client_order_id_format() {
        assert!(ClientOrderId::new().as_str().starts_with("pmx_"));
    }

    #[test]
    fn test_aggregate_fills_vwap() {
        let fills = vec![
            Fill::new(Qty::new(dec!(10)), Price::new(dec!(0.50))),
            Fill::new(Qty::new(dec!(30)), Price::new(dec!(0.54))),
        ];
        let (qty, avg) = aggregate_fills(&fills);
        assert_eq!(qty, Qty::new(dec!(40)));
        assert_eq!(avg, Price::new(dec!(0.53)));
    }

    #[test]
    fn test_aggregate_fills_empty() {
        let (qty, avg) = aggregate_fills(&[]);
        assert_eq!(qty, Qty::ZERO);
        assert_eq!(avg, Price::ZERO);
    }
}
