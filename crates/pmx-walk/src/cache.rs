//! Shared latest-tick cache.
//!
//! The monitor loop writes every incoming tick; in-flight walks read from
//! here so an amend is always priced off the freshest quote rather than
//! the snapshot that triggered the exit.

use dashmap::DashMap;
use pmx_core::{MarketId, MarketTick};

#[derive(Default)]
pub struct TickCache {
    latest: DashMap<MarketId, MarketTick>,
}

impl TickCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a tick if it is newer than what we have.
    pub fn insert(&self, tick: MarketTick) {
        match self.latest.entry(tick.market.clone()) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                if tick.timestamp >= entry.get().timestamp {
                    entry.insert(tick);
                }
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(tick);
            }
        }
    }

    pub fn latest(&self, market: &MarketId) -> Option<MarketTick> {
        self.latest.get(market).map(|t| t.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pmx_core::{Price, Qty, TickSource};
    use rust_decimal_macros::dec;

    fn tick(bid: rust_decimal::Decimal) -> MarketTick {
        MarketTick::new(
            MarketId::from("M"),
            Price::new(bid),
            Price::new(bid + dec!(0.02)),
            Qty::new(dec!(100)),
            TickSource::Push,
        )
    }

    #[test]
    fn test_older_tick_does_not_replace_newer() {
        let cache = TickCache::new();
        let newer = tick(dec!(0.50));
        let mut older = tick(dec!(0.40));
        older.timestamp = newer.timestamp - Duration::seconds(5);

        cache.insert(newer.clone());
        cache.insert(older);
        assert_eq!(cache.latest(&MarketId::from("M")), Some(newer));
    }
}
