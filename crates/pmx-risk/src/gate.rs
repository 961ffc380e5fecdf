//! The risk gate.
//!
//! A pure decision function: callers hand it everything it needs (the
//! request, the latest tick, balances, correlated exposure, breaker state)
//! and get back `Ok` or a [`BlockReason`] carrying the measured value and
//! the threshold it broke.
//!
//! Entries face every check. Escalations reduce exposure, so they are only
//! stopped by things that make the order itself unsafe: a broken book, an
//! out-of-bounds price, or a gateway that keeps failing.

use crate::breakers::{BreakerTrip, CircuitBreakers};
use chrono::{DateTime, Utc};
use pmx_core::{
    CorrelationTier, MarketTick, OrderRequest, Price, Qty, StrategyConfig,
};
use rust_decimal::Decimal;
use thiserror::Error;

/// Why an action was blocked. The Display form goes straight into events
/// and logs, so every variant names the value and the limit.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BlockReason {
    #[error("breaker tripped: {0}")]
    Breaker(BreakerTrip),

    #[error("insufficient balance: need {required}, have {available}")]
    InsufficientBalance {
        required: Decimal,
        available: Decimal,
    },

    #[error("position too large: {qty} contracts, cap {cap}")]
    PositionTooLarge { qty: Qty, cap: Qty },

    #[error("correlation cap exceeded ({tier}): exposure would be {would_be}, cap {cap}")]
    CorrelationCap {
        tier: CorrelationTier,
        would_be: Decimal,
        cap: Decimal,
    },

    #[error("market data too old: {age_ms}ms, max {max_ms}ms")]
    StaleData { age_ms: i64, max_ms: i64 },

    #[error("book invalid: bid {bid}, ask {ask}")]
    InvalidBook { bid: Price, ask: Price },

    #[error("price out of probability bounds: {0}")]
    PriceOutOfBounds(Price),

    #[error("spread too wide: {spread}, max {max}")]
    SpreadTooWide { spread: Price, max: Price },
}

impl BlockReason {
    /// Stable label for metrics.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Breaker(_) => "breaker",
            Self::InsufficientBalance { .. } => "insufficient_balance",
            Self::PositionTooLarge { .. } => "position_too_large",
            Self::CorrelationCap { .. } => "correlation_cap",
            Self::StaleData { .. } => "stale_data",
            Self::InvalidBook { .. } => "invalid_book",
            Self::PriceOutOfBounds(_) => "price_out_of_bounds",
            Self::SpreadTooWide { .. } => "spread_too_wide",
        }
    }
}

/// Everything an entry decision needs.
pub struct EntryCheck<'a> {
    pub request: &'a OrderRequest,
    pub tick: &'a MarketTick,
    pub available_balance: Decimal,
    /// Existing notional in markets sharing `correlation_tier` with the
    /// candidate market.
    pub correlated_notional: Decimal,
    pub correlation_tier: CorrelationTier,
}

/// Everything an escalation decision needs.
pub struct EscalationCheck<'a> {
    pub tick: &'a MarketTick,
    /// Marketable limit price the walk wants to cross at.
    pub price: Price,
}

/// Stateless risk gate.
pub struct RiskGate;

impl RiskGate {
    /// Full pre-trade check for opening new exposure.
    pub fn check_entry(
        check: &EntryCheck<'_>,
        config: &StrategyConfig,
        breakers: &CircuitBreakers,
        now: DateTime<Utc>,
    ) -> Result<(), BlockReason> {
        if let Some(trip) = breakers.trip_state(now) {
            return Err(BlockReason::Breaker(trip));
        }

        let age_ms = check.tick.age_ms(now);
        if age_ms > config.breakers.max_data_age_ms {
            return Err(BlockReason::StaleData {
                age_ms,
                max_ms: config.breakers.max_data_age_ms,
            });
        }

        Self::check_book(check.tick)?;
        Self::check_price(check.request.price)?;

        let spread = check.tick.spread();
        if spread > config.entry.max_spread {
            return Err(BlockReason::SpreadTooWide {
                spread,
                max: config.entry.max_spread,
            });
        }

        if check.request.qty > config.max_position_qty {
            return Err(BlockReason::PositionTooLarge {
                qty: check.request.qty,
                cap: config.max_position_qty,
            });
        }

        let required = check.request.qty.notional(check.request.price);
        if required > check.available_balance {
            return Err(BlockReason::InsufficientBalance {
                required,
                available: check.available_balance,
            });
        }

        let cap = config.correlation.cap_for(check.correlation_tier);
        let would_be = check.correlated_notional + required;
        if would_be > cap {
            return Err(BlockReason::CorrelationCap {
                tier: check.correlation_tier,
                would_be,
                cap,
            });
        }

        Ok(())
    }

    /// Check for converting a resting exit order to marketable. Loss and
    /// rate breakers never trap an exit; only an unsafe order is refused.
    pub fn check_escalation(
        check: &EscalationCheck<'_>,
        breakers: &CircuitBreakers,
        now: DateTime<Utc>,
    ) -> Result<(), BlockReason> {
        if breakers.trip_state(now) == Some(BreakerTrip::ApiFailures) {
            return Err(BlockReason::Breaker(BreakerTrip::ApiFailures));
        }
        Self::check_book(check.tick)?;
        Self::check_price(check.price)?;
        Ok(())
    }

    fn check_book(tick: &MarketTick) -> Result<(), BlockReason> {
        if !tick.is_valid_book() {
            return Err(BlockReason::InvalidBook {
                bid: tick.bid,
                ask: tick.ask,
            });
        }
        Ok(())
    }

    fn check_price(price: Price) -> Result<(), BlockReason> {
        if !price.is_probability() {
            return Err(BlockReason::PriceOutOfBounds(price));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmx_core::{BreakerThresholds, MarketId, Side, TickSource};
    use rust_decimal_macros::dec;

    fn tick(bid: Decimal, ask: Decimal) -> MarketTick {
        MarketTick::new(
            MarketId::from("M"),
            Price::new(bid),
            Price::new(ask),
            Qty::new(dec!(500)),
            TickSource::Push,
        )
    }

    fn request(price: Decimal, qty: Decimal) -> OrderRequest {
        OrderRequest::entry_limit(
            MarketId::from("M"),
            Side::Yes,
            Price::new(price),
            Qty::new(qty),
        )
    }

    fn entry_check<'a>(request: &'a OrderRequest, tick: &'a MarketTick) -> EntryCheck<'a> {
        EntryCheck {
            request,
            tick,
            available_balance: dec!(10_000),
            correlated_notional: Decimal::ZERO,
            correlation_tier: CorrelationTier::Moderate,
        }
    }

    fn breakers() -> CircuitBreakers {
        CircuitBreakers::new(BreakerThresholds::default())
    }

    #[test]
    fn test_clean_entry_passes() {
        let config = StrategyConfig::default();
        let t = tick(dec!(0.48), dec!(0.52));
        let req = request(dec!(0.52), dec!(100));
        let check = entry_check(&req, &t);
        assert_eq!(
            RiskGate::check_entry(&check, &config, &breakers(), Utc::now()),
            Ok(())
        );
    }

    #[test]
    fn test_entry_blocked_on_balance() {
        let config = StrategyConfig::default();
        let t = tick(dec!(0.48), dec!(0.52));
        let req = request(dec!(0.52), dec!(100));
        let mut check = entry_check(&req, &t);
        check.available_balance = dec!(10);

        let err = RiskGate::check_entry(&check, &config, &breakers(), Utc::now()).unwrap_err();
        assert_eq!(
            err,
            BlockReason::InsufficientBalance {
                required: dec!(52),
                available: dec!(10),
            }
        );
        // The reason is loggable with both values.
        assert_eq!(err.to_string(), "insufficient balance: need 52, have 10");
    }

    #[test]
    fn test_entry_blocked_on_size_cap() {
        let mut config = StrategyConfig::default();
        config.max_position_qty = Qty::new(dec!(50));
        let t = tick(dec!(0.48), dec!(0.52));
        let req = request(dec!(0.52), dec!(100));
        let check = entry_check(&req, &t);

        assert!(matches!(
            RiskGate::check_entry(&check, &config, &breakers(), Utc::now()),
            Err(BlockReason::PositionTooLarge { .. })
        ));
    }

    #[test]
    fn test_entry_blocked_on_correlation_cap() {
        let config = StrategyConfig::default(); // perfect tier cap 500
        let t = tick(dec!(0.48), dec!(0.52));
        let req = request(dec!(0.52), dec!(100));
        let mut check = entry_check(&req, &t);
        check.correlation_tier = CorrelationTier::Perfect;
        check.correlated_notional = dec!(480);

        assert!(matches!(
            RiskGate::check_entry(&check, &config, &breakers(), Utc::now()),
            Err(BlockReason::CorrelationCap {
                tier: CorrelationTier::Perfect,
                ..
            })
        ));
    }

    #[test]
    fn test_entry_blocked_on_stale_tick() {
        let config = StrategyConfig::default(); // max data age 30s
        let mut t = tick(dec!(0.48), dec!(0.52));
        t.timestamp = Utc::now() - chrono::Duration::seconds(60);
        let req = request(dec!(0.52), dec!(100));
        let check = entry_check(&req, &t);

        assert!(matches!(
            RiskGate::check_entry(&check, &config, &breakers(), Utc::now()),
            Err(BlockReason::StaleData { .. })
        ));
    }

    #[test]
    fn test_entry_blocked_on_crossed_book_and_bad_price() {
        let config = StrategyConfig::default();
        let crossed = tick(dec!(0.55), dec!(0.52));
        let req = request(dec!(0.52), dec!(100));
        assert!(matches!(
            RiskGate::check_entry(&entry_check(&req, &crossed), &config, &breakers(), Utc::now()),
            Err(BlockReason::InvalidBook { .. })
        ));

        let t = tick(dec!(0.48), dec!(0.52));
        let bad = request(dec!(1.05), dec!(100));
        assert!(matches!(
            RiskGate::check_entry(&entry_check(&bad, &t), &config, &breakers(), Utc::now()),
            Err(BlockReason::PriceOutOfBounds(_))
        ));
    }

    #[test]
    fn test_entry_blocked_while_breaker_tripped() {
        let config = StrategyConfig::default();
        let b = breakers();
        let now = Utc::now();
        b.record_realized(dec!(-2_000), now);

        let t = tick(dec!(0.48), dec!(0.52));
        let req = request(dec!(0.52), dec!(100));
        assert_eq!(
            RiskGate::check_entry(&entry_check(&req, &t), &config, &b, now),
            Err(BlockReason::Breaker(BreakerTrip::DailyLossLimit))
        );
    }

    #[test]
    fn test_escalation_allowed_despite_loss_breaker() {
        let b = breakers();
        let now = Utc::now();
        b.record_realized(dec!(-2_000), now);

        let t = tick(dec!(0.48), dec!(0.52));
        let check = EscalationCheck {
            tick: &t,
            price: Price::new(dec!(0.40)),
        };
        // Closing risk is always allowed through a loss halt.
        assert_eq!(RiskGate::check_escalation(&check, &b, now), Ok(()));
    }

    #[test]
    fn test_escalation_blocked_on_broken_book_or_api_failures() {
        let now = Utc::now();
        let crossed = tick(dec!(0.55), dec!(0.52));
        let check = EscalationCheck {
            tick: &crossed,
            price: Price::new(dec!(0.40)),
        };
        assert!(matches!(
            RiskGate::check_escalation(&check, &breakers(), now),
            Err(BlockReason::InvalidBook { .. })
        ));

        let b = breakers();
        for _ in 0..5 {
            b.record_api_failure();
        }
        let t = tick(dec!(0.48), dec!(0.52));
        let check = EscalationCheck {
            tick: &t,
            price: Price::new(dec!(0.40)),
        };
        assert_eq!(
            RiskGate::check_escalation(&check, &b, now),
            Err(BlockReason::Breaker(BreakerTrip::ApiFailures))
        );
    }
}
