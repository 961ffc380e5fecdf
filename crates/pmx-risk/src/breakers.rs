//! Circuit breakers.
//!
//! Rolling counters that halt new risk when the session goes wrong: daily
//! realized loss, trades per rolling hour, and consecutive gateway
//! failures. Tripping is evaluated on read so a breaker releases itself
//! when its window rolls off (the API-failure breaker releases on the
//! first success instead).

use chrono::{DateTime, Duration, NaiveDate, Utc};
use parking_lot::Mutex;
use pmx_core::BreakerThresholds;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::warn;

/// Which breaker tripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerTrip {
    DailyLossLimit,
    HourlyTradeLimit,
    ApiFailures,
}

impl fmt::Display for BreakerTrip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DailyLossLimit => write!(f, "daily_loss_limit"),
            Self::HourlyTradeLimit => write!(f, "hourly_trade_limit"),
            Self::ApiFailures => write!(f, "consecutive_api_failures"),
        }
    }
}

struct DailyWindow {
    date: NaiveDate,
    realized_loss: Decimal,
}

pub struct CircuitBreakers {
    thresholds: BreakerThresholds,
    daily: Mutex<DailyWindow>,
    hourly_trades: Mutex<VecDeque<DateTime<Utc>>>,
    consecutive_api_failures: AtomicU32,
}

impl CircuitBreakers {
    pub fn new(thresholds: BreakerThresholds) -> Self {
        Self {
            thresholds,
            daily: Mutex::new(DailyWindow {
                date: Utc::now().date_naive(),
                realized_loss: Decimal::ZERO,
            }),
            hourly_trades: Mutex::new(VecDeque::new()),
            consecutive_api_failures: AtomicU32::new(0),
        }
    }

    pub fn thresholds(&self) -> &BreakerThresholds {
        &self.thresholds
    }

    /// Record realized P&L from a closed position. Losses accumulate
    /// against the daily limit; gains offset them.
    pub fn record_realized(&self, pnl: Decimal, now: DateTime<Utc>) {
        let mut daily = self.daily.lock();
        let today = now.date_naive();
        if daily.date != today {
            daily.date = today;
            daily.realized_loss = Decimal::ZERO;
        }
        daily.realized_loss -= pnl;
        if daily.realized_loss > self.thresholds.daily_loss_limit {
            warn!(
                loss = %daily.realized_loss,
                limit = %self.thresholds.daily_loss_limit,
                "daily loss limit breached"
            );
        }
    }

    /// Record one executed trade for the hourly rate limit.
    pub fn record_trade(&self, now: DateTime<Utc>) {
        let mut trades = self.hourly_trades.lock();
        trades.push_back(now);
        let cutoff = now - Duration::hours(1);
        while trades.front().is_some_and(|t| *t < cutoff) {
            trades.pop_front();
        }
    }

    pub fn record_api_failure(&self) -> u32 {
        self.consecutive_api_failures.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn record_api_success(&self) {
        self.consecutive_api_failures.store(0, Ordering::SeqCst);
    }

    /// The first tripped breaker, if any, as of `now`.
    pub fn trip_state(&self, now: DateTime<Utc>) -> Option<BreakerTrip> {
        {
            let daily = self.daily.lock();
            if daily.date == now.date_naive()
                && daily.realized_loss > self.thresholds.daily_loss_limit
            {
                return Some(BreakerTrip::DailyLossLimit);
            }
        }

        {
            let mut trades = self.hourly_trades.lock();
            let cutoff = now - Duration::hours(1);
            while trades.front().is_some_and(|t| *t < cutoff) {
                trades.pop_front();
            }
            if trades.len() as u32 >= self.thresholds.max_hourly_trades {
                return Some(BreakerTrip::HourlyTradeLimit);
            }
        }

        if self.consecutive_api_failures.load(Ordering::SeqCst)
            >= self.thresholds.max_consecutive_api_failures
        {
            return Some(BreakerTrip::ApiFailures);
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn thresholds() -> BreakerThresholds {
        BreakerThresholds {
            daily_loss_limit: dec!(1000),
            max_hourly_trades: 3,
            max_consecutive_api_failures: 2,
            max_data_age_ms: 30_000,
        }
    }

    #[test]
    fn test_daily_loss_trips_and_rolls_over() {
        let breakers = CircuitBreakers::new(thresholds());
        let now = Utc::now();

        breakers.record_realized(dec!(-600), now);
        assert_eq!(breakers.trip_state(now), None);
        breakers.record_realized(dec!(-500), now);
        assert_eq!(breakers.trip_state(now), Some(BreakerTrip::DailyLossLimit));

        // Next day the window resets.
        let tomorrow = now + Duration::days(1);
        assert_eq!(breakers.trip_state(tomorrow), None);
        breakers.record_realized(dec!(-100), tomorrow);
        assert_eq!(breakers.trip_state(tomorrow), None);
    }

    #[test]
    fn test_gains_offset_losses() {
        let breakers = CircuitBreakers::new(thresholds());
        let now = Utc::now();
        breakers.record_realized(dec!(-1200), now);
        assert_eq!(breakers.trip_state(now), Some(BreakerTrip::DailyLossLimit));
        breakers.record_realized(dec!(300), now);
        assert_eq!(breakers.trip_state(now), None);
    }

    #[test]
    fn test_hourly_trade_window_slides() {
        let breakers = CircuitBreakers::new(thresholds());
        let now = Utc::now();

        for i in 0..3 {
            breakers.record_trade(now + Duration::minutes(i));
        }
        let at = now + Duration::minutes(3);
        assert_eq!(breakers.trip_state(at), Some(BreakerTrip::HourlyTradeLimit));

        // An hour later the oldest trades age out.
        let later = now + Duration::minutes(62);
        assert_eq!(breakers.trip_state(later), None);
    }

    #[test]
    fn test_api_failures_reset_on_success() {
        let breakers = CircuitBreakers::new(thresholds());
        let now = Utc::now();

        breakers.record_api_failure();
        assert_eq!(breakers.trip_state(now), None);
        breakers.record_api_failure();
        assert_eq!(breakers.trip_state(now), Some(BreakerTrip::ApiFailures));

        breakers.record_api_success();
        assert_eq!(breakers.trip_state(now), None);
    }
}
