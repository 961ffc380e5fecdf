//! Per-market evaluation throttling.
//!
//! Quiet markets do not need tight evaluation loops; volatile ones do. The
//! regime is classified from a one-minute rolling window of mid prices.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use pmx_core::{MarketTick, Price};
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::time::Duration;

const WINDOW_SECS: i64 = 60;

/// Activity classification for one market.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketRegime {
    Quiet,
    Active,
    Volatile,
}

impl MarketRegime {
    /// Evaluation cadence for positions in a market of this regime.
    pub fn eval_interval(&self, base: Duration) -> Duration {
        match self {
            Self::Quiet => Duration::from_secs(60),
            Self::Active => base,
            Self::Volatile => Duration::from_secs(5),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Quiet => "quiet",
            Self::Active => "active",
            Self::Volatile => "volatile",
        }
    }
}

/// Rolling one-minute window of mid prices for regime classification.
#[derive(Default)]
pub struct RegimeTracker {
    window: VecDeque<(DateTime<Utc>, Price)>,
}

impl RegimeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, tick: &MarketTick) {
        self.window.push_back((tick.timestamp, tick.mid()));
        let cutoff = tick.timestamp - ChronoDuration::seconds(WINDOW_SECS);
        while self.window.front().is_some_and(|(t, _)| *t < cutoff) {
            self.window.pop_front();
        }
    }

    /// Regime as of `now`. Volatile on a >= 5% mid move or a dense tape
    /// (>= 30 ticks in the window); quiet on < 0.5% and a sparse tape.
    pub fn regime(&self, now: DateTime<Utc>) -> MarketRegime {
        let cutoff = now - ChronoDuration::seconds(WINDOW_SECS);
        let live: Vec<&(DateTime<Utc>, Price)> =
            self.window.iter().filter(|(t, _)| *t >= cutoff).collect();

        let ticks = live.len();
        let move_pct = match (live.first(), live.last()) {
            (Some((_, first)), Some((_, last))) if !first.is_zero() => {
                ((last.inner() - first.inner()) / first.inner() * Decimal::from(100)).abs()
            }
            _ => Decimal::ZERO,
        };

        if move_pct >= Decimal::from(5) || ticks >= 30 {
            MarketRegime::Volatile
        } else if move_pct < Decimal::new(5, 1) && ticks < 5 {
            MarketRegime::Quiet
        } else {
            MarketRegime::Active
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmx_core::{MarketId, Qty, TickSource};
    use rust_decimal_macros::dec;

    fn tick_at(mid: Decimal, at: DateTime<Utc>) -> MarketTick {
        let mut t = MarketTick::new(
            MarketId::from("M"),
            Price::new(mid - dec!(0.01)),
            Price::new(mid + dec!(0.01)),
            Qty::new(dec!(100)),
            TickSource::Push,
        );
        t.timestamp = at;
        t
    }

    #[test]
    fn test_sparse_flat_tape_is_quiet() {
        let now = Utc::now();
        let mut tracker = RegimeTracker::new();
        tracker.observe(&tick_at(dec!(0.50), now - ChronoDuration::seconds(40)));
        tracker.observe(&tick_at(dec!(0.501), now - ChronoDuration::seconds(10)));
        assert_eq!(tracker.regime(now), MarketRegime::Quiet);
    }

    #[test]
    fn test_large_move_is_volatile() {
        let now = Utc::now();
        let mut tracker = RegimeTracker::new();
        tracker.observe(&tick_at(dec!(0.50), now - ChronoDuration::seconds(30)));
        tracker.observe(&tick_at(dec!(0.56), now - ChronoDuration::seconds(5)));
        assert_eq!(tracker.regime(now), MarketRegime::Volatile);
    }

    #[test]
    fn test_dense_tape_is_volatile() {
        let now = Utc::now();
        let mut tracker = RegimeTracker::new();
        for i in 0..35 {
            tracker.observe(&tick_at(dec!(0.50), now - ChronoDuration::seconds(59 - i)));
        }
        assert_eq!(tracker.regime(now), MarketRegime::Volatile);
    }

    #[test]
    fn test_old_window_ages_out() {
        let now = Utc::now();
        let mut tracker = RegimeTracker::new();
        // A big move, but all of it more than a minute ago.
        tracker.observe(&tick_at(dec!(0.50), now - ChronoDuration::seconds(200)));
        tracker.observe(&tick_at(dec!(0.60), now - ChronoDuration::seconds(150)));
        assert_eq!(tracker.regime(now), MarketRegime::Quiet);
    }

    #[test]
    fn test_eval_intervals() {
        let base = Duration::from_secs(15);
        assert_eq!(
            MarketRegime::Quiet.eval_interval(base),
            Duration::from_secs(60)
        );
        assert_eq!(MarketRegime::Active.eval_interval(base), base);
        assert_eq!(
            MarketRegime::Volatile.eval_interval(base),
            Duration::from_secs(5)
        );
    }
}
