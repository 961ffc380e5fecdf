//! Priority resolution over fired conditions.

use crate::conditions::candidates;
use chrono::{DateTime, Duration, Utc};
use pmx_core::{ExitPriority, ExitSignal, MarketTick, Position, StrategyConfig};

/// Outcome of one evaluation pass for one position.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalOutcome {
    /// Exactly one exit wins and should be walked.
    Triggered(ExitSignal),
    /// Data was stale and only freshness-exempt conditions were considered.
    SkippedStale,
    NoExit,
}

/// How long a walk may run before its urgency forces a resolution:
/// marketable escalation for Critical and High, give-up for Medium,
/// plain cancel for Low.
pub fn escalation_window_secs(priority: ExitPriority) -> i64 {
    match priority {
        ExitPriority::Critical => 90,
        ExitPriority::High => 120,
        ExitPriority::Medium => 180,
        ExitPriority::Low => 60,
    }
}

/// Evaluate every condition and resolve to at most one exit.
///
/// All conditions are checked on every pass; the winner is the highest
/// priority tier, ties broken by the larger normalized deviation. On stale
/// data only conditions exempt from freshness (imminent expiration) may
/// fire; everything else is reported as skipped rather than silently
/// evaluated against old prices.
pub fn evaluate(
    position: &Position,
    tick: &MarketTick,
    config: &StrategyConfig,
    now: DateTime<Utc>,
) -> EvalOutcome {
    let stale = tick.is_stale(now, config.exit.staleness_window_ms);

    let mut fired = candidates(position, tick, config, now);
    if stale {
        fired.retain(|c| !c.condition.requires_fresh_data());
    }

    let best = fired
        .into_iter()
        .max_by_key(|c| (c.condition.priority(), c.deviation));

    match best {
        Some(winner) => {
            let priority = winner.condition.priority();
            EvalOutcome::Triggered(ExitSignal {
                condition: winner.condition,
                priority,
                deadline: now + Duration::seconds(escalation_window_secs(priority)),
                limit_price: tick.ask_for(position.side),
                deviation: winner.deviation,
            })
        }
        None if stale => EvalOutcome::SkippedStale,
        None => EvalOutcome::NoExit,
    }
}
