//! Prometheus metrics for the pmx engine.
//!
//! All metrics are registered lazily on first touch. Registration failure is
//! a programming error (duplicate name), so the `unwrap()` at static init is
//! intentional.

use once_cell::sync::Lazy;
use prometheus::{
    register_gauge_vec, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge, register_int_gauge_vec, Encoder, GaugeVec, HistogramVec, IntCounter,
    IntCounterVec, IntGauge, IntGaugeVec, TextEncoder,
};

use crate::error::TelemetryResult;

/// Exit signals triggered, by condition and priority.
pub static EXITS_TRIGGERED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "pmx_exits_triggered_total",
        "Exit signals triggered, by condition and priority",
        &["condition", "priority"]
    )
    .unwrap()
});

/// Exit evaluations skipped because market data was stale.
pub static EVALS_SKIPPED_STALE: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "pmx_evals_skipped_stale_total",
        "Exit evaluations skipped due to stale market data"
    )
    .unwrap()
});

/// Walk outcomes: filled, escalated, gave_up, aborted, cancelled.
pub static WALK_OUTCOMES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "pmx_walk_outcomes_total",
        "Order walk outcomes",
        &["outcome"]
    )
    .unwrap()
});

/// Order amendments issued while walking.
pub static WALK_AMENDS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "pmx_walk_amends_total",
        "Order price amendments while walking, by stage",
        &["stage"]
    )
    .unwrap()
});

/// Time from walk start to terminal outcome, seconds.
pub static WALK_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "pmx_walk_duration_seconds",
        "Walk duration from placement to terminal outcome",
        &["outcome"],
        vec![5.0, 15.0, 30.0, 60.0, 90.0, 120.0, 180.0]
    )
    .unwrap()
});

/// Actions blocked by the risk gate, by reason.
pub static GATE_BLOCKS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "pmx_gate_blocks_total",
        "Actions blocked by the risk gate, by reason",
        &["action", "reason"]
    )
    .unwrap()
});

/// Feed reconnect attempts.
pub static RECONNECT_ATTEMPTS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "pmx_reconnect_attempts_total",
        "Market data feed reconnect attempts"
    )
    .unwrap()
});

/// Events replayed after a reconnect gap.
pub static REPLAY_EVENTS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "pmx_replay_events_total",
        "Market events replayed after reconnect gaps"
    )
    .unwrap()
});

/// Current connection state, one-hot by state label.
pub static CONN_STATE: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "pmx_connection_state",
        "Current feed connection state (1 for the active state)",
        &["state"]
    )
    .unwrap()
});

/// Open positions.
pub static OPEN_POSITIONS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("pmx_open_positions", "Currently open positions").unwrap()
});

/// Optimistic-concurrency conflicts on position updates.
pub static VERSION_CONFLICTS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "pmx_version_conflicts_total",
        "Position updates skipped due to version conflicts"
    )
    .unwrap()
});

/// Realized PnL on closed positions, by exit condition.
pub static REALIZED_PNL: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "pmx_realized_pnl_total",
        "Cumulative realized PnL by exit condition",
        &["condition"]
    )
    .unwrap()
});

/// Convenience facade so callers do not import the statics directly.
pub struct Metrics;

impl Metrics {
    pub fn exit_triggered(condition: &str, priority: &str) {
        EXITS_TRIGGERED
            .with_label_values(&[condition, priority])
            .inc();
    }

    pub fn eval_skipped_stale() {
        EVALS_SKIPPED_STALE.inc();
    }

    pub fn walk_outcome(outcome: &str, duration_secs: f64) {
        WALK_OUTCOMES.with_label_values(&[outcome]).inc();
        WALK_DURATION
            .with_label_values(&[outcome])
            .observe(duration_secs);
    }

    pub fn walk_amend(stage: &str) {
        WALK_AMENDS.with_label_values(&[stage]).inc();
    }

    pub fn gate_block(action: &str, reason: &str) {
        GATE_BLOCKS.with_label_values(&[action, reason]).inc();
    }

    pub fn reconnect_attempt() {
        RECONNECT_ATTEMPTS.inc();
    }

    pub fn replayed(count: u64) {
        REPLAY_EVENTS.inc_by(count);
    }

    pub fn connection_state(state: &str) {
        for s in [
            "disconnected",
            "connecting",
            "connected",
            "authenticated",
            "subscribed",
            "reconnecting",
            "error",
        ] {
            CONN_STATE
                .with_label_values(&[s])
                .set(if s == state { 1 } else { 0 });
        }
    }

    pub fn open_positions(count: i64) {
        OPEN_POSITIONS.set(count);
    }

    pub fn version_conflict() {
        VERSION_CONFLICTS.inc();
    }

    pub fn realized_pnl(condition: &str, pnl: f64) {
        REALIZED_PNL.with_label_values(&[condition]).add(pnl);
    }
}

/// Render all registered metrics in the Prometheus text format.
pub fn gather() -> TelemetryResult<String> {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buf = Vec::new();
    encoder.encode(&families, &mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_state_is_one_hot() {
        Metrics::connection_state("subscribed");
        assert_eq!(CONN_STATE.with_label_values(&["subscribed"]).get(), 1);
        assert_eq!(CONN_STATE.with_label_values(&["connecting"]).get(), 0);

        Metrics::connection_state("reconnecting");
        assert_eq!(CONN_STATE.with_label_values(&["subscribed"]).get(), 0);
        assert_eq!(CONN_STATE.with_label_values(&["reconnecting"]).get(), 1);
    }

    #[test]
    fn gather_includes_touched_metrics() {
        Metrics::walk_outcome("filled", 12.0);
        let text = gather().unwrap();
        assert!(text.contains("pmx_walk_outcomes_total"));
    }
}
