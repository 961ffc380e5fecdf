//! Structured engine event stream.
//!
//! Every decision the engine takes is published here with enough context
//! to act on without log archaeology. Observability components subscribe to
//! this stream; nothing inside the engine depends on who is listening.

use crate::signal::{ExitCondition, ExitPriority};
use crate::{ConnState, ConfigVersion, MarketId, PositionId, Price, Qty, Side};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Engine event stream payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    PositionOpened {
        position_id: PositionId,
        market: MarketId,
        side: Side,
        qty: Qty,
        entry_price: Price,
        config_version: ConfigVersion,
    },
    PositionUpdated {
        position_id: PositionId,
        mark_price: Price,
        unrealized_pnl: rust_decimal::Decimal,
        version: u64,
    },
    ExitTriggered {
        position_id: PositionId,
        market: MarketId,
        condition: ExitCondition,
        priority: ExitPriority,
        limit_price: Price,
    },
    ExitFilled {
        position_id: PositionId,
        market: MarketId,
        condition: ExitCondition,
        qty: Qty,
        avg_price: Price,
        realized_pnl: rust_decimal::Decimal,
    },
    ConnectionStateChanged {
        from: ConnState,
        to: ConnState,
        at: DateTime<Utc>,
    },
    RiskGateBlocked {
        /// What was blocked: "entry" or "escalation".
        action: String,
        market: MarketId,
        /// Which check failed, with current value vs threshold.
        reason: String,
    },
    WalkAborted {
        position_id: PositionId,
        market: MarketId,
        condition: ExitCondition,
        reason: String,
    },
    ManualInterventionRequired {
        reason: String,
        at: DateTime<Utc>,
    },
}

impl EngineEvent {
    /// Short tag for metrics/logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PositionOpened { .. } => "position_opened",
            Self::PositionUpdated { .. } => "position_updated",
            Self::ExitTriggered { .. } => "exit_triggered",
            Self::ExitFilled { .. } => "exit_filled",
            Self::ConnectionStateChanged { .. } => "connection_state_changed",
            Self::RiskGateBlocked { .. } => "risk_gate_blocked",
            Self::WalkAborted { .. } => "walk_aborted",
            Self::ManualInterventionRequired { .. } => "manual_intervention_required",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_tag() {
        let event = EngineEvent::ConnectionStateChanged {
            from: ConnState::Connected,
            to: ConnState::Error,
            at: Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"connection_state_changed\""));
        assert_eq!(event.kind(), "connection_state_changed");
    }
}
