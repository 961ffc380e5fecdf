//! Connection state and health signal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection state of the market-data feed.
///
/// Only `Subscribed` counts as reliable realtime; every other state forces
/// polling-only mode and gates automated entries behind manual approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnState {
    Disconnected,
    Connecting,
    Connected,
    Authenticated,
    Subscribed,
    Error,
    Reconnecting,
}

impl ConnState {
    /// Whether the live push channel is trusted end to end.
    pub fn is_realtime(&self) -> bool {
        matches!(self, Self::Subscribed)
    }
}

impl fmt::Display for ConnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
            Self::Authenticated => "AUTHENTICATED",
            Self::Subscribed => "SUBSCRIBED",
            Self::Error => "ERROR",
            Self::Reconnecting => "RECONNECTING",
        };
        write!(f, "{s}")
    }
}

/// Health signal raised by the connection state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionHealth {
    pub state: ConnState,
    pub last_message: DateTime<Utc>,
    pub consecutive_failures: u32,
    pub reconnect_attempts: u32,
    /// Set when the reconnect budget is exhausted or a gap replay hit its
    /// cap; cleared only by operator action.
    pub manual_intervention: bool,
}

impl ConnectionHealth {
    pub fn new() -> Self {
        Self {
            state: ConnState::Disconnected,
            last_message: Utc::now(),
            consecutive_failures: 0,
            reconnect_attempts: 0,
            manual_intervention: false,
        }
    }

    /// Automated entries are allowed only on a healthy subscribed feed.
    pub fn allows_automated_entries(&self) -> bool {
        self.state.is_realtime() && !self.manual_intervention
    }
}

impl Default for ConnectionHealth {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_subscribed_is_realtime() {
        for state in [
            ConnState::Disconnected,
            ConnState::Connecting,
            ConnState::Connected,
            ConnState::Authenticated,
            ConnState::Error,
            ConnState::Reconnecting,
        ] {
            assert!(!state.is_realtime(), "{state} must not be realtime");
        }
        assert!(ConnState::Subscribed.is_realtime());
    }

    #[test]
    fn test_manual_intervention_blocks_entries() {
        let mut health = ConnectionHealth::new();
        health.state = ConnState::Subscribed;
        assert!(health.allows_automated_entries());

        health.manual_intervention = true;
        assert!(!health.allows_automated_entries());
    }
}
