//! Pure connection state machine.
//!
//! No I/O here: the supervisor feeds events in and reads the resulting
//! state, backoff delay and reconnect budget back out. Keeping this pure
//! makes every transition unit-testable without a runtime.

use pmx_core::ConnState;
use std::time::Duration;

const MAX_BACKOFF_SECS: u64 = 30;

/// Events observed by the supervisor and applied to the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnEvent {
    /// A connection attempt is starting.
    Dial,
    /// Transport established.
    TransportUp,
    /// Authentication accepted.
    AuthOk,
    /// Subscriptions confirmed; the push channel is live.
    SubscribeOk,
    /// Transport dropped, setup step failed, or the source errored.
    Failed,
    /// No message within twice the heartbeat interval.
    StaleHeartbeat,
    /// Entering the backoff wait before the next dial.
    Backoff,
}

/// Connection lifecycle state machine.
#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    state: ConnState,
    reconnect_attempts: u32,
    consecutive_failures: u32,
    max_reconnect_attempts: u32,
    manual_intervention: bool,
}

impl ConnectionMachine {
    pub fn new(max_reconnect_attempts: u32) -> Self {
        Self {
            state: ConnState::Disconnected,
            reconnect_attempts: 0,
            consecutive_failures: 0,
            max_reconnect_attempts,
            manual_intervention: false,
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn manual_intervention(&self) -> bool {
        self.manual_intervention
    }

    /// Whether the reconnect budget is spent. The machine stays in
    /// `Reconnecting` and the supervisor falls back to polling only.
    pub fn attempts_exhausted(&self) -> bool {
        self.reconnect_attempts >= self.max_reconnect_attempts
    }

    /// Apply an event, returning the resulting state. Events that do not
    /// apply in the current state are ignored.
    pub fn apply(&mut self, event: ConnEvent) -> ConnState {
        use ConnState::*;

        let next = match (self.state, event) {
            (Disconnected | Reconnecting, ConnEvent::Dial) => Connecting,
            (Connecting, ConnEvent::TransportUp) => Connected,
            (Connected, ConnEvent::AuthOk) => Authenticated,
            (Authenticated, ConnEvent::SubscribeOk) => {
                // A confirmed subscription is the only success signal that
                // resets the failure counters.
                self.reconnect_attempts = 0;
                self.consecutive_failures = 0;
                Subscribed
            }
            (_, ConnEvent::Failed | ConnEvent::StaleHeartbeat) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                Error
            }
            (Error, ConnEvent::Backoff) => {
                self.reconnect_attempts = self.reconnect_attempts.saturating_add(1);
                if self.attempts_exhausted() {
                    self.manual_intervention = true;
                }
                Reconnecting
            }
            (state, _) => state,
        };

        self.state = next;
        next
    }

    /// Backoff before the next dial: 1s, 2s, 4s, 8s, 16s, capped at 30s.
    pub fn backoff_delay(&self) -> Duration {
        let attempt = self.reconnect_attempts.max(1);
        let secs = 1u64 << (attempt - 1).min(5);
        Duration::from_secs(secs.min(MAX_BACKOFF_SECS))
    }
}
