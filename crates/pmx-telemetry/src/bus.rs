//! Engine event bus.
//!
//! A thin wrapper over a tokio broadcast channel carrying [`EngineEvent`].
//! Publishing never blocks; with no subscribers the event is dropped, which
//! is fine because every event is also logged at the emit site.

use pmx_core::EngineEvent;
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Returns the number of subscribers that received it.
    pub fn publish(&self, event: EngineEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pmx_core::ConnState;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        let sent = bus.publish(EngineEvent::ConnectionStateChanged {
            from: ConnState::Connecting,
            to: ConnState::Connected,
            at: Utc::now(),
        });
        assert_eq!(sent, 1);

        let got = rx.recv().await.unwrap();
        assert_eq!(got.kind(), "connection_state_changed");
    }

    #[test]
    fn publish_without_subscribers_is_a_noop() {
        let bus = EventBus::new(8);
        let sent = bus.publish(EngineEvent::ManualInterventionRequired {
            reason: "test".to_string(),
            at: Utc::now(),
        });
        assert_eq!(sent, 0);
    }
}
