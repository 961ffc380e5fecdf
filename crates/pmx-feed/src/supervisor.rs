//! Feed supervisor.
//!
//! Drives a [`MarketDataSource`] through the connection state machine:
//! connect with a hard timeout, pump the push stream while watching the
//! heartbeat, replay gaps after reconnects, and fall back to polling during
//! backoff or once the reconnect budget is spent.

use crate::error::{FeedError, FeedResult};
use crate::machine::{ConnEvent, ConnectionMachine};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use pmx_core::{ConnState, ConnectionHealth, EngineEvent, MarketDataSource, MarketId, MarketTick};
use pmx_telemetry::{EventBus, Metrics};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Feed configuration.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Markets to subscribe to and poll.
    pub markets: Vec<MarketId>,
    /// Hard timeout for each connection setup step.
    pub connect_timeout_secs: u64,
    /// Expected heartbeat cadence; silence for twice this is a stale feed.
    pub heartbeat_interval_ms: u64,
    /// Polling cadence while the push channel is down.
    pub poll_interval_ms: u64,
    /// Reconnect attempts before giving up and flagging the operator.
    pub max_reconnect_attempts: u32,
    /// A gap replay returning this many events or more flags manual review.
    pub replay_cap: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            markets: Vec::new(),
            connect_timeout_secs: 30,
            heartbeat_interval_ms: 15_000,
            poll_interval_ms: 2_000,
            max_reconnect_attempts: 5,
            replay_cap: 100,
        }
    }
}

/// Why a push session ended.
enum SessionEnd {
    Closed,
    Stale,
    Shutdown,
}

/// Owns the connection lifecycle for one market data source.
pub struct FeedSupervisor {
    source: Arc<dyn MarketDataSource>,
    config: FeedConfig,
    health: Arc<RwLock<ConnectionHealth>>,
    bus: EventBus,
}

impl FeedSupervisor {
    pub fn new(source: Arc<dyn MarketDataSource>, config: FeedConfig, bus: EventBus) -> Self {
        Self {
            source,
            config,
            health: Arc::new(RwLock::new(ConnectionHealth::new())),
            bus,
        }
    }

    /// Shared health handle for entry gating and operator surfaces.
    pub fn health_handle(&self) -> Arc<RwLock<ConnectionHealth>> {
        Arc::clone(&self.health)
    }

    /// Run until shutdown. Forwards every tick (push, replay and poll) to
    /// `tick_tx` in timestamp order per market.
    pub async fn run(
        self,
        tick_tx: mpsc::Sender<MarketTick>,
        shutdown: CancellationToken,
    ) -> FeedResult<()> {
        let mut machine = ConnectionMachine::new(self.config.max_reconnect_attempts);
        let mut watermarks: HashMap<MarketId, DateTime<Utc>> = HashMap::new();

        loop {
            if shutdown.is_cancelled() {
                self.mark_disconnected();
                return Ok(());
            }

            self.transition(&mut machine, ConnEvent::Dial);

            match self.establish(&mut machine).await {
                Ok(rx) => {
                    // Anything missed while the push channel was down gets
                    // replayed before live ticks resume.
                    if !watermarks.is_empty() {
                        self.replay_gaps(&mut watermarks, &tick_tx).await?;
                    }
                    match self.pump(rx, &mut watermarks, &tick_tx, &shutdown).await {
                        SessionEnd::Shutdown => {
                            self.mark_disconnected();
                            return Ok(());
                        }
                        SessionEnd::Stale => {
                            self.transition(&mut machine, ConnEvent::StaleHeartbeat)
                        }
                        SessionEnd::Closed => self.transition(&mut machine, ConnEvent::Failed),
                    };
                }
                Err(e) => {
                    warn!(error = %e, "feed session setup failed");
                    self.transition(&mut machine, ConnEvent::Failed);
                }
            }

            self.transition(&mut machine, ConnEvent::Backoff);
            Metrics::reconnect_attempt();

            if machine.attempts_exhausted() {
                error!(
                    attempts = machine.reconnect_attempts(),
                    "reconnect budget exhausted, polling only until operator intervenes"
                );
                self.bus.publish(EngineEvent::ManualInterventionRequired {
                    reason: format!(
                        "feed reconnect failed {} times, polling only",
                        machine.reconnect_attempts()
                    ),
                    at: Utc::now(),
                });
                return self.poll_only(&mut watermarks, &tick_tx, &shutdown).await;
            }

            let delay = machine.backoff_delay();
            warn!(
                attempt = machine.reconnect_attempts(),
                delay_secs = delay.as_secs(),
                "backing off before reconnect"
            );
            self.backoff_with_polling(delay, &mut watermarks, &tick_tx, &shutdown)
                .await?;
        }
    }

    /// Run the three setup steps, each under the connect timeout.
    async fn establish(
        &self,
        machine: &mut ConnectionMachine,
    ) -> FeedResult<mpsc::Receiver<MarketTick>> {
        let limit = Duration::from_secs(self.config.connect_timeout_secs);
        let timeout_err = || FeedError::ConnectTimeout(self.config.connect_timeout_secs);

        tokio::time::timeout(limit, self.source.connect())
            .await
            .map_err(|_| timeout_err())??;
        self.transition(machine, ConnEvent::TransportUp);

        tokio::time::timeout(limit, self.source.authenticate())
            .await
            .map_err(|_| timeout_err())??;
        self.transition(machine, ConnEvent::AuthOk);

        let rx = tokio::time::timeout(limit, self.source.subscribe(&self.config.markets))
            .await
            .map_err(|_| timeout_err())??;
        self.transition(machine, ConnEvent::SubscribeOk);

        Ok(rx)
    }

    /// Pump the push stream until it closes, goes silent, or shutdown.
    async fn pump(
        &self,
        mut rx: mpsc::Receiver<MarketTick>,
        watermarks: &mut HashMap<MarketId, DateTime<Utc>>,
        tick_tx: &mpsc::Sender<MarketTick>,
        shutdown: &CancellationToken,
    ) -> SessionEnd {
        let stale_after = Duration::from_millis(self.config.heartbeat_interval_ms * 2);
        let mut check = tokio::time::interval(Duration::from_millis(self.config.heartbeat_interval_ms));
        check.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_message = tokio::time::Instant::now();

        loop {
            tokio::select! {
                () = shutdown.cancelled() => return SessionEnd::Shutdown,
                maybe = rx.recv() => match maybe {
                    Some(tick) => {
                        last_message = tokio::time::Instant::now();
                        self.health.write().last_message = Utc::now();
                        if self.forward(tick, watermarks, tick_tx).await.is_err() {
                            return SessionEnd::Shutdown;
                        }
                    }
                    None => {
                        warn!("push stream closed by source");
                        return SessionEnd::Closed;
                    }
                },
                _ = check.tick() => {
                    let silent = last_message.elapsed();
                    if silent >= stale_after {
                        warn!(silent_ms = silent.as_millis() as u64, "feed silent past heartbeat window");
                        return SessionEnd::Stale;
                    }
                }
            }
        }
    }

    /// Deliver a tick downstream, advancing the market's watermark.
    async fn forward(
        &self,
        tick: MarketTick,
        watermarks: &mut HashMap<MarketId, DateTime<Utc>>,
        tick_tx: &mpsc::Sender<MarketTick>,
    ) -> FeedResult<()> {
        watermarks
            .entry(tick.market.clone())
            .and_modify(|w| {
                if tick.timestamp > *w {
                    *w = tick.timestamp;
                }
            })
            .or_insert(tick.timestamp);
        tick_tx
            .send(tick)
            .await
            .map_err(|_| FeedError::ChannelClosed)
    }

    /// Replay missed events for every watermarked market after a reconnect.
    /// Events are deduplicated against the watermark by timestamp and
    /// delivered oldest first, before any live tick from the new session.
    async fn replay_gaps(
        &self,
        watermarks: &mut HashMap<MarketId, DateTime<Utc>>,
        tick_tx: &mpsc::Sender<MarketTick>,
    ) -> FeedResult<()> {
        let targets: Vec<(MarketId, DateTime<Utc>)> = watermarks
            .iter()
            .map(|(m, w)| (m.clone(), *w))
            .collect();

        for (market, since) in targets {
            let mut events = match self.source.poll_since(&market, since).await {
                Ok(events) => events,
                Err(e) => {
                    warn!(market = %market, error = %e, "gap replay poll failed");
                    continue;
                }
            };
            events.sort_by_key(|t| t.timestamp);
            events.retain(|t| t.timestamp > since);

            if events.len() >= self.config.replay_cap {
                warn!(
                    market = %market,
                    count = events.len(),
                    cap = self.config.replay_cap,
                    "gap replay hit cap, flagging manual review"
                );
                self.health.write().manual_intervention = true;
                self.bus.publish(EngineEvent::ManualInterventionRequired {
                    reason: format!(
                        "gap replay for {market} returned {} events (cap {})",
                        events.len(),
                        self.config.replay_cap
                    ),
                    at: Utc::now(),
                });
            }

            let count = events.len() as u64;
            for tick in events {
                self.forward(tick, watermarks, tick_tx).await?;
            }
            if count > 0 {
                Metrics::replayed(count);
                info!(market = %market, count, "replayed events after reconnect");
            }
        }
        Ok(())
    }

    /// One polling pass over all configured markets.
    async fn poll_once(
        &self,
        watermarks: &mut HashMap<MarketId, DateTime<Utc>>,
        tick_tx: &mpsc::Sender<MarketTick>,
    ) -> FeedResult<()> {
        for market in self.config.markets.clone() {
            let since = watermarks
                .get(&market)
                .copied()
                .unwrap_or_else(|| Utc::now() - chrono::Duration::seconds(60));
            let mut events = match self.source.poll_since(&market, since).await {
                Ok(events) => events,
                Err(e) => {
                    warn!(market = %market, error = %e, "fallback poll failed");
                    continue;
                }
            };
            events.sort_by_key(|t| t.timestamp);
            events.retain(|t| t.timestamp > since);
            if !events.is_empty() {
                self.health.write().last_message = Utc::now();
            }
            for tick in events {
                self.forward(tick, watermarks, tick_tx).await?;
            }
        }
        Ok(())
    }

    /// Keep ticks flowing via polls while waiting out the backoff delay.
    async fn backoff_with_polling(
        &self,
        delay: Duration,
        watermarks: &mut HashMap<MarketId, DateTime<Utc>>,
        tick_tx: &mpsc::Sender<MarketTick>,
        shutdown: &CancellationToken,
    ) -> FeedResult<()> {
        let deadline = tokio::time::Instant::now() + delay;
        let mut poll = tokio::time::interval(Duration::from_millis(self.config.poll_interval_ms));
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => return Ok(()),
                () = tokio::time::sleep_until(deadline) => return Ok(()),
                _ = poll.tick() => self.poll_once(watermarks, tick_tx).await?,
            }
        }
    }

    /// Terminal polling loop once the reconnect budget is spent. Exits only
    /// on shutdown; clearing the manual flag is an operator restart.
    async fn poll_only(
        &self,
        watermarks: &mut HashMap<MarketId, DateTime<Utc>>,
        tick_tx: &mpsc::Sender<MarketTick>,
        shutdown: &CancellationToken,
    ) -> FeedResult<()> {
        let mut poll = tokio::time::interval(Duration::from_millis(self.config.poll_interval_ms));
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => return Ok(()),
                _ = poll.tick() => self.poll_once(watermarks, tick_tx).await?,
            }
        }
    }

    fn mark_disconnected(&self) {
        let mut health = self.health.write();
        health.state = ConnState::Disconnected;
        Metrics::connection_state("disconnected");
    }

    /// Apply an event to the machine, mirror it into shared health, and
    /// publish the transition if the state changed.
    fn transition(&self, machine: &mut ConnectionMachine, event: ConnEvent) {
        let from = machine.state();
        let to = machine.apply(event);

        {
            let mut health = self.health.write();
            health.state = to;
            health.reconnect_attempts = machine.reconnect_attempts();
            health.consecutive_failures = machine.consecutive_failures();
            if machine.manual_intervention() {
                health.manual_intervention = true;
            }
        }

        if from != to {
            info!(%from, %to, "connection state changed");
            Metrics::connection_state(&to.to_string().to_ascii_lowercase());
            self.bus.publish(EngineEvent::ConnectionStateChanged {
                from,
                to,
                at: Utc::now(),
            });
        }
    }
}
