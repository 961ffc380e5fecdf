//! The position monitor loop.
//!
//! One cooperative loop owns all monitoring state: the tick stream feeds
//! the shared cache and per-market regime trackers; a scheduler tick
//! evaluates positions whose market is due; triggered exits are dispatched
//! as walk tasks and their results land back in the same loop. Positions
//! with a walk in flight are skipped, and every store write is a CAS with
//! skip-and-retry-next-pass on conflict.

use crate::error::EngineResult;
use crate::ledger::BalanceLedger;
use crate::throttle::{MarketRegime, RegimeTracker};
use chrono::Utc;
use pmx_core::{
    ConfigStore, EngineEvent, MarketId, MarketTick, Position, PositionId, PositionStatus,
    PositionStore, StoreError,
};
use pmx_exit::{evaluate, EvalOutcome};
use pmx_risk::CircuitBreakers;
use pmx_telemetry::{EventBus, Metrics};
use pmx_walk::{TickCache, WalkOutcome, WalkResult, Walker};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Scheduler granularity; per-market cadence is layered on top.
const SCHED_TICK: Duration = Duration::from_secs(5);

const REOPEN_RETRIES: usize = 3;

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Evaluation cadence for markets in the Active regime.
    pub base_eval_interval_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            base_eval_interval_secs: 15,
        }
    }
}

pub struct Monitor {
    store: Arc<dyn PositionStore>,
    configs: Arc<ConfigStore>,
    walker: Arc<Walker>,
    ticks: Arc<TickCache>,
    breakers: Arc<CircuitBreakers>,
    ledger: Arc<BalanceLedger>,
    bus: EventBus,
    config: MonitorConfig,
}

impl Monitor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn PositionStore>,
        configs: Arc<ConfigStore>,
        walker: Arc<Walker>,
        ticks: Arc<TickCache>,
        breakers: Arc<CircuitBreakers>,
        ledger: Arc<BalanceLedger>,
        bus: EventBus,
        config: MonitorConfig,
    ) -> Self {
        Self {
            store,
            configs,
            walker,
            ticks,
            breakers,
            ledger,
            bus,
            config,
        }
    }

    pub async fn run(
        self,
        mut tick_rx: mpsc::Receiver<MarketTick>,
        shutdown: CancellationToken,
    ) -> EngineResult<()> {
        let (walk_tx, mut walk_rx) = mpsc::channel::<WalkResult>(64);
        let mut walking: HashSet<PositionId> = HashSet::new();
        let mut regimes: HashMap<MarketId, RegimeTracker> = HashMap::new();
        let mut last_eval: HashMap<MarketId, tokio::time::Instant> = HashMap::new();

        let mut sched = tokio::time::interval(SCHED_TICK);
        sched.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("monitor loop started");
        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    info!("monitor loop stopping");
                    return Ok(());
                }
                maybe = tick_rx.recv() => match maybe {
                    Some(tick) => {
                        regimes.entry(tick.market.clone()).or_default().observe(&tick);
                        self.ticks.insert(tick);
                    }
                    None => {
                        warn!("tick stream ended, monitor loop stopping");
                        return Ok(());
                    }
                },
                Some(result) = walk_rx.recv() => {
                    walking.remove(&result.position_id);
                    self.handle_walk_result(result).await;
                }
                _ = sched.tick() => {
                    self.evaluate_due(&mut walking, &regimes, &mut last_eval, &walk_tx, &shutdown)
                        .await;
                }
            }
        }
    }

    /// One scheduler pass: evaluate every open position whose market's
    /// regime cadence says it is due.
    async fn evaluate_due(
        &self,
        walking: &mut HashSet<PositionId>,
        regimes: &HashMap<MarketId, RegimeTracker>,
        last_eval: &mut HashMap<MarketId, tokio::time::Instant>,
        walk_tx: &mpsc::Sender<WalkResult>,
        shutdown: &CancellationToken,
    ) {
        let positions = match self.store.open_positions().await {
            Ok(positions) => positions,
            Err(e) => {
                warn!(error = %e, "position scan failed");
                return;
            }
        };
        Metrics::open_positions(positions.len() as i64);

        let now = Utc::now();
        let sched_now = tokio::time::Instant::now();
        let base = Duration::from_secs(self.config.base_eval_interval_secs);

        let mut due: HashSet<MarketId> = HashSet::new();
        for position in &positions {
            if due.contains(&position.market) {
                continue;
            }
            let regime = regimes
                .get(&position.market)
                .map(|r| r.regime(now))
                .unwrap_or(MarketRegime::Active);
            let interval = regime.eval_interval(base);
            let is_due = last_eval
                .get(&position.market)
                .map_or(true, |last| sched_now.duration_since(*last) >= interval);
            if is_due {
                due.insert(position.market.clone());
                last_eval.insert(position.market.clone(), sched_now);
            }
        }

        for position in positions {
            if position.status != PositionStatus::Open
                || walking.contains(&position.id)
                || !due.contains(&position.market)
            {
                continue;
            }
            self.evaluate_position(position, walking, walk_tx, shutdown)
                .await;
        }
    }

    async fn evaluate_position(
        &self,
        mut position: Position,
        walking: &mut HashSet<PositionId>,
        walk_tx: &mpsc::Sender<WalkResult>,
        shutdown: &CancellationToken,
    ) {
        let Some(tick) = self.ticks.latest(&position.market) else {
            return;
        };
        let Some(config) = self.configs.get(position.config_version) else {
            warn!(
                position = %position.id,
                version = %position.config_version,
                "config version missing, position not evaluated"
            );
            return;
        };
        let now = Utc::now();

        // Refresh the trailing stop and mark under CAS. Losing the race
        // means another writer touched this position; pick it up fresh on
        // the next pass instead of clobbering.
        let expected = position.version;
        let favorable = position.exit_price(&tick);
        let stop_moved = position.trailing.observe(favorable);
        position.apply_mark(&tick, now);
        match self.store.update(&position, expected).await {
            Ok(version) => {
                position.version = version;
                if stop_moved {
                    debug!(
                        position = %position.id,
                        stop = ?position.trailing.current_stop,
                        "trailing stop advanced"
                    );
                }
                self.bus.publish(EngineEvent::PositionUpdated {
                    position_id: position.id,
                    mark_price: position.mark_price,
                    unrealized_pnl: position.unrealized_pnl,
                    version: position.version,
                });
            }
            Err(StoreError::VersionMismatch { .. }) => {
                Metrics::version_conflict();
                debug!(position = %position.id, "version race on mark update, retry next pass");
                return;
            }
            Err(e) => {
                warn!(position = %position.id, error = %e, "mark update failed");
                return;
            }
        }

        match evaluate(&position, &tick, &config, now) {
            EvalOutcome::Triggered(signal) => {
                info!(
                    position = %position.id,
                    market = %position.market,
                    condition = %signal.condition,
                    priority = %signal.priority,
                    deviation = %signal.deviation,
                    "exit triggered"
                );
                Metrics::exit_triggered(signal.condition.name(), &signal.priority.to_string());
                self.bus.publish(EngineEvent::ExitTriggered {
                    position_id: position.id,
                    market: position.market.clone(),
                    condition: signal.condition,
                    priority: signal.priority,
                    limit_price: signal.limit_price,
                });

                // Mark closing before dispatch so this position cannot be
                // picked up twice.
                let expected = position.version;
                position.status = PositionStatus::Closing;
                match self.store.update(&position, expected).await {
                    Ok(version) => position.version = version,
                    Err(e) => {
                        warn!(
                            position = %position.id,
                            error = %e,
                            "could not mark position closing, walk postponed"
                        );
                        return;
                    }
                }

                walking.insert(position.id);
                let walker = Arc::clone(&self.walker);
                let tx = walk_tx.clone();
                let cancel = shutdown.child_token();
                tokio::spawn(async move {
                    let result = walker.walk(position, signal, cancel).await;
                    let _ = tx.send(result).await;
                });
            }
            EvalOutcome::SkippedStale => {
                Metrics::eval_skipped_stale();
                debug!(position = %position.id, "evaluation skipped on stale data");
            }
            EvalOutcome::NoExit => {}
        }
    }

    async fn handle_walk_result(&self, result: WalkResult) {
        let now = Utc::now();
        match result.outcome {
            WalkOutcome::Filled { qty, avg_price } => {
                let realized = match self.store.get(&result.position_id).await {
                    Ok(position) => {
                        (avg_price.inner() - position.entry_price.inner()) * qty.inner()
                    }
                    Err(_) => Decimal::ZERO,
                };
                if let Err(e) = self
                    .store
                    .close(&result.position_id, avg_price, result.condition.name())
                    .await
                {
                    warn!(position = %result.position_id, error = %e, "close after fill failed");
                }
                self.ledger.credit(qty.notional(avg_price));
                self.breakers.record_realized(realized, now);
                self.breakers.record_trade(now);
                Metrics::realized_pnl(result.condition.name(), realized.to_f64().unwrap_or(0.0));
                info!(
                    position = %result.position_id,
                    market = %result.market,
                    condition = %result.condition,
                    qty = %qty,
                    avg_price = %avg_price,
                    realized_pnl = %realized,
                    "exit filled"
                );
                self.bus.publish(EngineEvent::ExitFilled {
                    position_id: result.position_id,
                    market: result.market.clone(),
                    condition: result.condition,
                    qty,
                    avg_price,
                    realized_pnl: realized,
                });
            }
            WalkOutcome::GaveUp { filled, avg_price }
            | WalkOutcome::Cancelled { filled, avg_price } => {
                info!(
                    position = %result.position_id,
                    filled = %filled,
                    "walk ended without a full fill, resuming monitoring"
                );
                if filled.is_positive() {
                    self.ledger.credit(filled.notional(avg_price));
                    self.breakers.record_trade(now);
                }
                self.reopen(&result.position_id).await;
            }
            WalkOutcome::Aborted {
                ref reason,
                filled,
                avg_price,
            } => {
                warn!(position = %result.position_id, reason, "walk aborted, resuming monitoring");
                if filled.is_positive() {
                    self.ledger.credit(filled.notional(avg_price));
                }
                self.reopen(&result.position_id).await;
            }
        }
    }

    /// Put a position back to Open after a walk that did not finish it.
    /// A remainder of zero means the fills actually completed it.
    async fn reopen(&self, id: &PositionId) {
        for _ in 0..REOPEN_RETRIES {
            let mut position = match self.store.get(id).await {
                Ok(position) => position,
                Err(e) => {
                    warn!(position = %id, error = %e, "reopen read failed");
                    return;
                }
            };
            if position.quantity.is_zero() {
                if let Err(e) = self
                    .store
                    .close(id, position.mark_price, "filled_during_wind_down")
                    .await
                {
                    warn!(position = %id, error = %e, "close of exhausted position failed");
                }
                return;
            }
            position.status = PositionStatus::Open;
            match self.store.update(&position, position.version).await {
                Ok(_) => return,
                Err(StoreError::VersionMismatch { .. }) => {
                    Metrics::version_conflict();
                    continue;
                }
                Err(e) => {
                    warn!(position = %id, error = %e, "reopen failed");
                    return;
                }
            }
        }
        warn!(position = %id, "reopen lost {REOPEN_RETRIES} version races");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryPositionStore;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pmx_core::{
        ConfigVersion, Fill, GatewayResult, OrderGateway, OrderId, OrderRequest, Price, Qty, Side,
        StrategyConfig, TickSource, TrailingStopState,
    };
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::broadcast;

    /// Gateway that fills every placed order in full, immediately.
    #[derive(Default)]
    struct InstantFillGateway {
        place_calls: AtomicUsize,
        next_id: AtomicUsize,
        orders: Mutex<Vec<(OrderId, Qty, Price)>>,
    }

    #[async_trait]
    impl OrderGateway for InstantFillGateway {
        async fn place_order(&self, request: &OrderRequest) -> GatewayResult<OrderId> {
            self.place_calls.fetch_add(1, Ordering::SeqCst);
            let n = self.next_id.fetch_add(1, Ordering::SeqCst);
            let id = OrderId::new(format!("ord-{n}"));
            self.orders
                .lock()
                .push((id.clone(), request.qty, request.price));
            Ok(id)
        }

        async fn amend_order(&self, _id: &OrderId, _price: Price) -> GatewayResult<()> {
            Ok(())
        }

        async fn cancel_order(&self, _id: &OrderId) -> GatewayResult<()> {
            Ok(())
        }

        async fn fills(&self, id: &OrderId) -> GatewayResult<Vec<Fill>> {
            Ok(self
                .orders
                .lock()
                .iter()
                .filter(|(oid, _, _)| oid == id)
                .map(|(_, qty, price)| Fill::new(*qty, *price))
                .collect())
        }
    }

    struct Harness {
        store: Arc<MemoryPositionStore>,
        gateway: Arc<InstantFillGateway>,
        tick_tx: mpsc::Sender<MarketTick>,
        events: broadcast::Receiver<EngineEvent>,
        shutdown: CancellationToken,
        breakers: Arc<CircuitBreakers>,
        ledger: Arc<BalanceLedger>,
        configs: Arc<pmx_core::ConfigStore>,
    }

    fn spawn_monitor() -> Harness {
        let store: Arc<MemoryPositionStore> = Arc::new(MemoryPositionStore::new());
        let gateway = Arc::new(InstantFillGateway::default());
        let ticks = Arc::new(TickCache::new());
        let bus = EventBus::default();
        let events = bus.subscribe();

        let mut config = StrategyConfig::default();
        config.version = ConfigVersion::new(1);
        let configs = Arc::new(pmx_core::ConfigStore::new(config));
        let breakers = Arc::new(CircuitBreakers::new(Default::default()));
        let ledger = Arc::new(BalanceLedger::new(Decimal::ZERO));

        let walker = Arc::new(Walker::new(
            gateway.clone() as Arc<dyn OrderGateway>,
            store.clone() as Arc<dyn PositionStore>,
            ticks.clone(),
            breakers.clone(),
            bus.clone(),
        ));
        let monitor = Monitor::new(
            store.clone() as Arc<dyn PositionStore>,
            configs.clone(),
            walker,
            ticks,
            breakers.clone(),
            ledger.clone(),
            bus,
            MonitorConfig {
                base_eval_interval_secs: 5,
            },
        );

        let (tick_tx, tick_rx) = mpsc::channel(32);
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        tokio::spawn(async move { monitor.run(tick_rx, token).await });

        Harness {
            store,
            gateway,
            tick_tx,
            events,
            shutdown,
            breakers,
            ledger,
            configs,
        }
    }

    fn position(entry: Decimal) -> Position {
        Position::new(
            MarketId::from("NFL-KC-YES"),
            Side::Yes,
            Qty::new(dec!(100)),
            Price::new(entry),
            ConfigVersion::new(1),
            TrailingStopState::disabled(),
        )
    }

    fn tick(bid: Decimal, ask: Decimal) -> MarketTick {
        MarketTick::new(
            MarketId::from("NFL-KC-YES"),
            Price::new(bid),
            Price::new(ask),
            Qty::new(dec!(500)),
            TickSource::Push,
        )
    }

    fn drain(events: &mut broadcast::Receiver<EngineEvent>) -> Vec<&'static str> {
        let mut kinds = Vec::new();
        while let Ok(event) = events.try_recv() {
            kinds.push(event.kind());
        }
        kinds
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_loss_breach_walks_and_closes_the_position() {
        let mut h = spawn_monitor();
        let p = position(dec!(0.50));
        h.store.insert(p.clone()).await.unwrap();

        // 30% under water: stop-loss trigger on the next pass.
        h.tick_tx.send(tick(dec!(0.35), dec!(0.36))).await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;

        let closed = h.store.get(&p.id).await.unwrap();
        eprintln!("DIAG place_calls={} kinds={:?}", h.gateway.place_calls.load(Ordering::SeqCst), drain(&mut h.events));
        assert_eq!(closed.status, PositionStatus::Closed);
        assert_eq!(h.gateway.place_calls.load(Ordering::SeqCst), 1);
        // Proceeds come back to the ledger: 100 filled at the 0.36 ask.
        assert_eq!(h.ledger.available(), dec!(36));
        // Realized loss and trade both land on the breakers.
        assert!(h
            .breakers
            .trip_state(Utc::now() + chrono::Duration::seconds(1))
            .is_none());

        let kinds = drain(&mut h.events);
        assert!(kinds.contains(&"exit_triggered"));
        assert!(kinds.contains(&"exit_filled"));

        h.shutdown.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_tick_defers_evaluation() {
        let mut h = spawn_monitor();
        let p = position(dec!(0.50));
        h.store.insert(p.clone()).await.unwrap();

        // Same breach, but the quote is well past the staleness window.
        let mut old = tick(dec!(0.35), dec!(0.36));
        old.timestamp = Utc::now() - chrono::Duration::seconds(60);
        h.tick_tx.send(old).await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(h.gateway.place_calls.load(Ordering::SeqCst), 0);
        let current = h.store.get(&p.id).await.unwrap();
        assert_eq!(current.status, PositionStatus::Open);

        let kinds = drain(&mut h.events);
        assert!(!kinds.contains(&"exit_triggered"));

        h.shutdown.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_healthy_position_gets_marked_but_not_exited() {
        let mut h = spawn_monitor();
        let p = position(dec!(0.50));
        h.store.insert(p.clone()).await.unwrap();

        h.tick_tx.send(tick(dec!(0.51), dec!(0.53))).await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;

        let current = h.store.get(&p.id).await.unwrap();
        assert_eq!(current.status, PositionStatus::Open);
        assert_eq!(current.mark_price, Price::new(dec!(0.51)));
        assert!(current.version > 0);
        assert_eq!(h.gateway.place_calls.load(Ordering::SeqCst), 0);

        let kinds = drain(&mut h.events);
        assert!(kinds.contains(&"position_updated"));

        h.shutdown.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_position_evaluates_under_its_entry_config_after_a_roll() {
        let mut h = spawn_monitor();
        let p = position(dec!(0.50)); // opened under v1: 20% stop
        h.store.insert(p.clone()).await.unwrap();

        // Roll thresholds: v2 tightens the stop to 5%. The open position
        // must keep resolving against v1.
        let mut v2 = StrategyConfig::default();
        v2.version = ConfigVersion::new(2);
        v2.exit.stop_loss_pct = dec!(5);
        h.configs.publish(v2);

        // Down 10%: through v2's stop, inside v1's.
        h.tick_tx.send(tick(dec!(0.45), dec!(0.47))).await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(h.gateway.place_calls.load(Ordering::SeqCst), 0);
        let current = h.store.get(&p.id).await.unwrap();
        assert_eq!(current.status, PositionStatus::Open);

        let kinds = drain(&mut h.events);
        assert!(!kinds.contains(&"exit_triggered"));

        h.shutdown.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_closing_position_is_not_evaluated_again() {
        let mut h = spawn_monitor();
        let mut p = position(dec!(0.50));
        p.status = PositionStatus::Closing;
        h.store.insert(p.clone()).await.unwrap();

        h.tick_tx.send(tick(dec!(0.35), dec!(0.36))).await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(h.gateway.place_calls.load(Ordering::SeqCst), 0);
        let current = h.store.get(&p.id).await.unwrap();
        assert_eq!(current.status, PositionStatus::Closing);

        h.shutdown.cancel();
    }
}
