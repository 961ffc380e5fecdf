//! The exit walk task.
//!
//! One walk owns one position's exit from placement to a terminal outcome.
//! The resting limit starts at the touch and is re-pegged every 10s off the
//! freshest cached tick; at the priority's deadline the walk resolves:
//! Critical and High escalate to a marketable order (through the risk
//! gate), Medium gives up and re-enters monitoring, Low simply cancels.
//!
//! Partial fills are written to the position store the moment they are
//! seen, under optimistic versioning. A cancel that races a fill treats
//! the fill as authoritative.

use crate::cache::TickCache;
use crate::gateway::SerializedGateway;
use crate::stage::WalkStage;
use chrono::Utc;
use pmx_core::{
    aggregate_fills, EngineEvent, ExitCondition, ExitPriority, ExitSignal, Fill, GatewayError,
    GatewayResult, MarketId, OrderGateway, OrderId, OrderRequest, Position, PositionId,
    PositionStatus, PositionStore, Price, Qty, StoreError,
};
use pmx_exit::escalation_window_secs;
use pmx_risk::{CircuitBreakers, EscalationCheck, RiskGate};
use pmx_telemetry::{EventBus, Metrics};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const STEP_INTERVAL: Duration = Duration::from_secs(10);
const FILL_POLL_INTERVAL: Duration = Duration::from_secs(2);
const RETRY_DELAY: Duration = Duration::from_millis(500);
const CAS_RETRIES: usize = 3;

/// Terminal result of one walk.
#[derive(Debug, Clone, PartialEq)]
pub enum WalkOutcome {
    Filled {
        qty: Qty,
        avg_price: Price,
    },
    /// Deadline passed on a Medium exit; the position returns to monitoring.
    GaveUp {
        filled: Qty,
        avg_price: Price,
    },
    /// Low-priority timeout or external cancellation.
    Cancelled {
        filled: Qty,
        avg_price: Price,
    },
    /// A reject or blocked escalation ended the walk early.
    Aborted {
        reason: String,
        filled: Qty,
        avg_price: Price,
    },
}

impl WalkOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Filled { .. } => "filled",
            Self::GaveUp { .. } => "gave_up",
            Self::Cancelled { .. } => "cancelled",
            Self::Aborted { .. } => "aborted",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WalkResult {
    pub position_id: PositionId,
    pub market: MarketId,
    pub condition: ExitCondition,
    pub outcome: WalkOutcome,
}

enum WindDown {
    Cancelled,
    GaveUp,
    Aborted(String),
}

pub struct Walker {
    gateway: Arc<SerializedGateway>,
    store: Arc<dyn PositionStore>,
    ticks: Arc<TickCache>,
    breakers: Arc<CircuitBreakers>,
    bus: EventBus,
}

impl Walker {
    pub fn new(
        gateway: Arc<dyn OrderGateway>,
        store: Arc<dyn PositionStore>,
        ticks: Arc<TickCache>,
        breakers: Arc<CircuitBreakers>,
        bus: EventBus,
    ) -> Self {
        Self {
            gateway: Arc::new(SerializedGateway::new(gateway)),
            store,
            ticks,
            breakers,
            bus,
        }
    }

    /// Walk one exit to a terminal outcome.
    pub async fn walk(
        &self,
        position: Position,
        signal: ExitSignal,
        cancel: CancellationToken,
    ) -> WalkResult {
        let start = tokio::time::Instant::now();
        info!(
            position = %position.id,
            market = %position.market,
            condition = %signal.condition,
            priority = %signal.priority,
            price = %signal.limit_price,
            "starting exit walk"
        );

        let outcome = self.run(&position, &signal, &cancel, start).await;
        Metrics::walk_outcome(outcome.label(), start.elapsed().as_secs_f64());
        info!(
            position = %position.id,
            outcome = outcome.label(),
            elapsed_secs = start.elapsed().as_secs(),
            "exit walk finished"
        );

        if let WalkOutcome::Aborted { reason, .. } = &outcome {
            self.bus.publish(EngineEvent::WalkAborted {
                position_id: position.id,
                market: position.market.clone(),
                condition: signal.condition,
                reason: reason.clone(),
            });
        }

        WalkResult {
            position_id: position.id,
            market: position.market.clone(),
            condition: signal.condition,
            outcome,
        }
    }

    async fn run(
        &self,
        position: &Position,
        signal: &ExitSignal,
        cancel: &CancellationToken,
        start: tokio::time::Instant,
    ) -> WalkOutcome {
        let deadline =
            start + Duration::from_secs(escalation_window_secs(signal.priority) as u64);

        let request = OrderRequest::exit_limit(
            position.market.clone(),
            position.side,
            signal.limit_price,
            position.quantity,
        );
        let first = match self.call_with_retry(|| self.gateway.place_order(&request)).await {
            Ok(id) => id,
            Err(e) => {
                return WalkOutcome::Aborted {
                    reason: format!("place failed: {e}"),
                    filled: Qty::ZERO,
                    avg_price: Price::ZERO,
                }
            }
        };

        let mut orders = vec![first.clone()];
        let mut resting = Some(first);
        let mut resting_price = signal.limit_price;
        let mut synced = Qty::ZERO;

        let mut step = tokio::time::interval_at(start + STEP_INTERVAL, STEP_INTERVAL);
        let mut fill_poll =
            tokio::time::interval_at(start + FILL_POLL_INTERVAL, FILL_POLL_INTERVAL);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    return self
                        .wind_down(position, &orders, resting.take(), synced, WindDown::Cancelled)
                        .await;
                }
                () = tokio::time::sleep_until(deadline) => {
                    return self
                        .resolve_deadline(position, signal, &mut orders, resting.take(), &mut synced, cancel)
                        .await;
                }
                _ = step.tick() => {
                    let stage = WalkStage::at(start.elapsed());
                    if let Some(order_id) = resting.as_ref() {
                        match self.repeg(position, order_id, resting_price, stage).await {
                            Ok(Some(new_price)) => resting_price = new_price,
                            Ok(None) => {}
                            // The fill poll settles it.
                            Err(GatewayError::AlreadyFilled) => {}
                            Err(e @ GatewayError::Rejected(_)) => {
                                return self
                                    .wind_down(
                                        position,
                                        &orders,
                                        resting.take(),
                                        synced,
                                        WindDown::Aborted(format!("amend rejected: {e}")),
                                    )
                                    .await;
                            }
                            Err(e) => {
                                warn!(position = %position.id, error = %e, "amend failed, holding previous price");
                            }
                        }
                    }
                }
                _ = fill_poll.tick() => {
                    match self.settle_fills(position, &orders, &mut synced).await {
                        Ok(Some(done)) => return done,
                        Ok(None) => {}
                        Err(e) => warn!(position = %position.id, error = %e, "fill poll failed"),
                    }
                }
            }
        }
    }

    /// Amend the resting order to the stage price computed off the freshest
    /// tick. Returns the new price when an amend was issued.
    async fn repeg(
        &self,
        position: &Position,
        order_id: &OrderId,
        current: Price,
        stage: WalkStage,
    ) -> GatewayResult<Option<Price>> {
        let Some(tick) = self.ticks.latest(&position.market) else {
            return Ok(None);
        };
        let ask = tick.ask_for(position.side);
        let bid = tick.bid_for(position.side);
        if bid >= ask {
            // Crossed in side space; hold until the book repairs.
            return Ok(None);
        }

        let target = Price::new(ask.inner() - (ask.inner() - bid.inner()) * stage.fraction())
            .clamp_probability();
        if target == current {
            return Ok(None);
        }

        self.call_with_retry(|| self.gateway.amend_order(order_id, target))
            .await?;
        Metrics::walk_amend(stage.name());
        debug!(
            position = %position.id,
            stage = stage.name(),
            price = %target,
            "walked order price"
        );
        Ok(Some(target))
    }

    /// Apply the priority's deadline policy.
    async fn resolve_deadline(
        &self,
        position: &Position,
        signal: &ExitSignal,
        orders: &mut Vec<OrderId>,
        resting: Option<OrderId>,
        synced: &mut Qty,
        cancel: &CancellationToken,
    ) -> WalkOutcome {
        match signal.priority {
            ExitPriority::Low => {
                self.wind_down(position, orders, resting, *synced, WindDown::Cancelled)
                    .await
            }
            ExitPriority::Medium => {
                self.wind_down(position, orders, resting, *synced, WindDown::GaveUp)
                    .await
            }
            ExitPriority::High | ExitPriority::Critical => {
                self.escalate(position, orders, resting, synced, cancel).await
            }
        }
    }

    /// Convert the remainder to a marketable order, gated for safety.
    async fn escalate(
        &self,
        position: &Position,
        orders: &mut Vec<OrderId>,
        resting: Option<OrderId>,
        synced: &mut Qty,
        cancel: &CancellationToken,
    ) -> WalkOutcome {
        let Some(tick) = self.ticks.latest(&position.market) else {
            return self
                .wind_down(
                    position,
                    orders,
                    resting,
                    *synced,
                    WindDown::Aborted("no market data for escalation".to_string()),
                )
                .await;
        };
        let cross = tick.bid_for(position.side).clamp_probability();

        let check = EscalationCheck {
            tick: &tick,
            price: cross,
        };
        if let Err(reason) = RiskGate::check_escalation(&check, &self.breakers, Utc::now()) {
            Metrics::gate_block("escalation", reason.name());
            self.bus.publish(EngineEvent::RiskGateBlocked {
                action: "escalation".to_string(),
                market: position.market.clone(),
                reason: reason.to_string(),
            });
            return self
                .wind_down(
                    position,
                    orders,
                    resting,
                    *synced,
                    WindDown::Aborted(format!("escalation blocked: {reason}")),
                )
                .await;
        }

        // Take the resting order down first so the marketable cannot
        // double-fill against it.
        if let Some(order_id) = resting {
            match self
                .call_with_retry(|| self.gateway.cancel_order(&order_id))
                .await
            {
                Ok(()) => {}
                Err(GatewayError::AlreadyFilled) => {
                    info!(position = %position.id, "cancel raced a fill, fill is authoritative");
                }
                Err(e) => warn!(position = %position.id, error = %e, "cancel before escalation failed"),
            }
        }
        match self.settle_fills(position, orders, synced).await {
            Ok(Some(done)) => return done,
            Ok(None) => {}
            Err(e) => warn!(position = %position.id, error = %e, "fill check before escalation failed"),
        }

        let remaining = position.quantity.saturating_sub(*synced);
        let request = OrderRequest::exit_marketable(
            position.market.clone(),
            position.side,
            cross,
            remaining,
        );
        info!(
            position = %position.id,
            price = %cross,
            qty = %remaining,
            "escalating to marketable"
        );
        match self.call_with_retry(|| self.gateway.place_order(&request)).await {
            Ok(order_id) => orders.push(order_id),
            Err(e) => {
                return WalkOutcome::Aborted {
                    reason: format!("marketable place failed: {e}"),
                    filled: *synced,
                    avg_price: Price::ZERO,
                }
            }
        }

        let mut poll = tokio::time::interval(FILL_POLL_INTERVAL);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    return self
                        .wind_down(position, orders, None, *synced, WindDown::Cancelled)
                        .await;
                }
                _ = poll.tick() => {
                    match self.settle_fills(position, orders, synced).await {
                        Ok(Some(done)) => return done,
                        Ok(None) => {}
                        Err(e) => warn!(position = %position.id, error = %e, "fill poll failed"),
                    }
                }
            }
        }
    }

    /// Cancel anything resting, reconcile fills one last time, and map the
    /// remainder to the wind-down mode.
    async fn wind_down(
        &self,
        position: &Position,
        orders: &[OrderId],
        resting: Option<OrderId>,
        synced: Qty,
        mode: WindDown,
    ) -> WalkOutcome {
        if let Some(order_id) = resting {
            match self
                .call_with_retry(|| self.gateway.cancel_order(&order_id))
                .await
            {
                Ok(()) => {}
                Err(GatewayError::AlreadyFilled) => {
                    info!(position = %position.id, "cancel raced a fill, fill is authoritative");
                }
                Err(e) => warn!(position = %position.id, error = %e, "cancel failed"),
            }
        }

        let (filled, avg_price) = match self.collect_fills(orders).await {
            Ok(fills) => aggregate_fills(&fills),
            Err(e) => {
                warn!(position = %position.id, error = %e, "final fill reconciliation failed");
                (synced, Price::ZERO)
            }
        };
        if filled > synced {
            self.sync_partial(position, filled, avg_price).await;
        }
        if position.quantity.is_positive() && filled >= position.quantity {
            return WalkOutcome::Filled {
                qty: filled,
                avg_price,
            };
        }

        match mode {
            WindDown::Cancelled => WalkOutcome::Cancelled {
                filled,
                avg_price,
            },
            WindDown::GaveUp => WalkOutcome::GaveUp {
                filled,
                avg_price,
            },
            WindDown::Aborted(reason) => WalkOutcome::Aborted {
                reason,
                filled,
                avg_price,
            },
        }
    }

    /// Poll fills across every order this walk placed; push any new
    /// partial fill into the store immediately.
    async fn settle_fills(
        &self,
        position: &Position,
        orders: &[OrderId],
        synced: &mut Qty,
    ) -> GatewayResult<Option<WalkOutcome>> {
        let fills = self.collect_fills(orders).await?;
        let (total, avg_price) = aggregate_fills(&fills);

        if total > *synced {
            self.sync_partial(position, total, avg_price).await;
            *synced = total;
        }
        if position.quantity.is_positive() && total >= position.quantity {
            return Ok(Some(WalkOutcome::Filled {
                qty: total,
                avg_price,
            }));
        }
        Ok(None)
    }

    async fn collect_fills(&self, orders: &[OrderId]) -> GatewayResult<Vec<Fill>> {
        let mut all = Vec::new();
        for order_id in orders {
            all.extend(self.gateway.fills(order_id).await?);
        }
        Ok(all)
    }

    /// CAS the reduced quantity into the store. A version conflict means a
    /// concurrent writer; re-read and retry a few times, then leave it for
    /// the next reconciliation pass.
    async fn sync_partial(&self, position: &Position, total_filled: Qty, avg_price: Price) {
        for _ in 0..CAS_RETRIES {
            let mut latest = match self.store.get(&position.id).await {
                Ok(p) => p,
                Err(e) => {
                    warn!(position = %position.id, error = %e, "position read failed during fill sync");
                    return;
                }
            };
            latest.quantity = position.quantity.saturating_sub(total_filled);
            latest.status = PositionStatus::Closing;

            match self.store.update(&latest, latest.version).await {
                Ok(version) => {
                    debug!(
                        position = %position.id,
                        filled = %total_filled,
                        remaining = %latest.quantity,
                        "partial fill synced"
                    );
                    self.bus.publish(EngineEvent::PositionUpdated {
                        position_id: position.id,
                        mark_price: avg_price,
                        unrealized_pnl: latest.unrealized_pnl,
                        version,
                    });
                    return;
                }
                Err(StoreError::VersionMismatch { .. }) => {
                    Metrics::version_conflict();
                    continue;
                }
                Err(e) => {
                    warn!(position = %position.id, error = %e, "partial fill update failed");
                    return;
                }
            }
        }
        warn!(position = %position.id, "partial fill sync lost {CAS_RETRIES} version races");
    }

    /// Transient gateway errors get exactly one retry; everything else is
    /// returned to the caller as-is.
    async fn call_with_retry<T, F, Fut>(&self, op: F) -> GatewayResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        match op().await {
            Ok(value) => {
                self.breakers.record_api_success();
                Ok(value)
            }
            Err(e) if e.is_transient() => {
                self.breakers.record_api_failure();
                warn!(error = %e, "transient gateway error, retrying once");
                tokio::time::sleep(RETRY_DELAY).await;
                let second = op().await;
                match &second {
                    Ok(_) => self.breakers.record_api_success(),
                    Err(e2) if e2.is_transient() => {
                        self.breakers.record_api_failure();
                    }
                    Err(_) => {}
                }
                second
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pmx_core::{
        BreakerThresholds, ConfigVersion, MarketTick, OrderKind, Side, StoreResult, TickSource,
        TrailingStopState,
    };
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    #[derive(Default)]
    struct FakeGateway {
        place_calls: AtomicU32,
        placed: Mutex<Vec<(OrderId, OrderRequest)>>,
        amends: Mutex<Vec<(OrderId, Price)>>,
        cancels: Mutex<Vec<OrderId>>,
        fills: Mutex<HashMap<OrderId, Vec<Fill>>>,
        timeout_first_place: AtomicBool,
        reject_place: AtomicBool,
        cancel_already_filled: AtomicBool,
        auto_fill_marketable: AtomicBool,
        /// Fills stay invisible to polling until the order is cancelled,
        /// modelling a fill that lands between the last poll and the cancel.
        hide_fills_until_cancel: AtomicBool,
    }

    impl FakeGateway {
        fn seed_fill(&self, order_id: &OrderId, qty: Decimal, price: Decimal) {
            self.fills
                .lock()
                .entry(order_id.clone())
                .or_default()
                .push(Fill::new(Qty::new(qty), Price::new(price)));
        }

        fn placed_marketable(&self) -> Vec<OrderRequest> {
            self.placed
                .lock()
                .iter()
                .filter(|(_, r)| r.kind == OrderKind::Marketable)
                .map(|(_, r)| r.clone())
                .collect()
        }
    }

    #[async_trait]
    impl OrderGateway for FakeGateway {
        async fn place_order(&self, request: &OrderRequest) -> GatewayResult<OrderId> {
            let n = self.place_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.timeout_first_place.swap(false, Ordering::SeqCst) {
                return Err(GatewayError::Timeout(1_000));
            }
            if self.reject_place.load(Ordering::SeqCst) {
                return Err(GatewayError::Rejected("market closed".to_string()));
            }
            let id = OrderId::new(format!("o{n}"));
            self.placed.lock().push((id.clone(), request.clone()));
            if self.auto_fill_marketable.load(Ordering::SeqCst)
                && request.kind == OrderKind::Marketable
            {
                self.seed_fill(&id, request.qty.inner(), request.price.inner());
            }
            Ok(id)
        }

        async fn amend_order(&self, order_id: &OrderId, new_price: Price) -> GatewayResult<()> {
            self.amends.lock().push((order_id.clone(), new_price));
            Ok(())
        }

        async fn cancel_order(&self, order_id: &OrderId) -> GatewayResult<()> {
            self.cancels.lock().push(order_id.clone());
            if self.cancel_already_filled.load(Ordering::SeqCst) {
                return Err(GatewayError::AlreadyFilled);
            }
            Ok(())
        }

        async fn fills(&self, order_id: &OrderId) -> GatewayResult<Vec<Fill>> {
            if self.hide_fills_until_cancel.load(Ordering::SeqCst)
                && !self.cancels.lock().contains(order_id)
            {
                return Ok(Vec::new());
            }
            Ok(self.fills.lock().get(order_id).cloned().unwrap_or_default())
        }
    }

    #[derive(Default)]
    struct MemStore {
        positions: Mutex<HashMap<PositionId, Position>>,
    }

    #[async_trait]
    impl PositionStore for MemStore {
        async fn open_positions(&self) -> StoreResult<Vec<Position>> {
            Ok(self.positions.lock().values().cloned().collect())
        }

        async fn get(&self, id: &PositionId) -> StoreResult<Position> {
            self.positions
                .lock()
                .get(id)
                .cloned()
                .ok_or(StoreError::NotFound(*id))
        }

        async fn insert(&self, position: Position) -> StoreResult<()> {
            self.positions.lock().insert(position.id, position);
            Ok(())
        }

        async fn update(&self, position: &Position, expected_version: u64) -> StoreResult<u64> {
            let mut map = self.positions.lock();
            let existing = map
                .get_mut(&position.id)
                .ok_or(StoreError::NotFound(position.id))?;
            if existing.version != expected_version {
                return Err(StoreError::VersionMismatch {
                    id: position.id,
                    expected: expected_version,
                    actual: existing.version,
                });
            }
            let mut next = position.clone();
            next.version = expected_version + 1;
            *existing = next;
            Ok(expected_version + 1)
        }

        async fn close(&self, id: &PositionId, _exit_price: Price, _reason: &str) -> StoreResult<()> {
            let mut map = self.positions.lock();
            let existing = map.get_mut(id).ok_or(StoreError::NotFound(*id))?;
            existing.status = PositionStatus::Closed;
            Ok(())
        }
    }

    struct Harness {
        gateway: Arc<FakeGateway>,
        store: Arc<MemStore>,
        ticks: Arc<TickCache>,
        walker: Walker,
        bus: EventBus,
    }

    fn harness() -> Harness {
        let gateway = Arc::new(FakeGateway::default());
        let store = Arc::new(MemStore::default());
        let ticks = Arc::new(TickCache::new());
        let bus = EventBus::default();
        let walker = Walker::new(
            gateway.clone(),
            store.clone(),
            ticks.clone(),
            Arc::new(CircuitBreakers::new(BreakerThresholds::default())),
            bus.clone(),
        );
        Harness {
            gateway,
            store,
            ticks,
            walker,
            bus,
        }
    }

    fn seed_tick(ticks: &TickCache, bid: Decimal, ask: Decimal) {
        ticks.insert(MarketTick::new(
            MarketId::from("M"),
            Price::new(bid),
            Price::new(ask),
            Qty::new(dec!(500)),
            TickSource::Push,
        ));
    }

    async fn open_position(store: &MemStore, qty: Decimal) -> Position {
        let position = Position::new(
            MarketId::from("M"),
            Side::Yes,
            Qty::new(qty),
            Price::new(dec!(0.50)),
            ConfigVersion::new(1),
            TrailingStopState::disabled(),
        );
        store.insert(position.clone()).await.unwrap();
        position
    }

    fn signal_for(condition: ExitCondition, limit: Decimal) -> ExitSignal {
        let priority = condition.priority();
        ExitSignal {
            condition,
            priority,
            deadline: Utc::now()
                + chrono::Duration::seconds(escalation_window_secs(priority)),
            limit_price: Price::new(limit),
            deviation: Decimal::ONE,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_critical_walk_escalates_to_one_marketable_at_deadline() {
        let h = harness();
        seed_tick(&h.ticks, dec!(0.40), dec!(0.44));
        h.gateway.auto_fill_marketable.store(true, Ordering::SeqCst);
        let position = open_position(&h.store, dec!(100)).await;

        let result = h
            .walker
            .walk(
                position.clone(),
                signal_for(ExitCondition::StopLoss, dec!(0.44)),
                CancellationToken::new(),
            )
            .await;

        assert_eq!(
            result.outcome,
            WalkOutcome::Filled {
                qty: Qty::new(dec!(100)),
                avg_price: Price::new(dec!(0.40)),
            }
        );

        // Quarter-spread at 30s, half-spread at 60s, nothing in between.
        let amends: Vec<Decimal> = h.gateway.amends.lock().iter().map(|(_, p)| p.inner()).collect();
        assert_eq!(amends, vec![dec!(0.43), dec!(0.42)]);

        // Exactly one marketable, for the full remainder, at the bid.
        let marketables = h.gateway.placed_marketable();
        assert_eq!(marketables.len(), 1);
        assert_eq!(marketables[0].qty, Qty::new(dec!(100)));
        assert_eq!(marketables[0].price, Price::new(dec!(0.40)));
        assert!(marketables[0].selling);

        // The resting limit was taken down before the marketable went up.
        assert_eq!(h.gateway.cancels.lock().len(), 1);

        // Store reflects the fill.
        let stored = h.store.get(&position.id).await.unwrap();
        assert_eq!(stored.quantity, Qty::ZERO);
        assert_eq!(stored.status, PositionStatus::Closing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_low_priority_cancels_at_deadline_without_escalating() {
        let h = harness();
        seed_tick(&h.ticks, dec!(0.40), dec!(0.44));
        let position = open_position(&h.store, dec!(100)).await;

        let result = h
            .walker
            .walk(
                position,
                signal_for(ExitCondition::Rebalance, dec!(0.44)),
                CancellationToken::new(),
            )
            .await;

        assert!(matches!(
            result.outcome,
            WalkOutcome::Cancelled { filled, .. } if filled.is_zero()
        ));
        assert!(h.gateway.placed_marketable().is_empty());
        assert_eq!(h.gateway.cancels.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_medium_priority_gives_up_at_deadline() {
        let h = harness();
        seed_tick(&h.ticks, dec!(0.40), dec!(0.44));
        let position = open_position(&h.store, dec!(100)).await;

        let result = h
            .walker
            .walk(
                position,
                signal_for(ExitCondition::TrailingStop, dec!(0.44)),
                CancellationToken::new(),
            )
            .await;

        assert!(matches!(
            result.outcome,
            WalkOutcome::GaveUp { filled, .. } if filled.is_zero()
        ));
        assert!(h.gateway.placed_marketable().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_racing_fill_settles_as_filled() {
        let h = harness();
        seed_tick(&h.ticks, dec!(0.40), dec!(0.44));
        h.gateway.cancel_already_filled.store(true, Ordering::SeqCst);
        let position = open_position(&h.store, dec!(100)).await;

        // The full fill exists at the broker but is only discovered when
        // the cancel comes back "already filled".
        h.gateway
            .hide_fills_until_cancel
            .store(true, Ordering::SeqCst);
        h.gateway.seed_fill(&OrderId::new("o1"), dec!(100), dec!(0.44));

        let result = h
            .walker
            .walk(
                position,
                signal_for(ExitCondition::Rebalance, dec!(0.44)),
                CancellationToken::new(),
            )
            .await;

        assert_eq!(
            result.outcome,
            WalkOutcome::Filled {
                qty: Qty::new(dec!(100)),
                avg_price: Price::new(dec!(0.44)),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_place_aborts_and_publishes() {
        let h = harness();
        seed_tick(&h.ticks, dec!(0.40), dec!(0.44));
        h.gateway.reject_place.store(true, Ordering::SeqCst);
        let position = open_position(&h.store, dec!(100)).await;
        let mut events = h.bus.subscribe();

        let result = h
            .walker
            .walk(
                position,
                signal_for(ExitCondition::StopLoss, dec!(0.44)),
                CancellationToken::new(),
            )
            .await;

        assert!(matches!(result.outcome, WalkOutcome::Aborted { .. }));
        let event = events.recv().await.unwrap();
        assert_eq!(event.kind(), "walk_aborted");
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_place_error_retried_once() {
        let h = harness();
        seed_tick(&h.ticks, dec!(0.40), dec!(0.44));
        h.gateway.timeout_first_place.store(true, Ordering::SeqCst);
        let position = open_position(&h.store, dec!(100)).await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = h
            .walker
            .walk(position, signal_for(ExitCondition::Rebalance, dec!(0.44)), cancel)
            .await;

        // First attempt timed out, second succeeded, then the pre-cancelled
        // token wound the walk down.
        assert_eq!(h.gateway.place_calls.load(Ordering::SeqCst), 2);
        assert!(matches!(result.outcome, WalkOutcome::Cancelled { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_fill_synced_to_store_immediately() {
        let h = harness();
        seed_tick(&h.ticks, dec!(0.40), dec!(0.44));
        let position = open_position(&h.store, dec!(100)).await;
        let mut events = h.bus.subscribe();

        let gateway = h.gateway.clone();
        let seeder = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            gateway.seed_fill(&OrderId::new("o1"), dec!(40), dec!(0.44));
        });

        let result = h
            .walker
            .walk(
                position.clone(),
                signal_for(ExitCondition::Rebalance, dec!(0.44)),
                CancellationToken::new(),
            )
            .await;
        seeder.await.unwrap();

        assert!(matches!(
            result.outcome,
            WalkOutcome::Cancelled { filled, .. } if filled == Qty::new(dec!(40))
        ));

        let stored = h.store.get(&position.id).await.unwrap();
        assert_eq!(stored.quantity, Qty::new(dec!(60)));
        assert_eq!(stored.status, PositionStatus::Closing);
        assert!(stored.version > 0);

        let event = events.recv().await.unwrap();
        assert_eq!(event.kind(), "position_updated");
    }
}
