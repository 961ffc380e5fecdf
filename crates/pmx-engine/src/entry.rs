//! Entry placement.
//!
//! Entries are the only flow gated on feed health: no new exposure unless
//! the connection is realtime. Every entry passes the full risk gate, rests
//! as a limit order for a short fill window, and is recorded with the
//! config version current at fill time so later threshold rolls never
//! touch it.

use crate::error::{EngineError, EngineResult};
use crate::ledger::BalanceLedger;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use pmx_core::{
    aggregate_fills, ConfigStore, ConnectionHealth, CorrelationTier, EngineEvent, Fill,
    GatewayError, MarketId, OrderGateway, OrderRequest, Position, PositionStore, Price, Qty, Side,
    TrailingStopState,
};
use pmx_risk::{CircuitBreakers, EntryCheck, RiskGate};
use pmx_telemetry::{EventBus, Metrics};
use pmx_walk::TickCache;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const FILL_POLL_INTERVAL: Duration = Duration::from_secs(1);
const FILL_POLL_ATTEMPTS: usize = 10;

/// A vetted candidate from the strategy layer.
///
/// Correlated exposure is supplied by the caller; the engine does not keep
/// a correlation map of its own.
#[derive(Debug, Clone)]
pub struct EntryRequest {
    pub market: MarketId,
    pub side: Side,
    pub price: Price,
    pub qty: Qty,
    pub correlation_tier: CorrelationTier,
    /// Notional already held in markets correlated with this one.
    pub correlated_notional: Decimal,
    pub expires_at: Option<DateTime<Utc>>,
    pub model_confidence: Decimal,
}

pub struct EntryManager {
    gateway: Arc<dyn OrderGateway>,
    store: Arc<dyn PositionStore>,
    configs: Arc<ConfigStore>,
    ticks: Arc<TickCache>,
    breakers: Arc<CircuitBreakers>,
    health: Arc<RwLock<ConnectionHealth>>,
    bus: EventBus,
    ledger: Arc<BalanceLedger>,
}

impl EntryManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gateway: Arc<dyn OrderGateway>,
        store: Arc<dyn PositionStore>,
        configs: Arc<ConfigStore>,
        ticks: Arc<TickCache>,
        breakers: Arc<CircuitBreakers>,
        health: Arc<RwLock<ConnectionHealth>>,
        bus: EventBus,
        ledger: Arc<BalanceLedger>,
    ) -> Self {
        Self {
            gateway,
            store,
            configs,
            ticks,
            breakers,
            health,
            bus,
            ledger,
        }
    }

    pub fn available_balance(&self) -> Decimal {
        self.ledger.available()
    }

    /// Open a new position. Returns the stored position on success.
    pub async fn open(&self, request: EntryRequest) -> EngineResult<Position> {
        {
            let health = self.health.read();
            if !health.allows_automated_entries() {
                return Err(EngineError::EntryBlocked(format!(
                    "feed not realtime (state {})",
                    health.state
                )));
            }
        }

        let config = self
            .configs
            .current()
            .ok_or_else(|| EngineError::UnknownConfigVersion(self.configs.current_version()))?;
        let tick = self
            .ticks
            .latest(&request.market)
            .ok_or_else(|| EngineError::NoMarketData(request.market.clone()))?;

        let order = OrderRequest::entry_limit(
            request.market.clone(),
            request.side,
            request.price,
            request.qty,
        );
        let check = EntryCheck {
            request: &order,
            tick: &tick,
            available_balance: self.available_balance(),
            correlated_notional: request.correlated_notional,
            correlation_tier: request.correlation_tier,
        };
        if let Err(reason) = RiskGate::check_entry(&check, &config, &self.breakers, Utc::now()) {
            warn!(market = %request.market, %reason, "entry blocked");
            Metrics::gate_block("entry", reason.name());
            self.bus.publish(EngineEvent::RiskGateBlocked {
                action: "entry".to_string(),
                market: request.market.clone(),
                reason: reason.to_string(),
            });
            return Err(EngineError::EntryBlocked(reason.to_string()));
        }

        let order_id = match self.gateway.place_order(&order).await {
            Ok(id) => {
                self.breakers.record_api_success();
                id
            }
            Err(e) => {
                self.breakers.record_api_failure();
                return Err(e.into());
            }
        };
        info!(
            market = %request.market,
            order = %order_id,
            price = %request.price,
            qty = %request.qty,
            "entry order placed"
        );

        // Short fill window; an entry that does not fill quickly is let go
        // rather than chased.
        let mut fills: Vec<Fill> = Vec::new();
        for _ in 0..FILL_POLL_ATTEMPTS {
            tokio::time::sleep(FILL_POLL_INTERVAL).await;
            match self.gateway.fills(&order_id).await {
                Ok(latest) => fills = latest,
                Err(e) => warn!(order = %order_id, error = %e, "entry fill poll failed"),
            }
            let (filled, _) = aggregate_fills(&fills);
            if filled >= request.qty {
                break;
            }
        }

        let (filled, _) = aggregate_fills(&fills);
        if filled < request.qty {
            match self.gateway.cancel_order(&order_id).await {
                Ok(()) => {}
                Err(GatewayError::AlreadyFilled) => {
                    // The cancel raced a fill; the final tape decides.
                    match self.gateway.fills(&order_id).await {
                        Ok(latest) => fills = latest,
                        Err(e) => warn!(order = %order_id, error = %e, "final fill fetch failed"),
                    }
                }
                Err(e) => warn!(order = %order_id, error = %e, "entry cancel failed"),
            }
        }

        let (filled, avg_price) = aggregate_fills(&fills);
        if filled.is_zero() {
            info!(market = %request.market, order = %order_id, "entry expired unfilled");
            return Err(EngineError::EntryUnfilled);
        }

        let activation = Price::new(
            avg_price.inner()
                * (Decimal::ONE + config.exit.trailing_activation_pct / Decimal::from(100)),
        );
        let trailing = TrailingStopState::new(activation, config.exit.trailing_distance);

        let mut position = Position::new(
            request.market.clone(),
            request.side,
            filled,
            avg_price,
            config.version,
            trailing,
        );
        position.expires_at = request.expires_at;
        position.model_confidence = request.model_confidence;

        self.ledger.debit(filled.notional(avg_price));
        self.breakers.record_trade(Utc::now());
        self.store.insert(position.clone()).await?;

        info!(
            position = %position.id,
            market = %position.market,
            side = ?position.side,
            qty = %position.quantity,
            entry_price = %position.entry_price,
            config = %position.config_version,
            "position opened"
        );
        self.bus.publish(EngineEvent::PositionOpened {
            position_id: position.id,
            market: position.market.clone(),
            side: position.side,
            qty: position.quantity,
            entry_price: position.entry_price,
            config_version: position.config_version,
        });
        Ok(position)
    }
}
