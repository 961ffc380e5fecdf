//! Application wiring and the top-level run loop.

use crate::config::{AppConfig, RunMode};
use crate::error::{AppError, AppResult};
use crate::sim::{PaperFeed, PaperGateway};
use chrono::Utc;
use pmx_core::{
    ConfigStore, CorrelationTier, EngineEvent, MarketDataSource, OrderGateway, PositionStore,
};
use pmx_engine::{BalanceLedger, EntryManager, EntryRequest, MemoryPositionStore, Monitor};
use pmx_feed::FeedSupervisor;
use pmx_risk::CircuitBreakers;
use pmx_telemetry::EventBus;
use pmx_walk::{TickCache, Walker};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const TICK_CHANNEL_CAPACITY: usize = 1024;

pub struct Application {
    config: AppConfig,
}

impl Application {
    pub fn new(config: AppConfig) -> AppResult<Self> {
        if config.markets.is_empty() {
            return Err(AppError::Config("no markets configured".to_string()));
        }
        Ok(Self { config })
    }

    pub async fn run(self) -> AppResult<()> {
        info!(mode = ?self.config.mode, markets = ?self.config.markets, "starting application");

        let (source, gateway): (Arc<dyn MarketDataSource>, Arc<dyn OrderGateway>) =
            match self.config.mode {
                RunMode::Paper => (
                    Arc::new(PaperFeed::new(self.config.sim.clone())),
                    Arc::new(PaperGateway::new()),
                ),
                RunMode::Live => {
                    return Err(AppError::Config(
                        "live mode requires a broker adapter; run in paper mode".to_string(),
                    ));
                }
            };

        let strategy = self.config.strategy_bundle();
        let bus = EventBus::default();
        let store: Arc<dyn PositionStore> = Arc::new(MemoryPositionStore::new());
        let ticks = Arc::new(TickCache::new());
        let configs = Arc::new(ConfigStore::new(strategy.clone()));
        let breakers = Arc::new(CircuitBreakers::new(strategy.breakers.clone()));
        let ledger = Arc::new(BalanceLedger::new(self.config.starting_balance));
        info!(version = %configs.current_version(), "strategy config published");

        let markets = self.config.market_ids();
        let supervisor = FeedSupervisor::new(
            Arc::clone(&source),
            self.config.feed.to_feed_config(markets.clone()),
            bus.clone(),
        );
        let health = supervisor.health_handle();

        let walker = Arc::new(Walker::new(
            Arc::clone(&gateway),
            Arc::clone(&store),
            Arc::clone(&ticks),
            Arc::clone(&breakers),
            bus.clone(),
        ));
        let monitor = Monitor::new(
            Arc::clone(&store),
            Arc::clone(&configs),
            walker,
            Arc::clone(&ticks),
            Arc::clone(&breakers),
            Arc::clone(&ledger),
            bus.clone(),
            self.config.monitor.to_monitor_config(),
        );
        let entries = Arc::new(EntryManager::new(
            gateway,
            store,
            configs,
            Arc::clone(&ticks),
            breakers,
            health,
            bus.clone(),
            ledger,
        ));

        let shutdown = CancellationToken::new();
        let (tick_tx, tick_rx) = mpsc::channel(TICK_CHANNEL_CAPACITY);
        let feed_handle = tokio::spawn(supervisor.run(tick_tx, shutdown.clone()));
        let monitor_handle = tokio::spawn(monitor.run(tick_rx, shutdown.clone()));

        if self.config.mode == RunMode::Paper {
            spawn_paper_entries(
                Arc::clone(&entries),
                markets,
                self.config.sim.entry_qty,
                Arc::clone(&ticks),
                shutdown.clone(),
            );
        }

        let mut events = bus.subscribe();
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown signal received");
                    break;
                }
                event = events.recv() => match event {
                    Ok(event) => log_event(&event),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "event stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        shutdown.cancel();
        if let Ok(Err(e)) = feed_handle.await {
            error!(error = %e, "feed supervisor exited with error");
        }
        if let Ok(Err(e)) = monitor_handle.await {
            error!(error = %e, "monitor exited with error");
        }
        info!("application stopped");
        Ok(())
    }
}

/// Paper mode opens one demo position per market once the feed warms up,
/// so the full entry-monitor-exit lifecycle is visible in a dry run.
fn spawn_paper_entries(
    entries: Arc<EntryManager>,
    markets: Vec<pmx_core::MarketId>,
    qty: Decimal,
    ticks: Arc<TickCache>,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        // Wait for the feed to reach SUBSCRIBED and ticks to arrive.
        tokio::select! {
            () = shutdown.cancelled() => return,
            () = tokio::time::sleep(Duration::from_secs(5)) => {}
        }

        for market in markets {
            let Some(tick) = ticks.latest(&market) else {
                warn!(market = %market, "no tick yet, skipping demo entry");
                continue;
            };
            let request = EntryRequest {
                market: market.clone(),
                side: pmx_core::Side::Yes,
                price: tick.ask,
                qty: pmx_core::Qty::new(qty),
                correlation_tier: CorrelationTier::Moderate,
                correlated_notional: Decimal::ZERO,
                expires_at: Some(Utc::now() + chrono::Duration::hours(4)),
                model_confidence: Decimal::new(65, 2),
            };
            match entries.open(request).await {
                Ok(position) => info!(position = %position.id, market = %market, "demo position opened"),
                Err(e) => warn!(market = %market, error = %e, "demo entry failed"),
            }
        }
    });
}

fn log_event(event: &EngineEvent) {
    match event {
        EngineEvent::ManualInterventionRequired { reason, at } => {
            error!(%reason, %at, "MANUAL INTERVENTION REQUIRED");
        }
        EngineEvent::RiskGateBlocked { action, market, reason } => {
            warn!(%action, %market, %reason, "risk gate block");
        }
        EngineEvent::WalkAborted { position_id, market, reason, .. } => {
            warn!(position = %position_id, %market, %reason, "walk aborted");
        }
        EngineEvent::PositionUpdated { .. } => {} // too chatty for the event log
        other => info!(kind = other.kind(), "engine event"),
    }
}
