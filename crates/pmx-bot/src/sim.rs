//! Paper-trading adapters.
//!
//! A deterministic zigzag feed and an instant-fill gateway, enough to run
//! the whole engine end to end without a broker. The feed keeps a tick
//! history so the supervisor's gap replay path works in paper mode too.

use crate::config::SimSection;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use pmx_core::{
    Fill, GatewayError, GatewayResult, MarketDataSource, MarketId, MarketTick, OrderGateway,
    OrderId, OrderRequest, Price, Qty, SourceResult, TickSource,
};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

const HISTORY_CAP: usize = 10_000;

/// Simulated market data source.
///
/// Each subscribed market walks its mid price up by `step` per tick until
/// 0.90, then back down to 0.10, forever. Every emitted tick is recorded
/// for `poll_since`.
pub struct PaperFeed {
    config: SimSection,
    history: Arc<Mutex<Vec<MarketTick>>>,
}

impl PaperFeed {
    pub fn new(config: SimSection) -> Self {
        Self {
            config,
            history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn record(history: &Mutex<Vec<MarketTick>>, tick: MarketTick) {
        let mut h = history.lock();
        h.push(tick);
        if h.len() > HISTORY_CAP {
            let drop = h.len() - HISTORY_CAP;
            h.drain(..drop);
        }
    }
}

#[async_trait]
impl MarketDataSource for PaperFeed {
    async fn connect(&self) -> SourceResult<()> {
        Ok(())
    }

    async fn authenticate(&self) -> SourceResult<()> {
        Ok(())
    }

    async fn subscribe(&self, markets: &[MarketId]) -> SourceResult<mpsc::Receiver<MarketTick>> {
        let (tx, rx) = mpsc::channel(256);
        let markets = markets.to_vec();
        let config = self.config.clone();
        let history = Arc::clone(&self.history);

        tokio::spawn(async move {
            let lo = Decimal::new(1, 1); // 0.10
            let hi = Decimal::new(9, 1); // 0.90
            let mut mids: HashMap<MarketId, (Decimal, bool)> = markets
                .iter()
                .map(|m| (m.clone(), (config.start_mid, true)))
                .collect();
            let mut interval =
                tokio::time::interval(Duration::from_millis(config.tick_interval_ms));

            loop {
                interval.tick().await;
                for market in &markets {
                    let Some((mid, rising)) = mids.get_mut(market) else {
                        continue;
                    };
                    *mid += if *rising { config.step } else { -config.step };
                    if *mid >= hi {
                        *rising = false;
                    } else if *mid <= lo {
                        *rising = true;
                    }

                    let tick = MarketTick::new(
                        market.clone(),
                        Price::new(*mid - config.half_spread),
                        Price::new(*mid + config.half_spread),
                        Qty::new(Decimal::from(100)),
                        TickSource::Push,
                    );
                    Self::record(&history, tick.clone());
                    if tx.send(tick).await.is_err() {
                        debug!("paper feed subscriber gone, stopping tick task");
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn poll_since(
        &self,
        market: &MarketId,
        since: DateTime<Utc>,
    ) -> SourceResult<Vec<MarketTick>> {
        Ok(self
            .history
            .lock()
            .iter()
            .filter(|t| &t.market == market && t.timestamp > since)
            .map(|t| {
                let mut polled = t.clone();
                polled.source = TickSource::Poll;
                polled
            })
            .collect())
    }
}

struct PaperOrder {
    price: Price,
    qty: Qty,
    filled: bool,
    cancelled: bool,
}

/// Instant-fill paper gateway: every order fills in full at its own limit
/// price the moment it is placed.
#[derive(Default)]
pub struct PaperGateway {
    next_id: AtomicU64,
    orders: Mutex<HashMap<OrderId, PaperOrder>>,
}

impl PaperGateway {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderGateway for PaperGateway {
    async fn place_order(&self, request: &OrderRequest) -> GatewayResult<OrderId> {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let id = OrderId::new(format!("paper-{n}"));
        self.orders.lock().insert(
            id.clone(),
            PaperOrder {
                price: request.price,
                qty: request.qty,
                filled: true,
                cancelled: false,
            },
        );
        debug!(order = %id, market = %request.market, kind = %request.kind, price = %request.price, "paper order filled");
        Ok(id)
    }

    async fn amend_order(&self, order_id: &OrderId, _new_price: Price) -> GatewayResult<()> {
        let orders = self.orders.lock();
        let order = orders
            .get(order_id)
            .ok_or_else(|| GatewayError::Rejected(format!("unknown order {order_id}")))?;
        if order.filled {
            return Err(GatewayError::AlreadyFilled);
        }
        Ok(())
    }

    async fn cancel_order(&self, order_id: &OrderId) -> GatewayResult<()> {
        let mut orders = self.orders.lock();
        let order = orders
            .get_mut(order_id)
            .ok_or_else(|| GatewayError::Rejected(format!("unknown order {order_id}")))?;
        if order.filled {
            return Err(GatewayError::AlreadyFilled);
        }
        order.cancelled = true;
        Ok(())
    }

    async fn fills(&self, order_id: &OrderId) -> GatewayResult<Vec<Fill>> {
        let orders = self.orders.lock();
        let order = orders
            .get(order_id)
            .ok_or_else(|| GatewayError::Rejected(format!("unknown order {order_id}")))?;
        if order.filled && !order.cancelled {
            Ok(vec![Fill::new(order.qty, order.price)])
        } else {
            Ok(Vec::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmx_core::Side;
    use rust_decimal_macros::dec;

    #[tokio::test(start_paused = true)]
    async fn test_paper_feed_emits_and_replays() {
        let feed = PaperFeed::new(SimSection::default());
        let market = MarketId::from("SIM-1");
        let started = Utc::now();

        let mut rx = feed.subscribe(&[market.clone()]).await.unwrap();
        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.market, market);
        assert!(second.timestamp >= first.timestamp);
        assert!(second.is_valid_book());

        // History replays as poll ticks.
        let replayed = feed.poll_since(&market, started).await.unwrap();
        assert!(replayed.len() >= 2);
        assert!(replayed.iter().all(|t| t.source == TickSource::Poll));
    }

    #[tokio::test]
    async fn test_paper_gateway_fills_at_limit() {
        let gateway = PaperGateway::new();
        let request = OrderRequest::exit_limit(
            MarketId::from("SIM-1"),
            Side::Yes,
            Price::new(dec!(0.42)),
            Qty::new(dec!(25)),
        );
        let id = gateway.place_order(&request).await.unwrap();

        let fills = gateway.fills(&id).await.unwrap();
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].qty, Qty::new(dec!(25)));
        assert_eq!(fills[0].price, Price::new(dec!(0.42)));

        // Instant fill means cancels and amends always lose the race.
        assert!(matches!(
            gateway.cancel_order(&id).await,
            Err(GatewayError::AlreadyFilled)
        ));
        assert!(matches!(
            gateway.amend_order(&id, Price::new(dec!(0.40))).await,
            Err(GatewayError::AlreadyFilled)
        ));
    }
}
