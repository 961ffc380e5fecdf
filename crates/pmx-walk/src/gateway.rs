//! Per-order serialization over an order gateway.
//!
//! Amend, cancel and fill queries racing on the same broker order id can
//! interleave at the broker in surprising ways; this wrapper forces all
//! mutations for one order id through one lock. Orders never contend with
//! each other.

use async_trait::async_trait;
use dashmap::DashMap;
use pmx_core::{Fill, GatewayResult, OrderGateway, OrderId, OrderRequest, Price};
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct SerializedGateway {
    inner: Arc<dyn OrderGateway>,
    locks: DashMap<OrderId, Arc<Mutex<()>>>,
}

impl SerializedGateway {
    pub fn new(inner: Arc<dyn OrderGateway>) -> Self {
        Self {
            inner,
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, order_id: &OrderId) -> Arc<Mutex<()>> {
        self.locks
            .entry(order_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[async_trait]
impl OrderGateway for SerializedGateway {
    async fn place_order(&self, request: &OrderRequest) -> GatewayResult<OrderId> {
        self.inner.place_order(request).await
    }

    async fn amend_order(&self, order_id: &OrderId, new_price: Price) -> GatewayResult<()> {
        let lock = self.lock_for(order_id);
        let _guard = lock.lock().await;
        self.inner.amend_order(order_id, new_price).await
    }

    async fn cancel_order(&self, order_id: &OrderId) -> GatewayResult<()> {
        let lock = self.lock_for(order_id);
        let _guard = lock.lock().await;
        let result = self.inner.cancel_order(order_id).await;
        drop(_guard);
        // A cancelled (or already-filled) order takes no further mutations.
        self.locks.remove(order_id);
        result
    }

    async fn fills(&self, order_id: &OrderId) -> GatewayResult<Vec<Fill>> {
        self.inner.fills(order_id).await
    }
}
