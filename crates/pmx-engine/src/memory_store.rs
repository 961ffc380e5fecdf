//! In-memory position store with optimistic versioning.
//!
//! The reference store for tests and paper trading. `update` is a strict
//! compare-and-swap on the version counter; a lost race is reported, never
//! silently merged.

use async_trait::async_trait;
use dashmap::DashMap;
use pmx_core::{
    Position, PositionId, PositionStatus, PositionStore, Price, StoreError, StoreResult,
};
use tracing::debug;

#[derive(Default)]
pub struct MemoryPositionStore {
    positions: DashMap<PositionId, Position>,
}

impl MemoryPositionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

#[async_trait]
impl PositionStore for MemoryPositionStore {
    async fn open_positions(&self) -> StoreResult<Vec<Position>> {
        Ok(self
            .positions
            .iter()
            .filter(|entry| entry.status != PositionStatus::Closed)
            .map(|entry| entry.clone())
            .collect())
    }

    async fn get(&self, id: &PositionId) -> StoreResult<Position> {
        self.positions
            .get(id)
            .map(|entry| entry.clone())
            .ok_or(StoreError::NotFound(*id))
    }

    async fn insert(&self, position: Position) -> StoreResult<()> {
        self.positions.insert(position.id, position);
        Ok(())
    }

    async fn update(&self, position: &Position, expected_version: u64) -> StoreResult<u64> {
        let mut entry = self
            .positions
            .get_mut(&position.id)
            .ok_or(StoreError::NotFound(position.id))?;
        if entry.version != expected_version {
            return Err(StoreError::VersionMismatch {
                id: position.id,
                expected: expected_version,
                actual: entry.version,
            });
        }
        let mut next = position.clone();
        next.version = expected_version + 1;
        *entry = next;
        Ok(expected_version + 1)
    }

    async fn close(&self, id: &PositionId, exit_price: Price, reason: &str) -> StoreResult<()> {
        let mut entry = self.positions.get_mut(id).ok_or(StoreError::NotFound(*id))?;
        entry.status = PositionStatus::Closed;
        entry.mark_price = exit_price;
        entry.version += 1;
        debug!(position = %id, price = %exit_price, reason, "position closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmx_core::{ConfigVersion, MarketId, Price, Qty, Side, TrailingStopState};
    use rust_decimal_macros::dec;

    fn position() -> Position {
        Position::new(
            MarketId::from("M"),
            Side::Yes,
            Qty::new(dec!(100)),
            Price::new(dec!(0.50)),
            ConfigVersion::new(1),
            TrailingStopState::disabled(),
        )
    }

    #[tokio::test]
    async fn test_cas_rejects_stale_writer() {
        let store = MemoryPositionStore::new();
        let mut p = position();
        store.insert(p.clone()).await.unwrap();

        // First writer wins and bumps the version.
        let v1 = store.update(&p, 0).await.unwrap();
        assert_eq!(v1, 1);

        // Second writer still holds version 0.
        let err = store.update(&p, 0).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::VersionMismatch {
                expected: 0,
                actual: 1,
                ..
            }
        ));

        // Re-read and retry succeeds.
        p = store.get(&p.id).await.unwrap();
        assert_eq!(store.update(&p, 1).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_closed_positions_leave_the_open_set() {
        let store = MemoryPositionStore::new();
        let p = position();
        store.insert(p.clone()).await.unwrap();
        assert_eq!(store.open_positions().await.unwrap().len(), 1);

        store
            .close(&p.id, Price::new(dec!(0.60)), "profit_target")
            .await
            .unwrap();
        assert!(store.open_positions().await.unwrap().is_empty());
        // Still resolvable by id for attribution.
        let closed = store.get(&p.id).await.unwrap();
        assert_eq!(closed.status, PositionStatus::Closed);
    }
}
