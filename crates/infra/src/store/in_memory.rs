use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};

use depot_core::{AggregateRoot, Quantity};
use depot_inventory::{
    MovementId, NewMovement, StockKey, StockMovement, StockRequirement, check_requirements,
    fold_balance,
};
use depot_transfers::{PeriodKey, Transfer, TransferId};

use super::r#trait::{
    DepotStore, MovementFilter, StoreError, TransferCommit, TransferFilter, validate_movements,
};

#[derive(Debug, Default)]
struct Inner {
    transfers: HashMap<TransferId, Transfer>,
    movements: Vec<StockMovement>,
    /// Running balance per key; always equals the fold over `movements`.
    balances: HashMap<StockKey, Quantity>,
    counters: HashMap<PeriodKey, u32>,
    last_recorded_at: Option<DateTime<Utc>>,
}

impl Inner {
    fn balance(&self, key: &StockKey) -> Quantity {
        self.balances.get(key).copied().unwrap_or(Quantity::ZERO)
    }

    /// Wall clock, nudged forward so recording times never repeat or go back.
    fn next_recorded_at(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let at = match self.last_recorded_at {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last_recorded_at = Some(at);
        at
    }

    fn check(&self, requirements: &[StockRequirement]) -> Result<(), StoreError> {
        check_requirements(requirements, |key| self.balance(key)).map_err(StoreError::InsufficientStock)
    }

    fn append(&mut self, movements: Vec<NewMovement>) -> Vec<StockMovement> {
        let mut recorded = Vec::with_capacity(movements.len());
        for m in movements {
            let at = self.next_recorded_at();
            let movement = m.record(MovementId::new(), at);
            *self.balances.entry(movement.key()).or_default() += movement.signed_quantity();
            self.movements.push(movement.clone());
            recorded.push(movement);
        }
        recorded
    }
}

/// In-memory depot store.
///
/// Intended for tests/dev. A single write lock covers the version check, the
/// stock check and the append, which makes every commit trivially atomic.
#[derive(Debug, Default)]
pub struct InMemoryDepotStore {
    inner: RwLock<Inner>,
}

impl InMemoryDepotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of ledger rows (used by tests to observe append-only growth).
    pub fn movement_count(&self) -> usize {
        self.inner.read().map(|i| i.movements.len()).unwrap_or(0)
    }

    fn poisoned() -> StoreError {
        StoreError::Backend("lock poisoned".to_string())
    }
}

#[async_trait::async_trait]
impl DepotStore for InMemoryDepotStore {
    async fn next_sequence(&self, period: &PeriodKey) -> Result<u32, StoreError> {
        let mut inner = self.inner.write().map_err(|_| Self::poisoned())?;
        let counter = inner.counters.entry(period.clone()).or_insert(0);
        *counter = counter
            .checked_add(1)
            .ok_or_else(|| StoreError::NumberingConflict(format!("sequence exhausted for {period}")))?;
        Ok(*counter)
    }

    async fn load_transfer(&self, id: TransferId) -> Result<Option<Transfer>, StoreError> {
        let inner = self.inner.read().map_err(|_| Self::poisoned())?;
        Ok(inner.transfers.get(&id).cloned())
    }

    async fn list_transfers(&self, filter: &TransferFilter) -> Result<Vec<Transfer>, StoreError> {
        let inner = self.inner.read().map_err(|_| Self::poisoned())?;
        let mut found: Vec<Transfer> = inner
            .transfers
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        found.sort_by(|a, b| {
            b.created_at()
                .cmp(&a.created_at())
                .then_with(|| b.number().cmp(&a.number()))
        });
        Ok(found)
    }

    async fn commit_transfer(&self, commit: TransferCommit) -> Result<Vec<StockMovement>, StoreError> {
        validate_movements(&commit.movements)?;

        let mut inner = self.inner.write().map_err(|_| Self::poisoned())?;

        let id = commit.transfer.id_typed();
        let current = inner.transfers.get(&id).map(|t| t.version());
        commit
            .expected_version
            .check(current)
            .map_err(|conflict| StoreError::Concurrency(format!("transfer {id}: {conflict}")))?;

        if current.is_none() {
            let number = commit.transfer.number();
            if inner.transfers.values().any(|t| t.number() == number) {
                return Err(StoreError::NumberingConflict(format!(
                    "transfer number {} already taken",
                    number.map(ToString::to_string).unwrap_or_default()
                )));
            }
        }

        inner.check(&commit.requirements)?;

        let recorded = inner.append(commit.movements);
        inner.transfers.insert(id, commit.transfer);
        Ok(recorded)
    }

    async fn append_movements(
        &self,
        movements: Vec<NewMovement>,
        requirements: Vec<StockRequirement>,
    ) -> Result<Vec<StockMovement>, StoreError> {
        validate_movements(&movements)?;

        let mut inner = self.inner.write().map_err(|_| Self::poisoned())?;
        inner.check(&requirements)?;
        Ok(inner.append(movements))
    }

    async fn balance(&self, key: &StockKey, as_of: Option<DateTime<Utc>>) -> Result<Quantity, StoreError> {
        let inner = self.inner.read().map_err(|_| Self::poisoned())?;
        Ok(match as_of {
            None => inner.balance(key),
            Some(_) => fold_balance(&inner.movements, key, as_of),
        })
    }

    async fn movements(&self, filter: &MovementFilter) -> Result<Vec<StockMovement>, StoreError> {
        let inner = self.inner.read().map_err(|_| Self::poisoned())?;
        Ok(inner
            .movements
            .iter()
            .filter(|m| filter.matches(m))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depot_core::{ExpectedVersion, LotId, ProductId, WarehouseId};
    use depot_inventory::{DocumentReference, MovementKind};
    use uuid::Uuid;

    fn key() -> StockKey {
        StockKey::new(ProductId::new(), WarehouseId::new(), None)
    }

    fn adjustment(key: StockKey, kind: MovementKind, qty: i64) -> NewMovement {
        NewMovement::new(
            key,
            kind,
            Quantity::from(qty),
            DocumentReference::adjustment(Uuid::now_v7()),
            "test",
        )
    }

    #[tokio::test]
    async fn append_updates_balance_and_keeps_history() {
        let store = InMemoryDepotStore::new();
        let k = key();

        store
            .append_movements(vec![adjustment(k, MovementKind::AdjustmentPositive, 10)], vec![])
            .await
            .unwrap();
        store
            .append_movements(
                vec![adjustment(k, MovementKind::AdjustmentNegative, 3)],
                vec![StockRequirement::new(k, Quantity::from(3))],
            )
            .await
            .unwrap();

        assert_eq!(store.balance(&k, None).await.unwrap(), Quantity::from(7));
        assert_eq!(store.movement_count(), 2);
    }

    #[tokio::test]
    async fn failed_requirement_writes_nothing() {
        let store = InMemoryDepotStore::new();
        let k = key();

        let err = store
            .append_movements(
                vec![adjustment(k, MovementKind::AdjustmentNegative, 1)],
                vec![StockRequirement::new(k, Quantity::from(1))],
            )
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::InsufficientStock(ref s) if s.len() == 1));
        assert_eq!(store.movement_count(), 0);
    }

    #[tokio::test]
    async fn rejects_non_positive_movements() {
        let store = InMemoryDepotStore::new();
        let err = store
            .append_movements(vec![adjustment(key(), MovementKind::Inbound, 0)], vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidMovement(_)));
    }

    #[tokio::test]
    async fn recorded_at_is_strictly_increasing() {
        let store = InMemoryDepotStore::new();
        let k = key();
        let batch = (0..50)
            .map(|_| adjustment(k, MovementKind::AdjustmentPositive, 1))
            .collect();
        let recorded = store.append_movements(batch, vec![]).await.unwrap();
        assert!(recorded.windows(2).all(|w| w[0].recorded_at < w[1].recorded_at));
    }

    #[tokio::test]
    async fn point_in_time_balance_ignores_later_movements() {
        let store = InMemoryDepotStore::new();
        let k = key();
        let first = store
            .append_movements(vec![adjustment(k, MovementKind::AdjustmentPositive, 5)], vec![])
            .await
            .unwrap();
        store
            .append_movements(vec![adjustment(k, MovementKind::AdjustmentPositive, 5)], vec![])
            .await
            .unwrap();

        let cutoff = first[0].recorded_at;
        assert_eq!(store.balance(&k, Some(cutoff)).await.unwrap(), Quantity::from(5));
        assert_eq!(store.balance(&k, None).await.unwrap(), Quantity::from(10));
    }

    #[tokio::test]
    async fn lots_are_separate_pools() {
        let store = InMemoryDepotStore::new();
        let product = ProductId::new();
        let warehouse = WarehouseId::new();
        let lotted = StockKey::new(product, warehouse, Some(LotId::new()));
        let unlotted = StockKey::new(product, warehouse, None);

        store
            .append_movements(vec![adjustment(lotted, MovementKind::AdjustmentPositive, 4)], vec![])
            .await
            .unwrap();

        assert_eq!(store.balance(&unlotted, None).await.unwrap(), Quantity::ZERO);
        assert_eq!(store.balance(&lotted, None).await.unwrap(), Quantity::from(4));
    }

    #[tokio::test]
    async fn sequences_are_per_period() {
        let store = InMemoryDepotStore::new();
        let october: PeriodKey = "202610".parse().unwrap();
        let november: PeriodKey = "202611".parse().unwrap();

        assert_eq!(store.next_sequence(&october).await.unwrap(), 1);
        assert_eq!(store.next_sequence(&october).await.unwrap(), 2);
        assert_eq!(store.next_sequence(&november).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn stale_transfer_version_is_rejected() {
        let store = InMemoryDepotStore::new();
        let transfer = Transfer::empty(depot_transfers::TransferId::generate());

        let err = store
            .commit_transfer(TransferCommit {
                transfer,
                expected_version: ExpectedVersion::Exact(3),
                movements: vec![],
                requirements: vec![],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Concurrency(_)));
    }
}
