//! Stock ledger: append-only movement log and point-in-time balances.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::instrument;

use depot_core::Quantity;
use depot_inventory::{NewMovement, StockKey, StockMovement, StockRequirement};

use crate::error::ServiceError;
use crate::store::{DepotStore, MovementFilter};

#[derive(Clone)]
pub struct StockLedger {
    store: Arc<dyn DepotStore>,
}

impl StockLedger {
    pub fn new(store: Arc<dyn DepotStore>) -> Self {
        Self { store }
    }

    /// Append one movement. Stock-decreasing kinds are guarded by the
    /// available balance at the same key, checked inside the store's commit.
    #[instrument(skip(self, movement), fields(key = %movement.key(), kind = %movement.kind), err)]
    pub async fn append(&self, movement: NewMovement) -> Result<StockMovement, ServiceError> {
        movement.validate()?;

        let requirements = if movement.kind.increases_stock() {
            vec![]
        } else {
            vec![StockRequirement::new(movement.key(), movement.quantity)]
        };

        let mut recorded = self.store.append_movements(vec![movement], requirements).await?;
        recorded
            .pop()
            .ok_or_else(|| ServiceError::Store(crate::store::StoreError::Backend("append returned no movement".into())))
    }

    /// Balance at `key` counting movements recorded at or before `as_of` (default: now).
    pub async fn balance_as_of(&self, key: &StockKey, as_of: Option<DateTime<Utc>>) -> Result<Quantity, ServiceError> {
        Ok(self.store.balance(key, as_of).await?)
    }

    /// Movements matching `filter`, ordered by recording time.
    pub async fn movements(&self, filter: &MovementFilter) -> Result<Vec<StockMovement>, ServiceError> {
        Ok(self.store.movements(filter).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryDepotStore;
    use depot_core::{ProductId, WarehouseId};
    use depot_inventory::{DocumentReference, MovementKind};
    use uuid::Uuid;

    fn ledger() -> StockLedger {
        StockLedger::new(Arc::new(InMemoryDepotStore::new()))
    }

    fn movement(key: StockKey, kind: MovementKind, qty: i64) -> NewMovement {
        NewMovement::new(key, kind, Quantity::from(qty), DocumentReference::adjustment(Uuid::now_v7()), "")
    }

    #[tokio::test]
    async fn negative_adjustment_cannot_overdraw() {
        let ledger = ledger();
        let key = StockKey::new(ProductId::new(), WarehouseId::new(), None);

        ledger.append(movement(key, MovementKind::AdjustmentPositive, 2)).await.unwrap();
        let err = ledger
            .append(movement(key, MovementKind::AdjustmentNegative, 3))
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::InsufficientStock(ref s) if s[0].available == Quantity::from(2)));
        assert_eq!(ledger.balance_as_of(&key, None).await.unwrap(), Quantity::from(2));
    }

    #[tokio::test]
    async fn history_is_append_only() {
        let ledger = ledger();
        let key = StockKey::new(ProductId::new(), WarehouseId::new(), None);

        let first = ledger.append(movement(key, MovementKind::Inbound, 5)).await.unwrap();
        ledger.append(movement(key, MovementKind::Outbound, 1)).await.unwrap();
        ledger.append(movement(key, MovementKind::Inbound, 2)).await.unwrap();

        let log = ledger.movements(&MovementFilter::for_key(key)).await.unwrap();
        assert_eq!(log.len(), 3);
        assert_eq!(log[0], first);
        assert_eq!(ledger.balance_as_of(&key, None).await.unwrap(), Quantity::from(6));
    }

    #[tokio::test]
    async fn zero_quantity_is_invalid_input() {
        let ledger = ledger();
        let key = StockKey::new(ProductId::new(), WarehouseId::new(), None);
        let err = ledger.append(movement(key, MovementKind::Inbound, 0)).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
    }
}
