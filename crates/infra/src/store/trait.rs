use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use depot_core::{ExpectedVersion, StockShortfall, WarehouseId};
use depot_inventory::{DocumentReference, NewMovement, StockKey, StockMovement, StockRequirement};
use depot_transfers::{PeriodKey, Transfer, TransferId, TransferState};

/// Store operation error.
///
/// These are **infrastructure errors** (storage, concurrency) as opposed to
/// domain errors (validation, invariants). The stock check is the exception:
/// it has to run inside the store's critical section, so a failed check is
/// reported from here.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("insufficient stock for {} line(s)", .0.len())]
    InsufficientStock(Vec<StockShortfall>),

    #[error("numbering conflict: {0}")]
    NumberingConflict(String),

    #[error("invalid movement: {0}")]
    InvalidMovement(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("backend failure: {0}")]
    Backend(String),
}

/// Everything one transfer transition writes, committed as a single unit.
///
/// `transfer` is the state *after* the emitted events were applied.
/// `requirements` are re-evaluated against the ledger inside the commit;
/// when any of them fails nothing is written.
#[derive(Debug, Clone)]
pub struct TransferCommit {
    pub transfer: Transfer,
    pub expected_version: ExpectedVersion,
    pub movements: Vec<NewMovement>,
    pub requirements: Vec<StockRequirement>,
}

/// Transfer listing filter. Every field is optional; `None` matches all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferFilter {
    pub state: Option<TransferState>,
    pub origin_warehouse_id: Option<WarehouseId>,
    pub destination_warehouse_id: Option<WarehouseId>,
    /// Inclusive lower bound on `created_at`.
    pub created_from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `created_at`.
    pub created_to: Option<DateTime<Utc>>,
    /// Case-insensitive match on number, notes or any line's notes.
    pub search_text: Option<String>,
}

impl TransferFilter {
    pub fn matches(&self, transfer: &Transfer) -> bool {
        if self.state.is_some_and(|s| s != transfer.state()) {
            return false;
        }
        if self
            .origin_warehouse_id
            .is_some_and(|w| Some(w) != transfer.origin_warehouse_id())
        {
            return false;
        }
        if self
            .destination_warehouse_id
            .is_some_and(|w| Some(w) != transfer.destination_warehouse_id())
        {
            return false;
        }

        let created_at = transfer.created_at();
        if let Some(from) = self.created_from {
            if created_at.is_none_or(|c| c < from) {
                return false;
            }
        }
        if let Some(to) = self.created_to {
            if created_at.is_none_or(|c| c > to) {
                return false;
            }
        }

        match self.search_text.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(needle) => {
                let needle = needle.to_lowercase();
                let hit = |haystack: &str| haystack.to_lowercase().contains(&needle);
                transfer.number().is_some_and(|n| hit(&n.to_string()))
                    || hit(transfer.notes())
                    || transfer.lines().iter().any(|l| hit(&l.notes))
            }
        }
    }
}

/// Ledger read filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MovementFilter {
    pub key: Option<StockKey>,
    pub document: Option<DocumentReference>,
    /// Inclusive upper bound on `recorded_at`.
    pub as_of: Option<DateTime<Utc>>,
}

impl MovementFilter {
    pub fn for_key(key: StockKey) -> Self {
        Self {
            key: Some(key),
            ..Self::default()
        }
    }

    pub fn for_document(document: DocumentReference) -> Self {
        Self {
            document: Some(document),
            ..Self::default()
        }
    }

    pub fn matches(&self, movement: &StockMovement) -> bool {
        self.key.is_none_or(|k| k == movement.key())
            && self.document.is_none_or(|d| d == movement.document)
            && self.as_of.is_none_or(|t| movement.recorded_at <= t)
    }
}

/// Durable storage for transfers and the stock ledger.
///
/// ## Commit semantics
///
/// `commit_transfer()` and `append_movements()`:
/// - evaluate every stock requirement against the ledger **inside** the
///   critical section (lock or transaction), so the check and the append are
///   one atomic unit
/// - write the transfer snapshot (if any) and all movements, or nothing
/// - assign movement ids and `recorded_at`
///
/// Movements are never updated or deleted.
///
/// ## Concurrency
///
/// Transfers are guarded by `ExpectedVersion`; a stale version is reported as
/// `StoreError::Concurrency`. Stock keys touched by a commit are serialized
/// so concurrent outbound movements cannot both pass the same balance.
#[async_trait::async_trait]
pub trait DepotStore: Send + Sync {
    /// Next per-period transfer sequence (1-based, gap-tolerant, never reused).
    async fn next_sequence(&self, period: &PeriodKey) -> Result<u32, StoreError>;

    async fn load_transfer(&self, id: TransferId) -> Result<Option<Transfer>, StoreError>;

    /// Matching transfers, newest first.
    async fn list_transfers(&self, filter: &TransferFilter) -> Result<Vec<Transfer>, StoreError>;

    async fn commit_transfer(&self, commit: TransferCommit) -> Result<Vec<StockMovement>, StoreError>;

    /// Append movements not linked to a transfer (adjustments).
    async fn append_movements(
        &self,
        movements: Vec<NewMovement>,
        requirements: Vec<StockRequirement>,
    ) -> Result<Vec<StockMovement>, StoreError>;

    /// Signed sum of movements for `key` recorded at or before `as_of` (default: now).
    async fn balance(&self, key: &StockKey, as_of: Option<DateTime<Utc>>) -> Result<depot_core::Quantity, StoreError>;

    /// Movements matching `filter`, ordered by `recorded_at`.
    async fn movements(&self, filter: &MovementFilter) -> Result<Vec<StockMovement>, StoreError>;
}

#[async_trait::async_trait]
impl<S> DepotStore for Arc<S>
where
    S: DepotStore + ?Sized,
{
    async fn next_sequence(&self, period: &PeriodKey) -> Result<u32, StoreError> {
        (**self).next_sequence(period).await
    }

    async fn load_transfer(&self, id: TransferId) -> Result<Option<Transfer>, StoreError> {
        (**self).load_transfer(id).await
    }

    async fn list_transfers(&self, filter: &TransferFilter) -> Result<Vec<Transfer>, StoreError> {
        (**self).list_transfers(filter).await
    }

    async fn commit_transfer(&self, commit: TransferCommit) -> Result<Vec<StockMovement>, StoreError> {
        (**self).commit_transfer(commit).await
    }

    async fn append_movements(
        &self,
        movements: Vec<NewMovement>,
        requirements: Vec<StockRequirement>,
    ) -> Result<Vec<StockMovement>, StoreError> {
        (**self).append_movements(movements, requirements).await
    }

    async fn balance(&self, key: &StockKey, as_of: Option<DateTime<Utc>>) -> Result<depot_core::Quantity, StoreError> {
        (**self).balance(key, as_of).await
    }

    async fn movements(&self, filter: &MovementFilter) -> Result<Vec<StockMovement>, StoreError> {
        (**self).movements(filter).await
    }
}

/// Validate a batch before it reaches storage.
pub(crate) fn validate_movements(movements: &[NewMovement]) -> Result<(), StoreError> {
    for (idx, m) in movements.iter().enumerate() {
        m.validate()
            .map_err(|e| StoreError::InvalidMovement(format!("movement {idx}: {e}")))?;
    }
    Ok(())
}
