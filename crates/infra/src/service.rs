//! Transfer service: the operations exposed to callers.
//!
//! Execution flow for every mutating operation:
//!
//! ```text
//! Command
//!   ↓
//! 1. Load the transfer snapshot (or start from `Transfer::empty`)
//!   ↓
//! 2. Handle command (pure decision logic, produces events)
//!   ↓
//! 3. Derive ledger movements + stock requirements from the events, apply them
//!   ↓
//! 4. Commit snapshot + movements atomically (version check, stock re-check)
//!   ↓
//! 5. Publish committed events to the bus
//! ```
//!
//! Nothing is published unless the commit succeeded, and a failed commit
//! leaves both the transfer and the ledger untouched.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use depot_core::{
    Aggregate, AggregateRoot, ExpectedVersion, LotId, ProductId, Quantity, UserId, WarehouseId,
};
use depot_events::{EventBus, EventEnvelope, InMemoryEventBus};
use depot_inventory::{
    Availability, Catalog, DocumentReference, MovementKind, NewMovement, StockKey, StockMovement,
    StockRequirement,
};
use depot_transfers::{
    CreateTransfer, NewTransferLine, ReviseDraft, Transfer, TransferCommand, TransferEvent,
    TransferId, TransferState, TransitionCommand, TransitionOverrides,
};

use crate::availability::AvailabilityChecker;
use crate::error::ServiceError;
use crate::ledger::StockLedger;
use crate::numbering::{MAX_NUMBERING_ATTEMPTS, NumberingService};
use crate::store::{DepotStore, MovementFilter, TransferCommit, TransferFilter};

pub type JsonEventBus = InMemoryEventBus<EventEnvelope<JsonValue>>;

/// Input for `create_transfer`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTransfer {
    pub origin_warehouse_id: WarehouseId,
    pub destination_warehouse_id: WarehouseId,
    pub lines: Vec<NewTransferLine>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Dashboard counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryCounts {
    /// PendingApproval + Approved.
    pub pending: u64,
    /// InTransit + PartiallyReceived.
    pub in_transit: u64,
    /// Fully received with `received_at` on the current UTC day.
    pub received_today: u64,
    /// Created in the current `YYYYMM` period.
    pub total_this_period: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentDirection {
    Increase,
    Decrease,
}

/// Non-transfer ledger correction (opening balance, cycle count).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAdjustment {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    #[serde(default)]
    pub lot_id: Option<LotId>,
    pub direction: AdjustmentDirection,
    pub quantity: Quantity,
    #[serde(default)]
    pub notes: String,
}

#[derive(Clone)]
pub struct TransferService {
    store: Arc<dyn DepotStore>,
    catalog: Arc<dyn Catalog>,
    bus: Arc<JsonEventBus>,
    ledger: StockLedger,
    availability: AvailabilityChecker,
    numbering: NumberingService,
}

impl TransferService {
    pub fn new(store: Arc<dyn DepotStore>, catalog: Arc<dyn Catalog>, bus: Arc<JsonEventBus>) -> Self {
        Self {
            ledger: StockLedger::new(store.clone()),
            availability: AvailabilityChecker::new(store.clone()),
            numbering: NumberingService::new(store.clone()),
            store,
            catalog,
            bus,
        }
    }

    pub fn ledger(&self) -> &StockLedger {
        &self.ledger
    }

    pub fn bus(&self) -> &Arc<JsonEventBus> {
        &self.bus
    }

    /// Create a transfer in `Draft`.
    ///
    /// Lines are checked against the origin balance at this point. The check
    /// reserves nothing; shipping re-checks atomically.
    #[instrument(
        skip(self, input),
        fields(
            actor = %actor,
            origin = %input.origin_warehouse_id,
            destination = %input.destination_warehouse_id,
            line_count = input.lines.len()
        ),
        err
    )]
    pub async fn create_transfer(&self, actor: UserId, input: NewTransfer) -> Result<Transfer, ServiceError> {
        self.ensure_warehouse(input.origin_warehouse_id)?;
        self.ensure_warehouse(input.destination_warehouse_id)?;
        self.ensure_products(&input.lines)?;

        self.ensure_lines_available(input.origin_warehouse_id, &input.lines)
            .await?;

        let transfer_id = TransferId::generate();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let now = Utc::now();
            let number = self.numbering.next_number(&NumberingService::period_for(now)).await?;

            let command = TransferCommand::CreateTransfer(CreateTransfer {
                transfer_id,
                number,
                origin_warehouse_id: input.origin_warehouse_id,
                destination_warehouse_id: input.destination_warehouse_id,
                lines: input.lines.clone(),
                notes: input.notes.clone().unwrap_or_default(),
                created_by: actor,
                occurred_at: now,
            });

            match self.execute(Transfer::empty(transfer_id), command).await {
                Err(ServiceError::NumberingConflict(msg)) if attempt < MAX_NUMBERING_ATTEMPTS => {
                    warn!(attempt, %msg, "transfer number already taken, allocating another");
                }
                Ok(transfer) => {
                    info!(
                        transfer_id = %transfer_id,
                        number = %transfer.number().map(ToString::to_string).unwrap_or_default(),
                        "transfer created"
                    );
                    return Ok(transfer);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Replace the lines (and optionally notes) of a `Draft` transfer.
    #[instrument(skip(self, lines, notes), fields(transfer_id = %transfer_id, actor = %actor), err)]
    pub async fn revise_draft(
        &self,
        transfer_id: TransferId,
        actor: UserId,
        lines: Vec<NewTransferLine>,
        notes: Option<String>,
    ) -> Result<Transfer, ServiceError> {
        self.ensure_products(&lines)?;
        let transfer = self.get_transfer(transfer_id).await?;

        // Other states are rejected by the aggregate itself.
        if transfer.state() == TransferState::Draft {
            if let Some(origin) = transfer.origin_warehouse_id() {
                self.ensure_lines_available(origin, &lines).await?;
            }
        }

        let command = TransferCommand::ReviseDraft(ReviseDraft {
            transfer_id,
            lines,
            notes,
            revised_by: actor,
            occurred_at: Utc::now(),
        });
        self.execute(transfer, command).await
    }

    /// Move a transfer to `target`, applying the transition's ledger effects.
    ///
    /// Fails without any effect on `IllegalTransition`, `InsufficientStock`,
    /// `ConcurrentModification` or `InvalidInput`. Never retried internally.
    #[instrument(
        skip(self, overrides),
        fields(transfer_id = %transfer_id, target = %target, actor = %actor),
        err
    )]
    pub async fn transition(
        &self,
        transfer_id: TransferId,
        target: TransferState,
        actor: UserId,
        overrides: TransitionOverrides,
    ) -> Result<Transfer, ServiceError> {
        let transfer = self.get_transfer(transfer_id).await?;
        let from = transfer.state();

        let command = TransferCommand::Transition(TransitionCommand {
            transfer_id,
            target,
            actor,
            overrides,
            occurred_at: Utc::now(),
        });

        match self.execute(transfer, command).await {
            Ok(updated) => {
                info!(from = %from, to = %updated.state(), version = updated.version(), "transfer transitioned");
                Ok(updated)
            }
            Err(e) => {
                warn!(from = %from, error = %e, code = e.code(), "transition rejected");
                Err(e)
            }
        }
    }

    pub async fn get_transfer(&self, transfer_id: TransferId) -> Result<Transfer, ServiceError> {
        self.store
            .load_transfer(transfer_id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("transfer {transfer_id}")))
    }

    /// Matching transfers, newest first.
    pub async fn list_transfers(&self, filter: &TransferFilter) -> Result<Vec<Transfer>, ServiceError> {
        if let (Some(from), Some(to)) = (filter.created_from, filter.created_to) {
            if from > to {
                return Err(ServiceError::invalid_input("date range start is after its end"));
            }
        }
        Ok(self.store.list_transfers(filter).await?)
    }

    pub async fn get_balance(&self, key: StockKey, as_of: Option<DateTime<Utc>>) -> Result<Quantity, ServiceError> {
        self.ledger.balance_as_of(&key, as_of).await
    }

    pub async fn check_available(&self, key: StockKey, requested: Quantity) -> Result<Availability, ServiceError> {
        self.availability.check_available(key, requested).await
    }

    pub async fn list_summary_counts(&self) -> Result<SummaryCounts, ServiceError> {
        self.summary_counts_at(Utc::now()).await
    }

    pub async fn summary_counts_at(&self, now: DateTime<Utc>) -> Result<SummaryCounts, ServiceError> {
        let transfers = self.store.list_transfers(&TransferFilter::default()).await?;
        let today = now.date_naive();
        let period = NumberingService::period_for(now);

        let mut counts = SummaryCounts::default();
        for t in &transfers {
            match t.state() {
                TransferState::PendingApproval | TransferState::Approved => counts.pending += 1,
                TransferState::InTransit | TransferState::PartiallyReceived => counts.in_transit += 1,
                TransferState::Received if t.received_at().is_some_and(|at| at.date_naive() == today) => {
                    counts.received_today += 1
                }
                _ => {}
            }
            if t
                .created_at()
                .is_some_and(|at| NumberingService::period_for(at) == period)
            {
                counts.total_this_period += 1;
            }
        }
        Ok(counts)
    }

    /// Append an adjustment movement. Decreases are guarded by the balance.
    #[instrument(
        skip(self, adjustment),
        fields(
            actor = %actor,
            product_id = %adjustment.product_id,
            warehouse_id = %adjustment.warehouse_id,
            direction = ?adjustment.direction
        ),
        err
    )]
    pub async fn record_adjustment(&self, actor: UserId, adjustment: StockAdjustment) -> Result<StockMovement, ServiceError> {
        self.ensure_warehouse(adjustment.warehouse_id)?;
        self.ensure_product(adjustment.product_id)?;
        if !adjustment.quantity.is_positive() {
            return Err(ServiceError::invalid_input("adjustment quantity must be positive"));
        }

        let kind = match adjustment.direction {
            AdjustmentDirection::Increase => MovementKind::AdjustmentPositive,
            AdjustmentDirection::Decrease => MovementKind::AdjustmentNegative,
        };
        let notes = if adjustment.notes.trim().is_empty() {
            format!("adjustment by {actor}")
        } else {
            format!("{} (by {actor})", adjustment.notes.trim())
        };

        let movement = NewMovement::new(
            StockKey::new(adjustment.product_id, adjustment.warehouse_id, adjustment.lot_id),
            kind,
            adjustment.quantity,
            DocumentReference::adjustment(Uuid::now_v7()),
            notes,
        );
        let recorded = self.ledger.append(movement).await?;
        info!(movement_id = %recorded.id, "stock adjusted");
        Ok(recorded)
    }

    /// Ledger entries caused by a transfer, in recording order.
    pub async fn transfer_movements(&self, transfer_id: TransferId) -> Result<Vec<StockMovement>, ServiceError> {
        self.get_transfer(transfer_id).await?;
        self.ledger
            .movements(&MovementFilter::for_document(DocumentReference::transfer(transfer_id)))
            .await
    }

    async fn execute(&self, mut transfer: Transfer, command: TransferCommand) -> Result<Transfer, ServiceError> {
        let expected_version = if transfer.exists() {
            ExpectedVersion::Exact(transfer.version())
        } else {
            ExpectedVersion::New
        };

        // 1) Decide events (no mutation)
        let events = transfer.handle(&command)?;
        if events.is_empty() {
            return Ok(transfer);
        }

        // 2) Derive ledger effects against the pre-event state, then apply
        let mut movements = Vec::new();
        let mut requirements = Vec::new();
        for event in &events {
            movements.extend(transfer.movements_for(event));
            requirements.extend(transfer.stock_requirements_for(event));
            transfer.apply(event);
        }

        // 3) Commit (atomic: version check, stock re-check, snapshot, movements)
        self.store
            .commit_transfer(TransferCommit {
                transfer: transfer.clone(),
                expected_version,
                movements,
                requirements,
            })
            .await?;

        // 4) Publish committed events (after commit)
        self.publish(&transfer, events);

        Ok(transfer)
    }

    /// Best-effort: the commit already happened, so a failure here is logged
    /// rather than reported as a failed operation.
    fn publish(&self, transfer: &Transfer, events: Vec<TransferEvent>) {
        let base = transfer.version() - events.len() as u64;
        for (idx, event) in events.into_iter().enumerate() {
            let envelope = EventEnvelope::wrap(transfer.id_typed().0, base + idx as u64 + 1, event);
            let published = envelope
                .to_json()
                .map_err(|e| format!("{e}"))
                .and_then(|json| self.bus.publish(json).map_err(|e| format!("{e:?}")));
            if let Err(err) = published {
                warn!(transfer_id = %transfer.id_typed(), %err, "failed to publish transfer event");
            }
        }
    }

    fn ensure_warehouse(&self, id: WarehouseId) -> Result<(), ServiceError> {
        self.catalog
            .warehouse(id)
            .map(|_| ())
            .ok_or_else(|| ServiceError::not_found(format!("warehouse {id}")))
    }

    fn ensure_product(&self, id: ProductId) -> Result<(), ServiceError> {
        self.catalog
            .product(id)
            .map(|_| ())
            .ok_or_else(|| ServiceError::not_found(format!("product {id}")))
    }

    fn ensure_products(&self, lines: &[NewTransferLine]) -> Result<(), ServiceError> {
        lines.iter().try_for_each(|l| self.ensure_product(l.product_id))
    }

    /// Advisory check of requested line quantities against the origin.
    /// Reserves nothing; shipping re-checks inside the store commit.
    async fn ensure_lines_available(
        &self,
        origin: WarehouseId,
        lines: &[NewTransferLine],
    ) -> Result<(), ServiceError> {
        let requirements: Vec<StockRequirement> = lines
            .iter()
            .filter(|l| l.quantity.is_positive())
            .map(|l| StockRequirement::new(StockKey::new(l.product_id, origin, l.lot_id), l.quantity))
            .collect();

        if let Err(shortfalls) = self.availability.check_all(&requirements).await? {
            warn!(shortfalls = shortfalls.len(), "transfer lines exceed origin stock");
            return Err(ServiceError::InsufficientStock(shortfalls));
        }
        Ok(())
    }
}
