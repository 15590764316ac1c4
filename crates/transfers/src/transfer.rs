use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use depot_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, LotId, ProductId, Quantity, UserId,
    WarehouseId,
};
use depot_events::Event;
use depot_inventory::{DocumentReference, MovementKind, NewMovement, StockKey, StockRequirement};

use crate::number::TransferNumber;
use crate::state::TransferState;

/// Transfer identifier (aggregate id).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferId(pub AggregateId);

impl TransferId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    pub fn generate() -> Self {
        Self(AggregateId::new())
    }
}

impl core::fmt::Display for TransferId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl core::str::FromStr for TransferId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl From<TransferId> for Uuid {
    fn from(value: TransferId) -> Self {
        value.0.into()
    }
}

/// Transfer line identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferLineId(Uuid);

depot_core::impl_uuid_newtype!(TransferLineId, "TransferLineId");

/// One product entry within a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferLine {
    pub id: TransferLineId,
    pub transfer_id: TransferId,
    pub line_no: u32,
    pub product_id: ProductId,
    pub lot_id: Option<LotId>,
    pub quantity_requested: Quantity,
    /// Set when the transfer enters `InTransit`.
    pub quantity_shipped: Option<Quantity>,
    /// Cumulative; set on the first receipt.
    pub quantity_received: Option<Quantity>,
    pub notes: String,
}

impl TransferLine {
    /// Units shipped but not (yet) received.
    pub fn outstanding(&self) -> Quantity {
        let shipped = self.quantity_shipped.unwrap_or(Quantity::ZERO);
        let received = self.quantity_received.unwrap_or(Quantity::ZERO);
        shipped.saturating_sub(received)
    }
}

/// Requested line, as submitted by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTransferLine {
    pub id: TransferLineId,
    pub product_id: ProductId,
    pub lot_id: Option<LotId>,
    pub quantity: Quantity,
    #[serde(default)]
    pub notes: String,
}

impl NewTransferLine {
    pub fn new(product_id: ProductId, lot_id: Option<LotId>, quantity: Quantity) -> Self {
        Self {
            id: TransferLineId::new(),
            product_id,
            lot_id,
            quantity,
            notes: String::new(),
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }
}

/// What happens to stock already on its way when a transfer is cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelDisposition {
    /// Outstanding units are booked back into the origin warehouse.
    ReturnToOrigin,
    /// Outstanding units are considered lost; no movement is recorded.
    WriteOff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineQuantity {
    pub line_id: TransferLineId,
    pub quantity: Quantity,
}

/// Caller-supplied adjustments for a transition.
///
/// Only the fields relevant to the requested transition are read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOverrides {
    /// Per-line shipped quantity for `Approved → InTransit` (defaults to requested).
    #[serde(default)]
    pub shipped: BTreeMap<TransferLineId, Quantity>,
    /// Per-line received quantity for the first receipt (defaults to shipped).
    #[serde(default)]
    pub received: BTreeMap<TransferLineId, Quantity>,
    /// Required when cancelling after stock left the origin.
    #[serde(default)]
    pub disposition: Option<CancelDisposition>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Aggregate root: Transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    id: TransferId,
    number: Option<TransferNumber>,
    origin_warehouse_id: Option<WarehouseId>,
    destination_warehouse_id: Option<WarehouseId>,
    state: TransferState,
    created_by: Option<UserId>,
    requested_by: Option<UserId>,
    approved_by: Option<UserId>,
    received_by: Option<UserId>,
    cancelled_by: Option<UserId>,
    created_at: Option<DateTime<Utc>>,
    requested_at: Option<DateTime<Utc>>,
    approved_at: Option<DateTime<Utc>>,
    shipped_at: Option<DateTime<Utc>>,
    received_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    disposition: Option<CancelDisposition>,
    notes: String,
    lines: Vec<TransferLine>,
    version: u64,
    created: bool,
}

impl Transfer {
    /// Create an empty, not-yet-created aggregate instance.
    pub fn empty(id: TransferId) -> Self {
        Self {
            id,
            number: None,
            origin_warehouse_id: None,
            destination_warehouse_id: None,
            state: TransferState::Draft,
            created_by: None,
            requested_by: None,
            approved_by: None,
            received_by: None,
            cancelled_by: None,
            created_at: None,
            requested_at: None,
            approved_at: None,
            shipped_at: None,
            received_at: None,
            cancelled_at: None,
            disposition: None,
            notes: String::new(),
            lines: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> TransferId {
        self.id
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    pub fn number(&self) -> Option<&TransferNumber> {
        self.number.as_ref()
    }

    pub fn origin_warehouse_id(&self) -> Option<WarehouseId> {
        self.origin_warehouse_id
    }

    pub fn destination_warehouse_id(&self) -> Option<WarehouseId> {
        self.destination_warehouse_id
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn created_by(&self) -> Option<UserId> {
        self.created_by
    }

    pub fn requested_by(&self) -> Option<UserId> {
        self.requested_by
    }

    pub fn approved_by(&self) -> Option<UserId> {
        self.approved_by
    }

    pub fn received_by(&self) -> Option<UserId> {
        self.received_by
    }

    pub fn cancelled_by(&self) -> Option<UserId> {
        self.cancelled_by
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn requested_at(&self) -> Option<DateTime<Utc>> {
        self.requested_at
    }

    pub fn approved_at(&self) -> Option<DateTime<Utc>> {
        self.approved_at
    }

    pub fn shipped_at(&self) -> Option<DateTime<Utc>> {
        self.shipped_at
    }

    pub fn received_at(&self) -> Option<DateTime<Utc>> {
        self.received_at
    }

    pub fn cancelled_at(&self) -> Option<DateTime<Utc>> {
        self.cancelled_at
    }

    pub fn disposition(&self) -> Option<CancelDisposition> {
        self.disposition
    }

    pub fn notes(&self) -> &str {
        &self.notes
    }

    pub fn lines(&self) -> &[TransferLine] {
        &self.lines
    }

    pub fn line(&self, id: TransferLineId) -> Option<&TransferLine> {
        self.lines.iter().find(|l| l.id == id)
    }

    /// Ledger entries a (not yet applied) event produces against this state.
    ///
    /// Shipping books stock out of the origin, receiving books it into the
    /// destination, and a return-to-origin cancellation books the outstanding
    /// units back into the origin. Every other event has no stock effect.
    pub fn movements_for(&self, event: &TransferEvent) -> Vec<NewMovement> {
        let (Some(origin), Some(destination)) = (self.origin_warehouse_id, self.destination_warehouse_id) else {
            return Vec::new();
        };

        let (warehouse, kind, quantities, what) = match event {
            TransferEvent::TransferShipped(e) => (origin, MovementKind::Outbound, &e.lines, "shipped"),
            TransferEvent::GoodsReceived(e) => (destination, MovementKind::Inbound, &e.lines, "received"),
            TransferEvent::TransferCancelled(e) => (origin, MovementKind::Inbound, &e.returned, "returned to origin"),
            _ => return Vec::new(),
        };

        let document = DocumentReference::transfer(self.id);
        let number = self.number.as_ref().map(ToString::to_string).unwrap_or_default();

        quantities
            .iter()
            .filter(|lq| lq.quantity.is_positive())
            .filter_map(|lq| {
                let line = self.line(lq.line_id)?;
                Some(NewMovement::new(
                    StockKey::new(line.product_id, warehouse, line.lot_id),
                    kind,
                    lq.quantity,
                    document,
                    format!("{number} line {} {what}", line.line_no),
                ))
            })
            .collect()
    }

    /// Stock that must be on hand at the origin for `event` to commit.
    pub fn stock_requirements_for(&self, event: &TransferEvent) -> Vec<StockRequirement> {
        self.movements_for(event)
            .into_iter()
            .filter(|m| !m.kind.increases_stock())
            .map(|m| StockRequirement::new(m.key(), m.quantity))
            .collect()
    }
}

impl AggregateRoot for Transfer {
    type Id = TransferId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateTransfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTransfer {
    pub transfer_id: TransferId,
    pub number: TransferNumber,
    pub origin_warehouse_id: WarehouseId,
    pub destination_warehouse_id: WarehouseId,
    pub lines: Vec<NewTransferLine>,
    pub notes: String,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReviseDraft (replace lines and notes, only allowed in Draft).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviseDraft {
    pub transfer_id: TransferId,
    pub lines: Vec<NewTransferLine>,
    pub notes: Option<String>,
    pub revised_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: move the transfer to `target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionCommand {
    pub transfer_id: TransferId,
    pub target: TransferState,
    pub actor: UserId,
    pub overrides: TransitionOverrides,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferCommand {
    CreateTransfer(CreateTransfer),
    ReviseDraft(ReviseDraft),
    Transition(TransitionCommand),
}

/// Event: TransferCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferCreated {
    pub transfer_id: TransferId,
    pub number: TransferNumber,
    pub origin_warehouse_id: WarehouseId,
    pub destination_warehouse_id: WarehouseId,
    pub lines: Vec<TransferLine>,
    pub notes: String,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DraftRevised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftRevised {
    pub transfer_id: TransferId,
    pub lines: Vec<TransferLine>,
    pub notes: String,
    pub revised_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SubmittedForApproval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedForApproval {
    pub transfer_id: TransferId,
    pub requested_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReturnedToDraft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnedToDraft {
    pub transfer_id: TransferId,
    pub returned_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TransferApproved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferApproved {
    pub transfer_id: TransferId,
    pub approved_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TransferShipped. Carries the shipped quantity of every line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferShipped {
    pub transfer_id: TransferId,
    pub shipped_by: UserId,
    pub lines: Vec<LineQuantity>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: GoodsReceived.
///
/// `lines` holds the quantity received by *this* receipt; line totals are
/// cumulative on the aggregate. `complete` decides `Received` vs
/// `PartiallyReceived`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoodsReceived {
    pub transfer_id: TransferId,
    pub received_by: UserId,
    pub lines: Vec<LineQuantity>,
    pub complete: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TransferCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferCancelled {
    pub transfer_id: TransferId,
    pub cancelled_by: UserId,
    pub disposition: Option<CancelDisposition>,
    /// Units booked back into the origin (return-to-origin only).
    pub returned: Vec<LineQuantity>,
    /// Units recorded as lost (write-off only).
    pub written_off: Vec<LineQuantity>,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferEvent {
    TransferCreated(TransferCreated),
    DraftRevised(DraftRevised),
    SubmittedForApproval(SubmittedForApproval),
    ReturnedToDraft(ReturnedToDraft),
    TransferApproved(TransferApproved),
    TransferShipped(TransferShipped),
    GoodsReceived(GoodsReceived),
    TransferCancelled(TransferCancelled),
}

impl Event for TransferEvent {
    const AGGREGATE_TYPE: &'static str = "transfer";

    fn event_type(&self) -> &'static str {
        match self {
            TransferEvent::TransferCreated(_) => "transfer.created",
            TransferEvent::DraftRevised(_) => "transfer.draft_revised",
            TransferEvent::SubmittedForApproval(_) => "transfer.submitted",
            TransferEvent::ReturnedToDraft(_) => "transfer.returned_to_draft",
            TransferEvent::TransferApproved(_) => "transfer.approved",
            TransferEvent::TransferShipped(_) => "transfer.shipped",
            TransferEvent::GoodsReceived(_) => "transfer.goods_received",
            TransferEvent::TransferCancelled(_) => "transfer.cancelled",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            TransferEvent::TransferCreated(e) => e.occurred_at,
            TransferEvent::DraftRevised(e) => e.occurred_at,
            TransferEvent::SubmittedForApproval(e) => e.occurred_at,
            TransferEvent::ReturnedToDraft(e) => e.occurred_at,
            TransferEvent::TransferApproved(e) => e.occurred_at,
            TransferEvent::TransferShipped(e) => e.occurred_at,
            TransferEvent::GoodsReceived(e) => e.occurred_at,
            TransferEvent::TransferCancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Transfer {
    type Command = TransferCommand;
    type Event = TransferEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            TransferEvent::TransferCreated(e) => {
                self.id = e.transfer_id;
                self.number = Some(e.number.clone());
                self.origin_warehouse_id = Some(e.origin_warehouse_id);
                self.destination_warehouse_id = Some(e.destination_warehouse_id);
                self.state = TransferState::Draft;
                self.created_by = Some(e.created_by);
                self.created_at = Some(e.occurred_at);
                self.notes = e.notes.clone();
                self.lines = e.lines.clone();
                self.created = true;
            }
            TransferEvent::DraftRevised(e) => {
                self.lines = e.lines.clone();
                self.notes = e.notes.clone();
            }
            TransferEvent::SubmittedForApproval(e) => {
                self.state = TransferState::PendingApproval;
                self.requested_by.get_or_insert(e.requested_by);
                self.requested_at.get_or_insert(e.occurred_at);
            }
            TransferEvent::ReturnedToDraft(_) => {
                self.state = TransferState::Draft;
            }
            TransferEvent::TransferApproved(e) => {
                self.state = TransferState::Approved;
                self.approved_by.get_or_insert(e.approved_by);
                self.approved_at.get_or_insert(e.occurred_at);
            }
            TransferEvent::TransferShipped(e) => {
                for lq in &e.lines {
                    if let Some(line) = self.lines.iter_mut().find(|l| l.id == lq.line_id) {
                        line.quantity_shipped = Some(lq.quantity);
                    }
                }
                self.state = TransferState::InTransit;
                self.shipped_at.get_or_insert(e.occurred_at);
            }
            TransferEvent::GoodsReceived(e) => {
                for lq in &e.lines {
                    if let Some(line) = self.lines.iter_mut().find(|l| l.id == lq.line_id) {
                        let so_far = line.quantity_received.unwrap_or(Quantity::ZERO);
                        line.quantity_received = Some(so_far + lq.quantity);
                    }
                }
                self.state = if e.complete {
                    TransferState::Received
                } else {
                    TransferState::PartiallyReceived
                };
                self.received_by.get_or_insert(e.received_by);
                self.received_at.get_or_insert(e.occurred_at);
            }
            TransferEvent::TransferCancelled(e) => {
                self.state = TransferState::Cancelled;
                self.disposition = e.disposition;
                self.cancelled_by.get_or_insert(e.cancelled_by);
                self.cancelled_at.get_or_insert(e.occurred_at);
                let mut remarks: Vec<String> = e.reason.iter().cloned().collect();
                for lq in &e.written_off {
                    if let Some(line) = self.line(lq.line_id) {
                        remarks.push(format!("line {} written off: {}", line.line_no, lq.quantity));
                    }
                }
                for remark in remarks {
                    if !self.notes.is_empty() {
                        self.notes.push('\n');
                    }
                    self.notes.push_str(&remark);
                }
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            TransferCommand::CreateTransfer(cmd) => self.handle_create(cmd),
            TransferCommand::ReviseDraft(cmd) => self.handle_revise(cmd),
            TransferCommand::Transition(cmd) => self.handle_transition(cmd),
        }
    }
}

impl Transfer {
    fn ensure_exists(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("transfer {}", self.id)));
        }
        Ok(())
    }

    fn ensure_transfer_id(&self, transfer_id: TransferId) -> Result<(), DomainError> {
        if self.id != transfer_id {
            return Err(DomainError::invariant("transfer_id mismatch"));
        }
        Ok(())
    }

    fn build_lines(&self, lines: &[NewTransferLine]) -> Result<Vec<TransferLine>, DomainError> {
        if lines.is_empty() {
            return Err(DomainError::validation("a transfer needs at least one line"));
        }

        let mut built = Vec::with_capacity(lines.len());
        for (idx, line) in lines.iter().enumerate() {
            if !line.quantity.is_positive() {
                return Err(DomainError::validation(format!(
                    "line {}: quantity must be positive (got {})",
                    idx + 1,
                    line.quantity
                )));
            }
            if built.iter().any(|l: &TransferLine| l.id == line.id) {
                return Err(DomainError::validation(format!("line {}: duplicate line id", idx + 1)));
            }
            built.push(TransferLine {
                id: line.id,
                transfer_id: self.id,
                line_no: (idx as u32) + 1,
                product_id: line.product_id,
                lot_id: line.lot_id,
                quantity_requested: line.quantity,
                quantity_shipped: None,
                quantity_received: None,
                notes: line.notes.clone(),
            });
        }
        Ok(built)
    }

    fn ensure_known_lines<'a>(
        &self,
        ids: impl IntoIterator<Item = &'a TransferLineId>,
    ) -> Result<(), DomainError> {
        for id in ids {
            if self.line(*id).is_none() {
                return Err(DomainError::validation(format!("unknown transfer line {id}")));
            }
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateTransfer) -> Result<Vec<TransferEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("transfer already exists"));
        }
        self.ensure_transfer_id(cmd.transfer_id)?;

        if cmd.origin_warehouse_id == cmd.destination_warehouse_id {
            return Err(DomainError::validation(
                "origin and destination warehouse must differ",
            ));
        }

        let lines = self.build_lines(&cmd.lines)?;

        Ok(vec![TransferEvent::TransferCreated(TransferCreated {
            transfer_id: cmd.transfer_id,
            number: cmd.number.clone(),
            origin_warehouse_id: cmd.origin_warehouse_id,
            destination_warehouse_id: cmd.destination_warehouse_id,
            lines,
            notes: cmd.notes.clone(),
            created_by: cmd.created_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_revise(&self, cmd: &ReviseDraft) -> Result<Vec<TransferEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_transfer_id(cmd.transfer_id)?;

        if self.state != TransferState::Draft {
            return Err(DomainError::invariant(format!(
                "lines can only be revised in draft (state is {})",
                self.state
            )));
        }

        let lines = self.build_lines(&cmd.lines)?;

        Ok(vec![TransferEvent::DraftRevised(DraftRevised {
            transfer_id: cmd.transfer_id,
            lines,
            notes: cmd.notes.clone().unwrap_or_else(|| self.notes.clone()),
            revised_by: cmd.revised_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_transition(&self, cmd: &TransitionCommand) -> Result<Vec<TransferEvent>, DomainError> {
        use TransferState::*;

        self.ensure_exists()?;
        self.ensure_transfer_id(cmd.transfer_id)?;

        let (from, to) = (self.state, cmd.target);
        if !from.can_transition_to(to) {
            return Err(DomainError::illegal_transition(from, to));
        }

        let event = match (from, to) {
            (Draft, PendingApproval) => TransferEvent::SubmittedForApproval(SubmittedForApproval {
                transfer_id: self.id,
                requested_by: cmd.actor,
                occurred_at: cmd.occurred_at,
            }),
            (PendingApproval, Draft) => TransferEvent::ReturnedToDraft(ReturnedToDraft {
                transfer_id: self.id,
                returned_by: cmd.actor,
                occurred_at: cmd.occurred_at,
            }),
            (PendingApproval, Approved) => TransferEvent::TransferApproved(TransferApproved {
                transfer_id: self.id,
                approved_by: cmd.actor,
                occurred_at: cmd.occurred_at,
            }),
            (Approved, InTransit) => self.decide_ship(cmd)?,
            (InTransit, Received | PartiallyReceived) => self.decide_receipt(cmd)?,
            (PartiallyReceived, Received) => self.decide_completion(cmd),
            (_, Cancelled) => self.decide_cancel(cmd)?,
            _ => return Err(DomainError::illegal_transition(from, to)),
        };

        Ok(vec![event])
    }

    fn decide_ship(&self, cmd: &TransitionCommand) -> Result<TransferEvent, DomainError> {
        self.ensure_known_lines(cmd.overrides.shipped.keys())?;

        let mut lines = Vec::with_capacity(self.lines.len());
        for line in &self.lines {
            let quantity = cmd
                .overrides
                .shipped
                .get(&line.id)
                .copied()
                .unwrap_or(line.quantity_requested);

            if !quantity.is_positive() {
                return Err(DomainError::validation(format!(
                    "line {}: shipped quantity must be positive",
                    line.line_no
                )));
            }
            if quantity > line.quantity_requested {
                return Err(DomainError::validation(format!(
                    "line {}: cannot ship {} (requested {})",
                    line.line_no, quantity, line.quantity_requested
                )));
            }
            lines.push(LineQuantity {
                line_id: line.id,
                quantity,
            });
        }

        Ok(TransferEvent::TransferShipped(TransferShipped {
            transfer_id: self.id,
            shipped_by: cmd.actor,
            lines,
            occurred_at: cmd.occurred_at,
        }))
    }

    fn decide_receipt(&self, cmd: &TransitionCommand) -> Result<TransferEvent, DomainError> {
        self.ensure_known_lines(cmd.overrides.received.keys())?;

        let mut lines = Vec::with_capacity(self.lines.len());
        let mut complete = true;
        for line in &self.lines {
            let shipped = line.quantity_shipped.unwrap_or(Quantity::ZERO);
            let quantity = cmd.overrides.received.get(&line.id).copied().unwrap_or(shipped);

            if quantity.is_negative() {
                return Err(DomainError::validation(format!(
                    "line {}: received quantity cannot be negative",
                    line.line_no
                )));
            }
            if quantity > shipped {
                return Err(DomainError::validation(format!(
                    "line {}: cannot receive {} (shipped {})",
                    line.line_no, quantity, shipped
                )));
            }
            complete &= quantity == shipped;
            lines.push(LineQuantity {
                line_id: line.id,
                quantity,
            });
        }

        Ok(TransferEvent::GoodsReceived(GoodsReceived {
            transfer_id: self.id,
            received_by: cmd.actor,
            lines,
            complete,
            occurred_at: cmd.occurred_at,
        }))
    }

    fn decide_completion(&self, cmd: &TransitionCommand) -> TransferEvent {
        let lines = self
            .lines
            .iter()
            .map(|line| LineQuantity {
                line_id: line.id,
                quantity: line.outstanding(),
            })
            .collect();

        TransferEvent::GoodsReceived(GoodsReceived {
            transfer_id: self.id,
            received_by: cmd.actor,
            lines,
            complete: true,
            occurred_at: cmd.occurred_at,
        })
    }

    fn decide_cancel(&self, cmd: &TransitionCommand) -> Result<TransferEvent, DomainError> {
        let disposition = cmd.overrides.disposition;
        let outstanding = || -> Vec<LineQuantity> {
            self.lines
                .iter()
                .map(|line| LineQuantity {
                    line_id: line.id,
                    quantity: line.outstanding(),
                })
                .filter(|lq| lq.quantity.is_positive())
                .collect()
        };

        let (returned, written_off) = if self.state.has_shipped() {
            match disposition {
                Some(CancelDisposition::ReturnToOrigin) => (outstanding(), Vec::new()),
                Some(CancelDisposition::WriteOff) => (Vec::new(), outstanding()),
                None => {
                    return Err(DomainError::validation(format!(
                        "cancelling a transfer in state {} requires a disposition (return_to_origin or write_off)",
                        self.state
                    )));
                }
            }
        } else {
            if disposition.is_some() {
                return Err(DomainError::validation(
                    "a disposition only applies once stock has left the origin",
                ));
            }
            (Vec::new(), Vec::new())
        };

        Ok(TransferEvent::TransferCancelled(TransferCancelled {
            transfer_id: self.id,
            cancelled_by: cmd.actor,
            disposition,
            returned,
            written_off,
            reason: cmd.overrides.notes.clone(),
            occurred_at: cmd.occurred_at,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    struct Fixture {
        transfer: Transfer,
        actor: UserId,
        product: ProductId,
        origin: WarehouseId,
        destination: WarehouseId,
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn test_number() -> TransferNumber {
        TransferNumber::new("202610".parse().unwrap(), 1).unwrap()
    }

    fn draft_with(quantity: i64) -> Fixture {
        let transfer_id = TransferId::generate();
        let mut transfer = Transfer::empty(transfer_id);
        let actor = UserId::new();
        let product = ProductId::new();
        let origin = WarehouseId::new();
        let destination = WarehouseId::new();

        let events = transfer
            .handle(&TransferCommand::CreateTransfer(CreateTransfer {
                transfer_id,
                number: test_number(),
                origin_warehouse_id: origin,
                destination_warehouse_id: destination,
                lines: vec![NewTransferLine::new(product, None, Quantity::from(quantity))],
                notes: String::new(),
                created_by: actor,
                occurred_at: test_time(),
            }))
            .unwrap();
        for e in &events {
            transfer.apply(e);
        }

        Fixture {
            transfer,
            actor,
            product,
            origin,
            destination,
        }
    }

    fn transition(
        transfer: &Transfer,
        target: TransferState,
        overrides: TransitionOverrides,
    ) -> Result<Vec<TransferEvent>, DomainError> {
        transfer.handle(&TransferCommand::Transition(TransitionCommand {
            transfer_id: transfer.id_typed(),
            target,
            actor: UserId::new(),
            overrides,
            occurred_at: test_time(),
        }))
    }

    fn advance(transfer: &mut Transfer, target: TransferState, overrides: TransitionOverrides) {
        let events = transition(transfer, target, overrides).unwrap();
        for e in &events {
            transfer.apply(e);
        }
    }

    fn drive_to(state: TransferState) -> Transfer {
        use TransferState::*;
        let mut t = draft_with(10).transfer;
        let path: &[TransferState] = match state {
            Draft => &[],
            PendingApproval => &[PendingApproval],
            Approved => &[PendingApproval, Approved],
            InTransit => &[PendingApproval, Approved, InTransit],
            PartiallyReceived => &[PendingApproval, Approved, InTransit],
            Received => &[PendingApproval, Approved, InTransit, Received],
            Cancelled => &[Cancelled],
        };
        for target in path {
            advance(&mut t, *target, TransitionOverrides::default());
        }
        if state == PartiallyReceived {
            let line_id = t.lines()[0].id;
            let overrides = TransitionOverrides {
                received: BTreeMap::from([(line_id, Quantity::from(4))]),
                ..Default::default()
            };
            advance(&mut t, PartiallyReceived, overrides);
        }
        assert_eq!(t.state(), state);
        t
    }

    #[test]
    fn create_transfer_emits_created_event() {
        let f = draft_with(10);
        assert!(f.transfer.exists());
        assert_eq!(f.transfer.state(), TransferState::Draft);
        assert_eq!(f.transfer.origin_warehouse_id(), Some(f.origin));
        assert_eq!(f.transfer.lines().len(), 1);
        assert_eq!(f.transfer.lines()[0].line_no, 1);
        assert_eq!(f.transfer.lines()[0].product_id, f.product);
        assert_eq!(f.transfer.created_by(), Some(f.actor));
        assert_eq!(f.transfer.version(), 1);
    }

    #[test]
    fn same_warehouse_transfer_is_rejected() {
        let id = TransferId::generate();
        let warehouse = WarehouseId::new();
        let err = Transfer::empty(id)
            .handle(&TransferCommand::CreateTransfer(CreateTransfer {
                transfer_id: id,
                number: test_number(),
                origin_warehouse_id: warehouse,
                destination_warehouse_id: warehouse,
                lines: vec![NewTransferLine::new(ProductId::new(), None, Quantity::from(1))],
                notes: String::new(),
                created_by: UserId::new(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(msg) if msg.contains("must differ")));
    }

    #[test]
    fn empty_lines_and_non_positive_quantities_are_rejected() {
        let id = TransferId::generate();
        let base = CreateTransfer {
            transfer_id: id,
            number: test_number(),
            origin_warehouse_id: WarehouseId::new(),
            destination_warehouse_id: WarehouseId::new(),
            lines: vec![],
            notes: String::new(),
            created_by: UserId::new(),
            occurred_at: test_time(),
        };
        let empty = Transfer::empty(id);
        assert!(matches!(
            empty.handle(&TransferCommand::CreateTransfer(base.clone())),
            Err(DomainError::Validation(_))
        ));

        let zero = CreateTransfer {
            lines: vec![NewTransferLine::new(ProductId::new(), None, Quantity::ZERO)],
            ..base
        };
        assert!(matches!(
            empty.handle(&TransferCommand::CreateTransfer(zero)),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn submit_sets_requested_fields_once() {
        let mut t = draft_with(5).transfer;
        advance(&mut t, TransferState::PendingApproval, TransitionOverrides::default());
        let first_at = t.requested_at().unwrap();
        let first_by = t.requested_by().unwrap();

        advance(&mut t, TransferState::Draft, TransitionOverrides::default());
        advance(&mut t, TransferState::PendingApproval, TransitionOverrides::default());

        assert_eq!(t.requested_at(), Some(first_at));
        assert_eq!(t.requested_by(), Some(first_by));
    }

    #[test]
    fn revise_only_allowed_in_draft() {
        let mut t = draft_with(5).transfer;
        let revise = |t: &Transfer| {
            t.handle(&TransferCommand::ReviseDraft(ReviseDraft {
                transfer_id: t.id_typed(),
                lines: vec![NewTransferLine::new(ProductId::new(), None, Quantity::from(2))],
                notes: Some("revised".into()),
                revised_by: UserId::new(),
                occurred_at: test_time(),
            }))
        };

        let events = revise(&t).unwrap();
        t.apply(&events[0]);
        assert_eq!(t.lines()[0].quantity_requested, Quantity::from(2));
        assert_eq!(t.notes(), "revised");

        advance(&mut t, TransferState::PendingApproval, TransitionOverrides::default());
        assert!(matches!(revise(&t), Err(DomainError::InvariantViolation(_))));
    }

    #[test]
    fn ship_defaults_to_requested_and_emits_outbound_at_origin() {
        let f = draft_with(10);
        let mut t = f.transfer;
        advance(&mut t, TransferState::PendingApproval, TransitionOverrides::default());
        advance(&mut t, TransferState::Approved, TransitionOverrides::default());

        let events = transition(&t, TransferState::InTransit, TransitionOverrides::default()).unwrap();
        let movements = t.movements_for(&events[0]);
        assert_eq!(movements.len(), 1);
        assert_eq!(movements[0].kind, MovementKind::Outbound);
        assert_eq!(movements[0].warehouse_id, f.origin);
        assert_eq!(movements[0].quantity, Quantity::from(10));

        let reqs = t.stock_requirements_for(&events[0]);
        assert_eq!(reqs, vec![StockRequirement::new(
            StockKey::new(f.product, f.origin, None),
            Quantity::from(10)
        )]);

        t.apply(&events[0]);
        assert_eq!(t.state(), TransferState::InTransit);
        assert_eq!(t.lines()[0].quantity_shipped, Some(Quantity::from(10)));
        assert!(t.shipped_at().is_some());
    }

    #[test]
    fn ship_override_cannot_exceed_requested() {
        let t = drive_to(TransferState::Approved);
        let line_id = t.lines()[0].id;
        let overrides = TransitionOverrides {
            shipped: BTreeMap::from([(line_id, Quantity::from(11))]),
            ..Default::default()
        };
        let err = transition(&t, TransferState::InTransit, overrides).unwrap_err();
        assert!(matches!(err, DomainError::Validation(msg) if msg.contains("cannot ship")));
    }

    #[test]
    fn ship_override_for_unknown_line_is_rejected() {
        let t = drive_to(TransferState::Approved);
        let overrides = TransitionOverrides {
            shipped: BTreeMap::from([(TransferLineId::new(), Quantity::from(1))]),
            ..Default::default()
        };
        assert!(transition(&t, TransferState::InTransit, overrides).is_err());
    }

    #[test]
    fn partial_receipt_then_completion() {
        let mut t = drive_to(TransferState::PartiallyReceived);
        assert_eq!(t.lines()[0].quantity_received, Some(Quantity::from(4)));
        assert!(t.received_at().is_some());
        let first_received_at = t.received_at();

        let events = transition(&t, TransferState::Received, TransitionOverrides::default()).unwrap();
        let movements = t.movements_for(&events[0]);
        assert_eq!(movements.len(), 1);
        assert_eq!(movements[0].kind, MovementKind::Inbound);
        assert_eq!(movements[0].quantity, Quantity::from(6));

        t.apply(&events[0]);
        assert_eq!(t.state(), TransferState::Received);
        assert_eq!(t.lines()[0].quantity_received, Some(Quantity::from(10)));
        assert_eq!(t.received_at(), first_received_at);
    }

    #[test]
    fn requesting_partial_with_full_quantities_lands_in_received() {
        let mut t = drive_to(TransferState::InTransit);
        advance(&mut t, TransferState::PartiallyReceived, TransitionOverrides::default());
        assert_eq!(t.state(), TransferState::Received);
    }

    #[test]
    fn receiving_more_than_shipped_is_rejected() {
        let t = drive_to(TransferState::InTransit);
        let line_id = t.lines()[0].id;
        let overrides = TransitionOverrides {
            received: BTreeMap::from([(line_id, Quantity::from(12))]),
            ..Default::default()
        };
        assert!(transition(&t, TransferState::Received, overrides).is_err());
    }

    #[test]
    fn cancelling_in_transit_requires_disposition() {
        let t = drive_to(TransferState::InTransit);
        let err = transition(&t, TransferState::Cancelled, TransitionOverrides::default()).unwrap_err();
        assert!(matches!(err, DomainError::Validation(msg) if msg.contains("disposition")));
    }

    #[test]
    fn return_to_origin_books_outstanding_back() {
        let t = drive_to(TransferState::PartiallyReceived);
        let overrides = TransitionOverrides {
            disposition: Some(CancelDisposition::ReturnToOrigin),
            notes: Some("truck turned back".into()),
            ..Default::default()
        };
        let events = transition(&t, TransferState::Cancelled, overrides).unwrap();
        let movements = t.movements_for(&events[0]);
        assert_eq!(movements.len(), 1);
        assert_eq!(movements[0].kind, MovementKind::Inbound);
        assert_eq!(Some(movements[0].warehouse_id), t.origin_warehouse_id());
        assert_eq!(movements[0].quantity, Quantity::from(6));
    }

    #[test]
    fn write_off_records_no_movement() {
        let mut t = drive_to(TransferState::InTransit);
        let overrides = TransitionOverrides {
            disposition: Some(CancelDisposition::WriteOff),
            ..Default::default()
        };
        let events = transition(&t, TransferState::Cancelled, overrides).unwrap();
        assert!(t.movements_for(&events[0]).is_empty());
        t.apply(&events[0]);
        assert_eq!(t.state(), TransferState::Cancelled);
        assert_eq!(t.disposition(), Some(CancelDisposition::WriteOff));
        assert!(t.notes().contains("line 1 written off: 10"));
    }

    #[test]
    fn cancel_before_shipping_has_no_stock_effect() {
        let t = drive_to(TransferState::Approved);
        let events = transition(&t, TransferState::Cancelled, TransitionOverrides::default()).unwrap();
        assert!(t.movements_for(&events[0]).is_empty());
    }

    #[test]
    fn only_the_transition_table_is_reachable() {
        for from in TransferState::ALL {
            let t = drive_to(from);
            for to in TransferState::ALL {
                if from.can_transition_to(to) {
                    continue;
                }
                let err = transition(&t, to, TransitionOverrides::default()).unwrap_err();
                assert_eq!(err, DomainError::illegal_transition(from, to));
            }
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Property: whatever quantities are shipped and received, inbound never
        /// exceeds outbound for the transfer and line invariants hold.
        #[test]
        fn inbound_never_exceeds_outbound(
            requested in 1i64..1_000,
            ship_pct in 1i64..=100,
            receive_pct in 0i64..=100,
            complete in any::<bool>(),
        ) {
            let mut t = draft_with(requested).transfer;
            advance(&mut t, TransferState::PendingApproval, TransitionOverrides::default());
            advance(&mut t, TransferState::Approved, TransitionOverrides::default());

            let line_id = t.lines()[0].id;
            let shipped = (requested * ship_pct / 100).max(1);
            let received = shipped * receive_pct / 100;

            let mut outbound = Quantity::ZERO;
            let mut inbound = Quantity::ZERO;
            let mut tally = |t: &Transfer, events: &[TransferEvent]| {
                for e in events {
                    for m in t.movements_for(e) {
                        if m.kind.increases_stock() { inbound += m.quantity } else { outbound += m.quantity }
                    }
                }
            };

            let ship = TransitionOverrides {
                shipped: BTreeMap::from([(line_id, Quantity::from(shipped))]),
                ..Default::default()
            };
            let events = transition(&t, TransferState::InTransit, ship).unwrap();
            tally(&t, &events);
            for e in &events { t.apply(e); }

            let receive = TransitionOverrides {
                received: BTreeMap::from([(line_id, Quantity::from(received))]),
                ..Default::default()
            };
            let events = transition(&t, TransferState::Received, receive).unwrap();
            tally(&t, &events);
            for e in &events { t.apply(e); }

            if complete && t.state() == TransferState::PartiallyReceived {
                let events = transition(&t, TransferState::Received, TransitionOverrides::default()).unwrap();
                tally(&t, &events);
                for e in &events { t.apply(e); }
            }

            let line = &t.lines()[0];
            prop_assert!(inbound <= outbound);
            prop_assert!(line.quantity_shipped.unwrap() <= line.quantity_requested);
            prop_assert!(line.quantity_received.unwrap() <= line.quantity_shipped.unwrap());
        }
    }
}
