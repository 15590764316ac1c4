use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use depot_core::{AggregateRoot, LotId, ProductId, Quantity, UserId, WarehouseId};
use depot_infra::{AdjustmentDirection, NewTransfer, StockAdjustment, TransferFilter};
use depot_inventory::StockKey;
use depot_transfers::{
    CancelDisposition, LineQuantity, NewTransferLine, Transfer, TransferId, TransferLine, TransferLineId,
    TransferState, TransitionOverrides,
};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct TransferLineRequest {
    pub product_id: ProductId,
    #[serde(default)]
    pub lot_id: Option<LotId>,
    pub quantity: Quantity,
    #[serde(default)]
    pub notes: Option<String>,
}

impl From<TransferLineRequest> for NewTransferLine {
    fn from(value: TransferLineRequest) -> Self {
        let line = NewTransferLine::new(value.product_id, value.lot_id, value.quantity);
        match value.notes {
            Some(notes) => line.with_notes(notes),
            None => line,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateTransferRequest {
    pub origin_warehouse_id: WarehouseId,
    pub destination_warehouse_id: WarehouseId,
    pub lines: Vec<TransferLineRequest>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl From<CreateTransferRequest> for NewTransfer {
    fn from(value: CreateTransferRequest) -> Self {
        NewTransfer {
            origin_warehouse_id: value.origin_warehouse_id,
            destination_warehouse_id: value.destination_warehouse_id,
            lines: value.lines.into_iter().map(Into::into).collect(),
            notes: value.notes,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ReviseLinesRequest {
    pub lines: Vec<TransferLineRequest>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Body of `POST /transfers/:id/transitions`.
///
/// `shipped`/`received` list per-line quantities; lines left out take the
/// default for the transition.
#[derive(Debug, Deserialize)]
pub struct TransitionRequest {
    pub target: TransferState,
    #[serde(default)]
    pub shipped: Vec<LineQuantity>,
    #[serde(default)]
    pub received: Vec<LineQuantity>,
    #[serde(default)]
    pub disposition: Option<CancelDisposition>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl TransitionRequest {
    /// Split into target and overrides. A line listed twice in `shipped` or
    /// `received` is an error.
    pub fn into_parts(self) -> Result<(TransferState, TransitionOverrides), String> {
        let overrides = TransitionOverrides {
            shipped: per_line(self.shipped, "shipped")?,
            received: per_line(self.received, "received")?,
            disposition: self.disposition,
            notes: self.notes,
        };
        Ok((self.target, overrides))
    }
}

fn per_line(lines: Vec<LineQuantity>, field: &str) -> Result<BTreeMap<TransferLineId, Quantity>, String> {
    let mut out = BTreeMap::new();
    for l in lines {
        if out.insert(l.line_id, l.quantity).is_some() {
            return Err(format!("{field} lists line {} more than once", l.line_id));
        }
    }
    Ok(out)
}

#[derive(Debug, Default, Deserialize)]
pub struct ListTransfersQuery {
    pub state: Option<TransferState>,
    pub origin_warehouse_id: Option<WarehouseId>,
    pub destination_warehouse_id: Option<WarehouseId>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    /// Free-text search over number and notes.
    pub q: Option<String>,
}

impl From<ListTransfersQuery> for TransferFilter {
    fn from(value: ListTransfersQuery) -> Self {
        TransferFilter {
            state: value.state,
            origin_warehouse_id: value.origin_warehouse_id,
            destination_warehouse_id: value.destination_warehouse_id,
            created_from: value.created_from,
            created_to: value.created_to,
            search_text: value.q.filter(|q| !q.trim().is_empty()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BalanceQuery {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub lot_id: Option<LotId>,
    pub as_of: Option<DateTime<Utc>>,
}

impl BalanceQuery {
    pub fn key(&self) -> StockKey {
        StockKey::new(self.product_id, self.warehouse_id, self.lot_id)
    }
}

#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub lot_id: Option<LotId>,
    pub quantity: Quantity,
}

#[derive(Debug, Deserialize)]
pub struct AdjustmentRequest {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    #[serde(default)]
    pub lot_id: Option<LotId>,
    pub direction: AdjustmentDirection,
    pub quantity: Quantity,
    #[serde(default)]
    pub notes: String,
}

impl From<AdjustmentRequest> for StockAdjustment {
    fn from(value: AdjustmentRequest) -> Self {
        StockAdjustment {
            product_id: value.product_id,
            warehouse_id: value.warehouse_id,
            lot_id: value.lot_id,
            direction: value.direction,
            quantity: value.quantity,
            notes: value.notes,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateWarehouseRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateProductRequest {
    pub name: String,
    pub sku: String,
    pub unit: String,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct TransferResponse {
    pub id: TransferId,
    pub number: Option<String>,
    pub state: TransferState,
    pub origin_warehouse_id: Option<WarehouseId>,
    pub destination_warehouse_id: Option<WarehouseId>,
    pub created_by: Option<UserId>,
    pub requested_by: Option<UserId>,
    pub approved_by: Option<UserId>,
    pub received_by: Option<UserId>,
    pub cancelled_by: Option<UserId>,
    pub created_at: Option<DateTime<Utc>>,
    pub requested_at: Option<DateTime<Utc>>,
    pub approved_at: Option<DateTime<Utc>>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub received_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub disposition: Option<CancelDisposition>,
    pub notes: String,
    pub lines: Vec<TransferLine>,
    pub version: u64,
}

impl From<&Transfer> for TransferResponse {
    fn from(t: &Transfer) -> Self {
        Self {
            id: t.id_typed(),
            number: t.number().map(ToString::to_string),
            state: t.state(),
            origin_warehouse_id: t.origin_warehouse_id(),
            destination_warehouse_id: t.destination_warehouse_id(),
            created_by: t.created_by(),
            requested_by: t.requested_by(),
            approved_by: t.approved_by(),
            received_by: t.received_by(),
            cancelled_by: t.cancelled_by(),
            created_at: t.created_at(),
            requested_at: t.requested_at(),
            approved_at: t.approved_at(),
            shipped_at: t.shipped_at(),
            received_at: t.received_at(),
            cancelled_at: t.cancelled_at(),
            disposition: t.disposition(),
            notes: t.notes().to_string(),
            lines: t.lines().to_vec(),
            version: t.version(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub lot_id: Option<LotId>,
    pub as_of: Option<DateTime<Utc>>,
    pub quantity: Quantity,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_request_collects_line_overrides() {
        let line_id = TransferLineId::new();
        let body = serde_json::json!({
            "target": "in_transit",
            "shipped": [{ "line_id": line_id, "quantity": "4" }],
        });

        let req: TransitionRequest = serde_json::from_value(body).unwrap();
        let (target, overrides) = req.into_parts().unwrap();

        assert_eq!(target, TransferState::InTransit);
        assert_eq!(overrides.shipped.get(&line_id), Some(&Quantity::from(4)));
        assert!(overrides.received.is_empty());
        assert!(overrides.disposition.is_none());
    }

    #[test]
    fn duplicate_line_overrides_are_rejected() {
        let line_id = TransferLineId::new();
        let body = serde_json::json!({
            "target": "partially_received",
            "received": [
                { "line_id": line_id, "quantity": "4" },
                { "line_id": line_id, "quantity": "6" },
            ],
        });

        let req: TransitionRequest = serde_json::from_value(body).unwrap();
        let err = req.into_parts().unwrap_err();
        assert!(err.contains("received"));
    }

    #[test]
    fn blank_search_text_is_ignored() {
        let filter: TransferFilter = ListTransfersQuery {
            q: Some("   ".into()),
            ..Default::default()
        }
        .into();
        assert!(filter.search_text.is_none());
    }
}
