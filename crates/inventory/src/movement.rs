//! Stock movement: one immutable ledger entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use depot_core::{DomainError, DomainResult, LotId, ProductId, Quantity, WarehouseId};

/// Ledger entry identifier, assigned by the store at append time.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MovementId(Uuid);

depot_core::impl_uuid_newtype!(MovementId, "MovementId");

/// Closed set of movement kinds; the sign of each kind is fixed here and nowhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementKind {
    Inbound,
    Outbound,
    AdjustmentPositive,
    AdjustmentNegative,
}

impl MovementKind {
    pub const ALL: [MovementKind; 4] = [
        MovementKind::Inbound,
        MovementKind::Outbound,
        MovementKind::AdjustmentPositive,
        MovementKind::AdjustmentNegative,
    ];

    /// Whether this kind adds stock to its key.
    pub fn increases_stock(self) -> bool {
        match self {
            MovementKind::Inbound | MovementKind::AdjustmentPositive => true,
            MovementKind::Outbound | MovementKind::AdjustmentNegative => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MovementKind::Inbound => "inbound",
            MovementKind::Outbound => "outbound",
            MovementKind::AdjustmentPositive => "adjustment_positive",
            MovementKind::AdjustmentNegative => "adjustment_negative",
        }
    }
}

impl core::fmt::Display for MovementKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for MovementKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MovementKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown movement kind '{s}'")))
    }
}

/// The (product, warehouse, lot) key a balance is tracked under.
///
/// Lots are strict: `lot_id: None` is the unlotted pool and never aggregates
/// stock recorded against a specific lot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StockKey {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub lot_id: Option<LotId>,
}

impl StockKey {
    pub fn new(product_id: ProductId, warehouse_id: WarehouseId, lot_id: Option<LotId>) -> Self {
        Self {
            product_id,
            warehouse_id,
            lot_id,
        }
    }
}

impl core::fmt::Display for StockKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}@{}", self.product_id, self.warehouse_id)?;
        if let Some(lot) = self.lot_id {
            write!(f, "#{lot}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Transfer,
    Adjustment,
}

impl DocumentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentKind::Transfer => "transfer",
            DocumentKind::Adjustment => "adjustment",
        }
    }
}

impl core::str::FromStr for DocumentKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transfer" => Ok(DocumentKind::Transfer),
            "adjustment" => Ok(DocumentKind::Adjustment),
            other => Err(DomainError::validation(format!("unknown document kind '{other}'"))),
        }
    }
}

/// The business document that caused a movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentReference {
    pub kind: DocumentKind,
    pub id: Uuid,
}

impl DocumentReference {
    pub fn transfer(id: impl Into<Uuid>) -> Self {
        Self {
            kind: DocumentKind::Transfer,
            id: id.into(),
        }
    }

    pub fn adjustment(id: impl Into<Uuid>) -> Self {
        Self {
            kind: DocumentKind::Adjustment,
            id: id.into(),
        }
    }
}

/// A movement that has not been appended yet (no id, no recording time).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMovement {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub lot_id: Option<LotId>,
    pub kind: MovementKind,
    pub quantity: Quantity,
    pub document: DocumentReference,
    pub notes: String,
}

impl NewMovement {
    pub fn new(
        key: StockKey,
        kind: MovementKind,
        quantity: Quantity,
        document: DocumentReference,
        notes: impl Into<String>,
    ) -> Self {
        Self {
            product_id: key.product_id,
            warehouse_id: key.warehouse_id,
            lot_id: key.lot_id,
            kind,
            quantity,
            document,
            notes: notes.into(),
        }
    }

    pub fn key(&self) -> StockKey {
        StockKey::new(self.product_id, self.warehouse_id, self.lot_id)
    }

    /// Reject anything the ledger must never record.
    pub fn validate(&self) -> DomainResult<()> {
        if !self.quantity.is_positive() {
            return Err(DomainError::validation(format!(
                "movement quantity must be positive (got {})",
                self.quantity
            )));
        }
        if self.document.id.is_nil() {
            return Err(DomainError::validation("movement document reference is missing"));
        }
        Ok(())
    }

    /// Stamp the movement with its store-assigned identity and recording time.
    pub fn record(self, id: MovementId, recorded_at: DateTime<Utc>) -> StockMovement {
        StockMovement {
            id,
            product_id: self.product_id,
            warehouse_id: self.warehouse_id,
            lot_id: self.lot_id,
            kind: self.kind,
            quantity: self.quantity,
            document: self.document,
            recorded_at,
            notes: self.notes,
        }
    }
}

/// Immutable ledger entry. Never updated or deleted once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: MovementId,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub lot_id: Option<LotId>,
    pub kind: MovementKind,
    pub quantity: Quantity,
    pub document: DocumentReference,
    pub recorded_at: DateTime<Utc>,
    pub notes: String,
}

impl StockMovement {
    pub fn key(&self) -> StockKey {
        StockKey::new(self.product_id, self.warehouse_id, self.lot_id)
    }

    /// Quantity with the kind's sign applied.
    pub fn signed_quantity(&self) -> Quantity {
        if self.kind.increases_stock() {
            self.quantity
        } else {
            -self.quantity
        }
    }
}
