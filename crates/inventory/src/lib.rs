//! Inventory domain module: catalog entities, the stock movement ledger entry,
//! and the pure rules that derive balances and availability from it.
//!
//! No IO lives here; stores in `depot-infra` persist movements and call into
//! these rules inside their atomic units.

pub mod balance;
pub mod catalog;
pub mod movement;

pub use balance::{Availability, StockRequirement, check_requirements, fold_balance};
pub use catalog::{Catalog, Product, Warehouse};
pub use movement::{
    DocumentKind, DocumentReference, MovementId, MovementKind, NewMovement, StockKey,
    StockMovement,
};
