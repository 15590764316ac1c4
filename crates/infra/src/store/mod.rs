//! Durable storage boundary for transfers and the stock ledger.
//!
//! The contract lives in `trait.rs`; `in_memory` backs tests and dev runs,
//! `postgres` backs persistent deployments.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryDepotStore;
pub use postgres::PostgresDepotStore;
pub use r#trait::{DepotStore, MovementFilter, StoreError, TransferCommit, TransferFilter};
