//! Infrastructure layer: stores, the stock ledger services and the transfer
//! service that composes them.

pub mod availability;
pub mod catalog;
pub mod error;
pub mod ledger;
pub mod numbering;
pub mod service;
pub mod store;

pub use availability::AvailabilityChecker;
pub use catalog::InMemoryCatalog;
pub use error::ServiceError;
pub use ledger::StockLedger;
pub use numbering::{MAX_NUMBERING_ATTEMPTS, NumberingService};
pub use service::{
    AdjustmentDirection, JsonEventBus, NewTransfer, StockAdjustment, SummaryCounts, TransferService,
};
pub use store::{
    DepotStore, InMemoryDepotStore, MovementFilter, PostgresDepotStore, StoreError, TransferCommit,
    TransferFilter,
};
