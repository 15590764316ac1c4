//! Transfers domain module (warehouse-to-warehouse stock transfers).
//!
//! This crate contains the transfer aggregate, its transition table and the
//! transfer numbering format, implemented purely as deterministic domain
//! logic (no IO, no HTTP, no storage). Ledger effects are derived from the
//! events the aggregate emits; `depot-infra` commits them atomically.

pub mod number;
pub mod state;
pub mod transfer;

pub use number::{PeriodKey, TransferNumber};
pub use state::TransferState;
pub use transfer::{
    CancelDisposition, CreateTransfer, LineQuantity, NewTransferLine, ReviseDraft, Transfer,
    TransferCommand, TransferEvent, TransferId, TransferLine, TransferLineId, TransitionCommand,
    TransitionOverrides,
};
