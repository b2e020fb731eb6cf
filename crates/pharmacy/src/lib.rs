//! `apotheca-pharmacy` — the batch (lot) aggregate.
//!
//! A batch owns its on-hand quantity and its stock ledger. Every quantity
//! change is decided here and recorded as an immutable ledger entry; sales go
//! through a pending → approved/declined workflow with the stock reserved at
//! request time.

pub mod batch;

pub use batch::{
    ApproveSale, Batch, BatchCommand, BatchEvent, BatchId, BatchReceived, BatchRetired,
    DeclineSale, EntryId, EntryStatus, LedgerEntry, MovementKind, MovementRecorded,
    ReceiveBatch, RecordMovement, RetireBatch, SaleApproved, SaleDeclined, SaleRequested,
};
