//! Projection implementations (read model builders).
//!
//! Projections consume committed batch events and build query-optimized read
//! models. All projections are:
//! - **Rebuildable**: reconstructable from the event stream
//! - **Idempotent**: safe for at-least-once delivery

pub mod batch_stock;
pub mod ledger_entries;

pub use batch_stock::{BatchStockProjection, BatchStockProjectionError, BatchStockView};
pub use ledger_entries::{LedgerEntriesProjection, LedgerEntryProjectionError, LedgerEntryView};
