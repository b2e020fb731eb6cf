//! `apotheca-audit` — fire-and-forget activity logging.
//!
//! Every mutating stock operation reports what happened; none of them wait
//! for the write to land, and a failed write never fails the operation.

pub mod entry;
pub mod recorder;

pub use entry::{AuditAction, AuditEntry};
pub use recorder::{AuditRecorder, AuditRecorderHandle, AuditSink, AuditSinkError, InMemoryAuditSink};
