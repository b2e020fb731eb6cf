//! `apotheca-notifications` — derived stock alerts.
//!
//! Notifications are disposable, derived state: the evaluator re-checks a
//! batch's current quantity (or expiry date) and converges the unread set to
//! match, so running it twice is a no-op. Read-state is the only mutation;
//! notifications are never deleted.

pub mod evaluator;
pub mod expiry;
pub mod notification;
pub mod store;

pub use evaluator::{BatchExpiryState, NotificationEvaluator, StockLevel};
pub use expiry::{expired_severity, near_expiry_severity};
pub use notification::{EntityRef, Notification, NotificationId, NotificationKind, Severity};
pub use store::{InMemoryNotificationStore, NotificationStore};
