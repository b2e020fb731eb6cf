//! Notification storage abstraction.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use crate::notification::{EntityRef, Notification, NotificationId, NotificationKind};

/// Store for derived alerts.
///
/// The evaluator only needs three things: append a new alert, ask whether an
/// unread alert already exists for a `(kind, entity)` key, and mark unread
/// alerts for a key read. Explicit per-id read-marking backs the user-facing
/// "mark read" action.
pub trait NotificationStore: Send + Sync {
    fn insert(&self, notification: Notification);

    /// Whether an unread notification with this `(kind, entity)` key exists.
    fn has_unread(&self, kind: NotificationKind, entity: &EntityRef) -> bool;

    /// Mark all unread notifications with this `(kind, entity)` key read.
    /// Returns how many were marked.
    fn mark_read(&self, kind: NotificationKind, entity: &EntityRef, at: DateTime<Utc>) -> usize;

    /// Explicit user action on one notification. Returns false if unknown.
    fn mark_read_by_id(&self, id: NotificationId, at: DateTime<Utc>) -> bool;

    fn unread(&self) -> Vec<Notification>;

    fn all(&self) -> Vec<Notification>;
}

impl<S> NotificationStore for Arc<S>
where
    S: NotificationStore + ?Sized,
{
    fn insert(&self, notification: Notification) {
        (**self).insert(notification)
    }

    fn has_unread(&self, kind: NotificationKind, entity: &EntityRef) -> bool {
        (**self).has_unread(kind, entity)
    }

    fn mark_read(&self, kind: NotificationKind, entity: &EntityRef, at: DateTime<Utc>) -> usize {
        (**self).mark_read(kind, entity, at)
    }

    fn mark_read_by_id(&self, id: NotificationId, at: DateTime<Utc>) -> bool {
        (**self).mark_read_by_id(id, at)
    }

    fn unread(&self) -> Vec<Notification> {
        (**self).unread()
    }

    fn all(&self) -> Vec<Notification> {
        (**self).all()
    }
}

/// In-memory notification store for tests/dev.
///
/// Append-only apart from the read flag, matching the notification lifecycle.
#[derive(Debug, Default)]
pub struct InMemoryNotificationStore {
    inner: RwLock<Vec<Notification>>,
}

impl InMemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NotificationStore for InMemoryNotificationStore {
    fn insert(&self, notification: Notification) {
        if let Ok(mut all) = self.inner.write() {
            all.push(notification);
        }
    }

    fn has_unread(&self, kind: NotificationKind, entity: &EntityRef) -> bool {
        match self.inner.read() {
            Ok(all) => all
                .iter()
                .any(|n| !n.read && n.kind == kind && n.entity == *entity),
            Err(_) => false,
        }
    }

    fn mark_read(&self, kind: NotificationKind, entity: &EntityRef, at: DateTime<Utc>) -> usize {
        let mut marked = 0;
        if let Ok(mut all) = self.inner.write() {
            for n in all.iter_mut() {
                if !n.read && n.kind == kind && n.entity == *entity {
                    n.mark_read(at);
                    marked += 1;
                }
            }
        }
        marked
    }

    fn mark_read_by_id(&self, id: NotificationId, at: DateTime<Utc>) -> bool {
        if let Ok(mut all) = self.inner.write() {
            if let Some(n) = all.iter_mut().find(|n| n.id == id) {
                n.mark_read(at);
                return true;
            }
        }
        false
    }

    fn unread(&self) -> Vec<Notification> {
        match self.inner.read() {
            Ok(all) => all.iter().filter(|n| !n.read).cloned().collect(),
            Err(_) => vec![],
        }
    }

    fn all(&self) -> Vec<Notification> {
        match self.inner.read() {
            Ok(all) => all.clone(),
            Err(_) => vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::Severity;
    use apotheca_core::AggregateId;
    use apotheca_pharmacy::BatchId;

    fn entity() -> EntityRef {
        EntityRef::batch(BatchId::new(AggregateId::new()))
    }

    #[test]
    fn unread_lookup_matches_on_structured_key() {
        let store = InMemoryNotificationStore::new();
        let a = entity();
        let b = entity();

        store.insert(Notification::new(
            NotificationKind::OutOfStock,
            Severity::High,
            "Batch a is out of stock",
            a.clone(),
            Utc::now(),
        ));

        assert!(store.has_unread(NotificationKind::OutOfStock, &a));
        // Different entity, same kind: no match.
        assert!(!store.has_unread(NotificationKind::OutOfStock, &b));
        // Same entity, different kind: no match.
        assert!(!store.has_unread(NotificationKind::LowStock, &a));
    }

    #[test]
    fn mark_read_clears_only_the_given_key() {
        let store = InMemoryNotificationStore::new();
        let a = entity();
        let b = entity();
        let now = Utc::now();

        for e in [&a, &b] {
            store.insert(Notification::new(
                NotificationKind::LowStock,
                Severity::Medium,
                "low",
                e.clone(),
                now,
            ));
        }

        assert_eq!(store.mark_read(NotificationKind::LowStock, &a, now), 1);
        assert!(!store.has_unread(NotificationKind::LowStock, &a));
        assert!(store.has_unread(NotificationKind::LowStock, &b));

        // Notifications are never deleted; the read one is still there.
        assert_eq!(store.all().len(), 2);
        assert_eq!(store.unread().len(), 1);
    }

    #[test]
    fn mark_read_by_id_is_an_explicit_user_action() {
        let store = InMemoryNotificationStore::new();
        let n = Notification::new(
            NotificationKind::NearExpiry,
            Severity::Low,
            "expiring",
            entity(),
            Utc::now(),
        );
        let id = n.id;
        store.insert(n);

        assert!(store.mark_read_by_id(id, Utc::now()));
        assert!(store.unread().is_empty());
        assert!(!store.mark_read_by_id(NotificationId::new(), Utc::now()));
    }
}
