//! Stock notification evaluator.
//!
//! Derives alerts from current batch state. Idempotent: the unread set is
//! converged to the state, so evaluating twice in a row changes nothing.

use chrono::{DateTime, NaiveDate, Utc};
use tracing::debug;

use apotheca_pharmacy::BatchId;

use crate::expiry::{expired_severity, near_expiry_severity};
use crate::notification::{EntityRef, Notification, NotificationKind, Severity};
use crate::store::NotificationStore;

/// Quantity view of one batch, as the evaluator needs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockLevel {
    pub batch_id: BatchId,
    pub on_hand: i64,
    pub low_stock_threshold: i64,
}

/// Expiry view of one batch, as the daily scan needs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchExpiryState {
    pub batch_id: BatchId,
    pub expires_on: NaiveDate,
    pub on_hand: i64,
}

/// Evaluates stock-level and expiry conditions into notifications.
///
/// Side-effecting only through the notification store; a pure function of
/// the batch state handed to it.
#[derive(Debug)]
pub struct NotificationEvaluator<S> {
    store: S,
}

impl<S> NotificationEvaluator<S>
where
    S: NotificationStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Re-check the out-of-stock / low-stock conditions for one batch.
    ///
    /// - `on_hand == 0` → one unread out-of-stock alert (high).
    /// - `0 < on_hand ≤ threshold` → one unread low-stock alert (medium).
    /// - A condition that no longer holds gets its unread alerts marked read.
    pub fn evaluate_stock(&self, level: &StockLevel, now: DateTime<Utc>) {
        let entity = EntityRef::batch(level.batch_id);

        if level.on_hand == 0 {
            self.store
                .mark_read(NotificationKind::LowStock, &entity, now);
            self.ensure_unread(
                NotificationKind::OutOfStock,
                Severity::High,
                format!("Batch {} is out of stock", level.batch_id),
                entity,
                now,
            );
            return;
        }

        // Back in stock: clear any standing out-of-stock alert.
        self.store
            .mark_read(NotificationKind::OutOfStock, &entity, now);

        if level.on_hand <= level.low_stock_threshold {
            self.ensure_unread(
                NotificationKind::LowStock,
                Severity::Medium,
                format!(
                    "Batch {} is low on stock: {} on hand (threshold {})",
                    level.batch_id, level.on_hand, level.low_stock_threshold
                ),
                entity,
                now,
            );
        } else {
            self.store
                .mark_read(NotificationKind::LowStock, &entity, now);
        }
    }

    /// One pass of the expiry scan over all batches.
    ///
    /// Near-expiry alerts fire at fixed day marks before expiry regardless of
    /// remaining stock; expired alerts fire at day marks after expiry only
    /// while the batch still holds stock.
    pub fn run_expiry_scan<'a>(
        &self,
        batches: impl IntoIterator<Item = &'a BatchExpiryState>,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) {
        for batch in batches {
            let entity = EntityRef::batch(batch.batch_id);
            let days_until = (batch.expires_on - today).num_days();

            if let Some(severity) = near_expiry_severity(days_until) {
                self.ensure_expiry_unread(
                    NotificationKind::NearExpiry,
                    severity,
                    format!(
                        "Batch {} expires in {} day(s) ({})",
                        batch.batch_id, days_until, batch.expires_on
                    ),
                    entity.clone(),
                    batch.expires_on,
                    now,
                );
            }

            if batch.on_hand > 0 {
                if let Some(severity) = expired_severity(-days_until) {
                    self.ensure_expiry_unread(
                        NotificationKind::Expired,
                        severity,
                        format!(
                            "Batch {} expired {} day(s) ago ({}) with {} unit(s) on hand",
                            batch.batch_id, -days_until, batch.expires_on, batch.on_hand
                        ),
                        entity,
                        batch.expires_on,
                        now,
                    );
                }
            }
        }
    }

    fn ensure_unread(
        &self,
        kind: NotificationKind,
        severity: Severity,
        message: String,
        entity: EntityRef,
        now: DateTime<Utc>,
    ) {
        if self.store.has_unread(kind, &entity) {
            debug!(?kind, entity_id = %entity.entity_id, "unread notification already present");
            return;
        }
        self.store
            .insert(Notification::new(kind, severity, message, entity, now));
    }

    fn ensure_expiry_unread(
        &self,
        kind: NotificationKind,
        severity: Severity,
        message: String,
        entity: EntityRef,
        expires_on: NaiveDate,
        now: DateTime<Utc>,
    ) {
        if self.store.has_unread(kind, &entity) {
            return;
        }
        let expires_at = expires_on
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc())
            .unwrap_or(now);
        self.store.insert(
            Notification::new(kind, severity, message, entity, now).expiring_at(expires_at),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryNotificationStore;
    use apotheca_core::AggregateId;

    fn test_batch_id() -> BatchId {
        BatchId::new(AggregateId::new())
    }

    fn evaluator() -> NotificationEvaluator<InMemoryNotificationStore> {
        NotificationEvaluator::new(InMemoryNotificationStore::new())
    }

    fn level(batch_id: BatchId, on_hand: i64, threshold: i64) -> StockLevel {
        StockLevel {
            batch_id,
            on_hand,
            low_stock_threshold: threshold,
        }
    }

    #[test]
    fn out_of_stock_creates_one_high_alert() {
        let ev = evaluator();
        let batch_id = test_batch_id();

        ev.evaluate_stock(&level(batch_id, 0, 10), Utc::now());

        let unread = ev.store().unread();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].kind, NotificationKind::OutOfStock);
        assert_eq!(unread[0].severity, Severity::High);
    }

    #[test]
    fn evaluating_the_same_out_of_stock_batch_twice_dedups() {
        let ev = evaluator();
        let batch_id = test_batch_id();

        ev.evaluate_stock(&level(batch_id, 0, 10), Utc::now());
        ev.evaluate_stock(&level(batch_id, 0, 10), Utc::now());

        assert_eq!(ev.store().unread().len(), 1);
    }

    #[test]
    fn restock_marks_out_of_stock_read() {
        let ev = evaluator();
        let batch_id = test_batch_id();

        ev.evaluate_stock(&level(batch_id, 0, 0), Utc::now());
        assert_eq!(ev.store().unread().len(), 1);

        ev.evaluate_stock(&level(batch_id, 1, 0), Utc::now());
        assert!(ev.store().unread().is_empty());
        // Never deleted, only read.
        assert_eq!(ev.store().all().len(), 1);
    }

    #[test]
    fn low_stock_fires_within_threshold_and_clears_above_it() {
        let ev = evaluator();
        let batch_id = test_batch_id();

        // 5 on hand, threshold 10 → low stock.
        ev.evaluate_stock(&level(batch_id, 5, 10), Utc::now());
        let unread = ev.store().unread();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].kind, NotificationKind::LowStock);
        assert_eq!(unread[0].severity, Severity::Medium);

        // Restocked to 25 → cleared.
        ev.evaluate_stock(&level(batch_id, 25, 10), Utc::now());
        assert!(ev.store().unread().is_empty());
    }

    #[test]
    fn dropping_to_zero_swaps_low_stock_for_out_of_stock() {
        let ev = evaluator();
        let batch_id = test_batch_id();

        ev.evaluate_stock(&level(batch_id, 3, 10), Utc::now());
        ev.evaluate_stock(&level(batch_id, 0, 10), Utc::now());

        let unread = ev.store().unread();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].kind, NotificationKind::OutOfStock);
    }

    #[test]
    fn boundary_exactly_at_threshold_is_low_stock() {
        let ev = evaluator();
        let batch_id = test_batch_id();

        ev.evaluate_stock(&level(batch_id, 10, 10), Utc::now());
        assert_eq!(ev.store().unread().len(), 1);
        assert_eq!(ev.store().unread()[0].kind, NotificationKind::LowStock);
    }

    fn expiry_state(batch_id: BatchId, expires_on: NaiveDate, on_hand: i64) -> BatchExpiryState {
        BatchExpiryState {
            batch_id,
            expires_on,
            on_hand,
        }
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn near_expiry_fires_at_marks_even_with_no_stock() {
        let ev = evaluator();
        let batch_id = test_batch_id();
        let today = day(2026, 8, 1);

        // Expires in 5 days, zero on hand.
        let batches = [expiry_state(batch_id, day(2026, 8, 6), 0)];
        ev.run_expiry_scan(&batches, today, Utc::now());

        let unread = ev.store().unread();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].kind, NotificationKind::NearExpiry);
        assert_eq!(unread[0].severity, Severity::Low);
        assert!(unread[0].expires_at.is_some());
    }

    #[test]
    fn near_expiry_skips_non_mark_days() {
        let ev = evaluator();
        let batch_id = test_batch_id();
        let today = day(2026, 8, 1);

        // Expires in 7 days: not a mark.
        let batches = [expiry_state(batch_id, day(2026, 8, 8), 5)];
        ev.run_expiry_scan(&batches, today, Utc::now());

        assert!(ev.store().unread().is_empty());
    }

    #[test]
    fn expired_fires_only_while_stock_remains() {
        let ev = evaluator();
        let with_stock = test_batch_id();
        let without_stock = test_batch_id();
        let today = day(2026, 8, 10);

        // Both expired exactly today.
        let batches = [
            expiry_state(with_stock, day(2026, 8, 10), 4),
            expiry_state(without_stock, day(2026, 8, 10), 0),
        ];
        ev.run_expiry_scan(&batches, today, Utc::now());

        let unread = ev.store().unread();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].kind, NotificationKind::Expired);
        assert_eq!(unread[0].severity, Severity::High);
        assert_eq!(unread[0].entity, EntityRef::batch(with_stock));
    }

    #[test]
    fn scanning_twice_on_the_same_day_is_idempotent() {
        let ev = evaluator();
        let batch_id = test_batch_id();
        let today = day(2026, 8, 1);
        let batches = [expiry_state(batch_id, day(2026, 8, 2), 3)];

        ev.run_expiry_scan(&batches, today, Utc::now());
        ev.run_expiry_scan(&batches, today, Utc::now());

        assert_eq!(ev.store().unread().len(), 1);
    }

    #[test]
    fn expired_severity_degrades_over_the_marks() {
        let ev = evaluator();
        let batch_id = test_batch_id();
        let expires = day(2026, 8, 1);

        // Day 10 after expiry; the earlier alert was read by a user.
        ev.run_expiry_scan(
            &[expiry_state(batch_id, expires, 2)],
            day(2026, 8, 11),
            Utc::now(),
        );
        let unread = ev.store().unread();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].severity, Severity::Low);
    }
}
