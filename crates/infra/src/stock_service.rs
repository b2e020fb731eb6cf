//! Application facade for the stock core.
//!
//! `StockService` wires the dispatcher, projections, notification evaluator
//! and audit queue into the operations the outer layers (HTTP controllers,
//! schedulers) call. Post-commit steps run in a fixed order:
//!
//! 1. projections (synchronous, idempotent)
//! 2. notification evaluation (best-effort; failures logged, never rolled back)
//! 3. audit enqueue (asynchronous, fire-and-forget)
//!
//! Acting user ids are passed explicitly into every mutating call; there is
//! no ambient request state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{NaiveDate, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use apotheca_audit::{AuditAction, AuditEntry, AuditRecorder};
use apotheca_core::{AggregateId, DrugId, SupplierId, UserId};
use apotheca_events::{Command, EventBus, EventEnvelope};
use apotheca_notifications::{
    BatchExpiryState, NotificationEvaluator, NotificationStore, StockLevel,
};
use apotheca_pharmacy::{
    ApproveSale, Batch, BatchCommand, BatchId, DeclineSale, EntryId, MovementKind, ReceiveBatch,
    RecordMovement, RetireBatch,
};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::config::StockConfig;
use crate::event_store::{EventStore, StoredEvent};
use crate::projections::{
    BatchStockProjection, BatchStockView, LedgerEntriesProjection, LedgerEntryView,
};
use crate::read_model::{InMemoryReadModelStore, ReadModelStore};

const BATCH_AGGREGATE_TYPE: &str = "pharmacy.batch";

/// Service-level error taxonomy exposed to callers.
#[derive(Debug, Error)]
pub enum StockServiceError {
    #[error("not found")]
    NotFound,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("insufficient stock: {0}")]
    InsufficientStock(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// Infrastructure failure (store, serialization, publication).
    #[error("internal: {0}")]
    Internal(String),
}

impl From<DispatchError> for StockServiceError {
    fn from(value: DispatchError) -> Self {
        match value {
            DispatchError::NotFound => StockServiceError::NotFound,
            DispatchError::BadRequest(msg) => StockServiceError::BadRequest(msg),
            DispatchError::InsufficientStock(msg) => StockServiceError::InsufficientStock(msg),
            DispatchError::Conflict(msg) => StockServiceError::Conflict(msg),
            DispatchError::Deserialize(msg) => StockServiceError::Internal(msg),
            DispatchError::Store(e) => StockServiceError::Internal(e.to_string()),
            DispatchError::Publish(msg) => StockServiceError::Internal(msg),
        }
    }
}

/// Checks for references the core does not own.
///
/// Location assignments and purchase-order items live outside this core;
/// batch deletion must be rejected while either still points at the batch.
pub trait ReferenceGuard: Send + Sync {
    fn has_location_assignments(&self, batch_id: BatchId) -> bool;
    fn has_purchase_order_items(&self, batch_id: BatchId) -> bool;
}

/// Guard for deployments without location/purchase-order modules.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoExternalReferences;

impl ReferenceGuard for NoExternalReferences {
    fn has_location_assignments(&self, _batch_id: BatchId) -> bool {
        false
    }

    fn has_purchase_order_items(&self, _batch_id: BatchId) -> bool {
        false
    }
}

/// Input for batch receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBatch {
    pub drug_id: DrugId,
    pub supplier_id: SupplierId,
    pub manufactured_on: NaiveDate,
    pub expires_on: NaiveDate,
    pub purchased_on: NaiveDate,
    /// Smallest currency unit (e.g., cents).
    pub unit_cost: u64,
    pub unit_price: u64,
    pub opening_qty: i64,
    /// Defaults from `StockConfig` when absent.
    pub low_stock_threshold: Option<i64>,
}

/// The stock core's operations, behind one handle.
pub struct StockService<S, B> {
    dispatcher: CommandDispatcher<S, B>,
    batch_stock: BatchStockProjection<Arc<dyn ReadModelStore<BatchId, BatchStockView>>>,
    ledger_entries: LedgerEntriesProjection<Arc<dyn ReadModelStore<EntryId, LedgerEntryView>>>,
    evaluator: NotificationEvaluator<Arc<dyn NotificationStore>>,
    audit: AuditRecorder,
    reference_guard: Arc<dyn ReferenceGuard>,
    config: StockConfig,
    /// Serializes append + projection per batch stream, so projections see
    /// events in sequence order. The store's expected-version check remains
    /// the backstop against writers that bypass this service.
    stream_locks: Mutex<HashMap<AggregateId, Arc<Mutex<()>>>>,
    expiry_scan_flight: Mutex<()>,
}

impl<S, B> StockService<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(
        store: S,
        bus: B,
        notifications: Arc<dyn NotificationStore>,
        audit: AuditRecorder,
        reference_guard: Arc<dyn ReferenceGuard>,
        config: StockConfig,
    ) -> Self {
        let batch_stock_store: Arc<dyn ReadModelStore<BatchId, BatchStockView>> =
            Arc::new(InMemoryReadModelStore::new());
        let ledger_store: Arc<dyn ReadModelStore<EntryId, LedgerEntryView>> =
            Arc::new(InMemoryReadModelStore::new());

        Self {
            dispatcher: CommandDispatcher::new(store, bus),
            batch_stock: BatchStockProjection::new(batch_stock_store),
            ledger_entries: LedgerEntriesProjection::new(ledger_store),
            evaluator: NotificationEvaluator::new(notifications),
            audit,
            reference_guard,
            config,
            stream_locks: Mutex::new(HashMap::new()),
            expiry_scan_flight: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &StockConfig {
        &self.config
    }

    pub fn batch_stock(&self) -> &BatchStockProjection<Arc<dyn ReadModelStore<BatchId, BatchStockView>>> {
        &self.batch_stock
    }

    pub fn ledger_entries(&self) -> &LedgerEntriesProjection<Arc<dyn ReadModelStore<EntryId, LedgerEntryView>>> {
        &self.ledger_entries
    }

    /// Receive a new batch (manual entry or purchase-order fulfillment).
    pub fn receive_batch(
        &self,
        new_batch: NewBatch,
        user_id: Option<UserId>,
    ) -> Result<BatchStockView, StockServiceError> {
        let batch_id = BatchId::new(AggregateId::new());
        let threshold = new_batch
            .low_stock_threshold
            .unwrap_or(self.config.default_low_stock_threshold);

        self.dispatch(
            BatchCommand::ReceiveBatch(ReceiveBatch {
                batch_id,
                drug_id: new_batch.drug_id,
                supplier_id: new_batch.supplier_id,
                manufactured_on: new_batch.manufactured_on,
                expires_on: new_batch.expires_on,
                purchased_on: new_batch.purchased_on,
                unit_cost: new_batch.unit_cost,
                unit_price: new_batch.unit_price,
                opening_qty: new_batch.opening_qty,
                low_stock_threshold: threshold,
                user_id,
                occurred_at: Utc::now(),
            }),
        )?;
        self.after_commit(batch_id);

        self.record_audit(
            "batch",
            *batch_id.0.as_uuid(),
            AuditAction::Create,
            user_id,
            format!("batch received with {} unit(s)", new_batch.opening_qty),
        );

        self.batch_stock
            .get(&batch_id)
            .ok_or_else(|| StockServiceError::Internal("batch view missing after receipt".into()))
    }

    /// Record a stock movement against a batch.
    ///
    /// Sales are created pending with the stock reserved; everything else
    /// completes immediately.
    pub fn record_transaction(
        &self,
        batch_id: BatchId,
        kind: MovementKind,
        quantity: i64,
        user_id: Option<UserId>,
        notes: Option<String>,
    ) -> Result<LedgerEntryView, StockServiceError> {
        let entry_id = EntryId::new();

        self.dispatch(
            BatchCommand::RecordMovement(RecordMovement {
                batch_id,
                entry_id,
                kind,
                quantity,
                user_id,
                notes,
                from_location: None,
                to_location: None,
                occurred_at: Utc::now(),
            }),
        )?;
        self.after_commit(batch_id);

        self.record_audit(
            "transaction",
            *entry_id.as_uuid(),
            AuditAction::Create,
            user_id,
            format!("{kind} of {quantity} unit(s) recorded"),
        );

        self.entry_view(entry_id)
    }

    /// Approve a pending sale. Status-only: the stock was reserved at
    /// request time.
    pub fn approve_sale(
        &self,
        entry_id: EntryId,
        user_id: Option<UserId>,
        notes: Option<String>,
    ) -> Result<LedgerEntryView, StockServiceError> {
        let entry = self
            .ledger_entries
            .get(&entry_id)
            .ok_or(StockServiceError::NotFound)?;
        let batch_id = entry.batch_id;

        self.dispatch(
            BatchCommand::ApproveSale(ApproveSale {
                batch_id,
                entry_id,
                user_id,
                notes,
                occurred_at: Utc::now(),
            }),
        )?;
        self.after_commit(batch_id);

        self.record_audit(
            "transaction",
            *entry_id.as_uuid(),
            AuditAction::Approve,
            user_id,
            format!("sale of {} unit(s) approved", entry.quantity),
        );

        self.entry_view(entry_id)
    }

    /// Decline a pending sale, restoring the reserved quantity.
    pub fn decline_sale(
        &self,
        entry_id: EntryId,
        user_id: Option<UserId>,
        reason: String,
    ) -> Result<LedgerEntryView, StockServiceError> {
        let entry = self
            .ledger_entries
            .get(&entry_id)
            .ok_or(StockServiceError::NotFound)?;
        let batch_id = entry.batch_id;

        self.dispatch(
            BatchCommand::DeclineSale(DeclineSale {
                batch_id,
                entry_id,
                user_id,
                reason,
                occurred_at: Utc::now(),
            }),
        )?;
        self.after_commit(batch_id);

        self.record_audit(
            "transaction",
            *entry_id.as_uuid(),
            AuditAction::Decline,
            user_id,
            format!("sale of {} unit(s) declined", entry.quantity),
        );

        self.entry_view(entry_id)
    }

    /// Delete (retire) a batch.
    ///
    /// Rejected while the batch has ledger entries, location assignments or
    /// purchase-order-item references.
    pub fn delete_batch(
        &self,
        batch_id: BatchId,
        user_id: Option<UserId>,
    ) -> Result<(), StockServiceError> {
        if self.reference_guard.has_location_assignments(batch_id) {
            return Err(StockServiceError::Conflict(
                "batch has location assignments and cannot be deleted".to_string(),
            ));
        }
        if self.reference_guard.has_purchase_order_items(batch_id) {
            return Err(StockServiceError::Conflict(
                "batch is referenced by purchase order items and cannot be deleted".to_string(),
            ));
        }

        self.dispatch(
            BatchCommand::RetireBatch(RetireBatch {
                batch_id,
                user_id,
                occurred_at: Utc::now(),
            }),
        )?;
        self.after_commit(batch_id);

        self.record_audit(
            "batch",
            *batch_id.0.as_uuid(),
            AuditAction::Delete,
            user_id,
            "batch deleted".to_string(),
        );

        Ok(())
    }

    /// Re-derive stock notifications for one batch. Idempotent.
    pub fn evaluate_batch_stock(&self, batch_id: BatchId) -> Result<(), StockServiceError> {
        let view = self
            .batch_stock
            .get(&batch_id)
            .ok_or(StockServiceError::NotFound)?;
        self.evaluator.evaluate_stock(
            &StockLevel {
                batch_id: view.batch_id,
                on_hand: view.on_hand,
                low_stock_threshold: view.low_stock_threshold,
            },
            Utc::now(),
        );
        Ok(())
    }

    /// One expiry scan over all live batches. Idempotent; overlapping calls
    /// are single-flight (the loser returns without scanning).
    pub fn run_expiry_scan(&self, today: NaiveDate) -> bool {
        let Ok(_guard) = self.expiry_scan_flight.try_lock() else {
            debug!("expiry scan already in flight; skipping");
            return false;
        };

        let batches: Vec<BatchExpiryState> = self
            .batch_stock
            .list()
            .into_iter()
            .filter(|v| !v.retired)
            .map(|v| BatchExpiryState {
                batch_id: v.batch_id,
                expires_on: v.expires_on,
                on_hand: v.on_hand,
            })
            .collect();

        info!(batch_count = batches.len(), %today, "running expiry scan");
        self.evaluator.run_expiry_scan(&batches, today, Utc::now());
        true
    }

    /// Run one command through the pipeline and feed the projections.
    ///
    /// Holds the batch's stream lock across append and projection, so
    /// concurrent calls against the same batch queue up instead of racing:
    /// their insufficiency checks always run against the committed state,
    /// and the projections receive events in sequence order.
    fn dispatch(&self, command: BatchCommand) -> Result<Vec<StoredEvent>, StockServiceError> {
        let aggregate_id = command.target_aggregate_id();
        let lock = self.stream_lock(aggregate_id);
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let committed = self
            .dispatcher
            .dispatch(aggregate_id, BATCH_AGGREGATE_TYPE, command, |id| {
                Batch::empty(BatchId::new(id))
            })
            .map_err(StockServiceError::from)?;

        for stored in &committed {
            let envelope = stored.to_envelope();
            if let Err(e) = self.batch_stock.apply_envelope(&envelope) {
                warn!(error = %e, %aggregate_id, "batch stock projection failed");
            }
            if let Err(e) = self.ledger_entries.apply_envelope(&envelope) {
                warn!(error = %e, %aggregate_id, "ledger entries projection failed");
            }
        }

        Ok(committed)
    }

    fn stream_lock(&self, aggregate_id: AggregateId) -> Arc<Mutex<()>> {
        let mut locks = self
            .stream_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(aggregate_id).or_default().clone()
    }

    /// Post-commit hook: re-derive notifications for the touched batch.
    ///
    /// Strictly after the atomic append and outside its atomicity boundary.
    /// Failures are logged and swallowed: the committed events are the
    /// source of truth and the next mutation or scan re-derives the same
    /// state.
    fn after_commit(&self, batch_id: BatchId) {
        if let Err(e) = self.evaluate_batch_stock(batch_id) {
            warn!(error = %e, %batch_id, "post-commit notification evaluation failed");
        }
    }

    fn record_audit(
        &self,
        entity_name: &str,
        entity_id: Uuid,
        action: AuditAction,
        user_id: Option<UserId>,
        summary: String,
    ) {
        self.audit.record(AuditEntry::new(
            entity_name,
            entity_id,
            action,
            user_id,
            summary,
            Utc::now(),
        ));
    }

    fn entry_view(&self, entry_id: EntryId) -> Result<LedgerEntryView, StockServiceError> {
        self.ledger_entries
            .get(&entry_id)
            .ok_or_else(|| StockServiceError::Internal("ledger entry view missing".into()))
    }
}
