use std::collections::HashMap;
use std::sync::RwLock;

use chrono::NaiveDate;
use serde_json::Value as JsonValue;
use thiserror::Error;

use apotheca_core::{AggregateId, DrugId};
use apotheca_events::EventEnvelope;
use apotheca_pharmacy::{BatchEvent, BatchId};

use crate::read_model::ReadModelStore;

/// Queryable stock read model: quantity and expiry per batch.
///
/// This is the view the notification evaluator and the expiry scan work
/// from, so neither has to rehydrate aggregates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchStockView {
    pub batch_id: BatchId,
    pub drug_id: DrugId,
    pub on_hand: i64,
    pub low_stock_threshold: i64,
    pub expires_on: NaiveDate,
    pub retired: bool,
}

#[derive(Debug, Error)]
pub enum BatchStockProjectionError {
    #[error("failed to deserialize batch event: {0}")]
    Deserialize(String),

    #[error("event batch_id does not match envelope aggregate_id")]
    AggregateMismatch,

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },

    #[error("received event for a batch before its BatchReceived")]
    UnknownBatch,
}

/// Batch stock projection.
///
/// Consumes published envelopes (JSON payloads) and maintains the stock read
/// model. Read models are disposable and rebuildable from the event stream.
#[derive(Debug)]
pub struct BatchStockProjection<S>
where
    S: ReadModelStore<BatchId, BatchStockView>,
{
    store: S,
    cursors: RwLock<HashMap<AggregateId, u64>>,
}

impl<S> BatchStockProjection<S>
where
    S: ReadModelStore<BatchId, BatchStockView>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    /// Query the read model for one batch.
    pub fn get(&self, batch_id: &BatchId) -> Option<BatchStockView> {
        self.store.get(batch_id)
    }

    /// List all batches (disposable read model).
    pub fn list(&self) -> Vec<BatchStockView> {
        self.store.list()
    }

    /// Apply a published envelope into the projection.
    ///
    /// - Enforces monotonic sequence per aggregate stream
    /// - Idempotent for at-least-once delivery (replays <= cursor are ignored)
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), BatchStockProjectionError> {
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let mut cursors = match self.cursors.write() {
            Ok(c) => c,
            Err(_) => return Ok(()),
        };
        let last = *cursors.get(&aggregate_id).unwrap_or(&0);

        if seq == 0 {
            return Err(BatchStockProjectionError::NonMonotonicSequence { last, found: seq });
        }

        if seq <= last {
            // Duplicate or replay; safe to ignore.
            return Ok(());
        }

        if seq != last + 1 && last != 0 {
            // First event may land at any positive sequence; after that we
            // require strict increments.
            return Err(BatchStockProjectionError::NonMonotonicSequence { last, found: seq });
        }

        let event: BatchEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| BatchStockProjectionError::Deserialize(e.to_string()))?;

        self.apply_event(aggregate_id, &event)?;

        // Advance cursor after successful apply.
        cursors.insert(aggregate_id, seq);
        Ok(())
    }

    fn apply_event(
        &self,
        aggregate_id: AggregateId,
        event: &BatchEvent,
    ) -> Result<(), BatchStockProjectionError> {
        let batch_id = match event {
            BatchEvent::BatchReceived(e) => e.batch_id,
            BatchEvent::MovementRecorded(e) => e.batch_id,
            BatchEvent::SaleRequested(e) => e.batch_id,
            BatchEvent::SaleApproved(e) => e.batch_id,
            BatchEvent::SaleDeclined(e) => e.batch_id,
            BatchEvent::BatchRetired(e) => e.batch_id,
        };

        if batch_id.0 != aggregate_id {
            return Err(BatchStockProjectionError::AggregateMismatch);
        }

        match event {
            BatchEvent::BatchReceived(e) => {
                self.store.upsert(
                    e.batch_id,
                    BatchStockView {
                        batch_id: e.batch_id,
                        drug_id: e.drug_id,
                        on_hand: e.opening_qty,
                        low_stock_threshold: e.low_stock_threshold,
                        expires_on: e.expires_on,
                        retired: false,
                    },
                );
            }
            BatchEvent::MovementRecorded(e) => {
                let mut view = self
                    .store
                    .get(&e.batch_id)
                    .ok_or(BatchStockProjectionError::UnknownBatch)?;
                view.on_hand += e.kind.signed(e.quantity);
                self.store.upsert(e.batch_id, view);
            }
            BatchEvent::SaleRequested(e) => {
                let mut view = self
                    .store
                    .get(&e.batch_id)
                    .ok_or(BatchStockProjectionError::UnknownBatch)?;
                view.on_hand -= e.quantity;
                self.store.upsert(e.batch_id, view);
            }
            BatchEvent::SaleApproved(_) => {
                // Quantity already moved at request time.
            }
            BatchEvent::SaleDeclined(e) => {
                let mut view = self
                    .store
                    .get(&e.batch_id)
                    .ok_or(BatchStockProjectionError::UnknownBatch)?;
                view.on_hand += e.quantity;
                self.store.upsert(e.batch_id, view);
            }
            BatchEvent::BatchRetired(e) => {
                if let Some(mut view) = self.store.get(&e.batch_id) {
                    view.retired = true;
                    self.store.upsert(e.batch_id, view);
                }
            }
        }

        Ok(())
    }

    /// Rebuild the read model from scratch by replaying envelopes.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), BatchStockProjectionError> {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.clear();
        }
        self.store.clear();

        // Deterministic replay order: aggregate, then sequence.
        let mut envs: Vec<_> = envelopes.into_iter().collect();
        envs.sort_by_key(|e| (*e.aggregate_id().as_uuid().as_bytes(), e.sequence_number()));

        for env in &envs {
            self.apply_envelope(env)?;
        }

        Ok(())
    }
}
