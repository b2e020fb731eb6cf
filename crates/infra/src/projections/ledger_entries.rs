use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;

use apotheca_core::{AggregateId, UserId};
use apotheca_events::EventEnvelope;
use apotheca_pharmacy::{BatchEvent, BatchId, EntryId, EntryStatus, MovementKind};

use crate::read_model::ReadModelStore;

/// Queryable ledger read model: one row per entry, addressable by entry id.
///
/// The entry → batch mapping is what lets the approval operations be called
/// with an entry id alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntryView {
    pub entry_id: EntryId,
    pub batch_id: BatchId,
    pub kind: MovementKind,
    pub quantity: i64,
    pub unit_price: u64,
    pub status: EntryStatus,
    pub user_id: Option<UserId>,
    pub notes: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum LedgerEntryProjectionError {
    #[error("failed to deserialize batch event: {0}")]
    Deserialize(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },

    #[error("status change for unknown ledger entry")]
    UnknownEntry,
}

/// Ledger entries projection.
///
/// Same cursor discipline as the stock projection: strict per-stream
/// monotonic sequence, replays ignored.
#[derive(Debug)]
pub struct LedgerEntriesProjection<S>
where
    S: ReadModelStore<EntryId, LedgerEntryView>,
{
    store: S,
    cursors: RwLock<HashMap<AggregateId, u64>>,
}

impl<S> LedgerEntriesProjection<S>
where
    S: ReadModelStore<EntryId, LedgerEntryView>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, entry_id: &EntryId) -> Option<LedgerEntryView> {
        self.store.get(entry_id)
    }

    /// All entries for one batch, oldest first.
    pub fn list_for_batch(&self, batch_id: BatchId) -> Vec<LedgerEntryView> {
        let mut entries: Vec<_> = self
            .store
            .list()
            .into_iter()
            .filter(|e| e.batch_id == batch_id)
            .collect();
        entries.sort_by_key(|e| e.recorded_at);
        entries
    }

    /// Apply a published envelope into the projection.
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), LedgerEntryProjectionError> {
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let mut cursors = match self.cursors.write() {
            Ok(c) => c,
            Err(_) => return Ok(()),
        };
        let last = *cursors.get(&aggregate_id).unwrap_or(&0);

        if seq == 0 {
            return Err(LedgerEntryProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            return Ok(());
        }
        if seq != last + 1 && last != 0 {
            return Err(LedgerEntryProjectionError::NonMonotonicSequence { last, found: seq });
        }

        let event: BatchEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| LedgerEntryProjectionError::Deserialize(e.to_string()))?;

        self.apply_event(&event)?;

        cursors.insert(aggregate_id, seq);
        Ok(())
    }

    fn apply_event(&self, event: &BatchEvent) -> Result<(), LedgerEntryProjectionError> {
        match event {
            BatchEvent::BatchReceived(_) | BatchEvent::BatchRetired(_) => {}
            BatchEvent::MovementRecorded(e) => {
                self.store.upsert(
                    e.entry_id,
                    LedgerEntryView {
                        entry_id: e.entry_id,
                        batch_id: e.batch_id,
                        kind: e.kind,
                        quantity: e.quantity,
                        unit_price: e.unit_price,
                        status: EntryStatus::Completed,
                        user_id: e.user_id,
                        notes: e.notes.clone(),
                        recorded_at: e.occurred_at,
                    },
                );
            }
            BatchEvent::SaleRequested(e) => {
                self.store.upsert(
                    e.entry_id,
                    LedgerEntryView {
                        entry_id: e.entry_id,
                        batch_id: e.batch_id,
                        kind: MovementKind::Sale,
                        quantity: e.quantity,
                        unit_price: e.unit_price,
                        status: EntryStatus::Pending,
                        user_id: e.user_id,
                        notes: e.notes.clone(),
                        recorded_at: e.occurred_at,
                    },
                );
            }
            BatchEvent::SaleApproved(e) => {
                let mut view = self
                    .store
                    .get(&e.entry_id)
                    .ok_or(LedgerEntryProjectionError::UnknownEntry)?;
                view.status = EntryStatus::Approved;
                view.notes = concat_notes(view.notes.take(), e.notes.as_deref());
                self.store.upsert(e.entry_id, view);
            }
            BatchEvent::SaleDeclined(e) => {
                let mut view = self
                    .store
                    .get(&e.entry_id)
                    .ok_or(LedgerEntryProjectionError::UnknownEntry)?;
                view.status = EntryStatus::Declined;
                view.notes = concat_notes(view.notes.take(), Some(&e.reason));
                self.store.upsert(e.entry_id, view);
            }
        }

        Ok(())
    }
}

fn concat_notes(existing: Option<String>, addition: Option<&str>) -> Option<String> {
    match (existing, addition) {
        (old, None) => old,
        (None, Some(new)) => Some(new.to_string()),
        (Some(old), Some(new)) => Some(format!("{old}\n{new}")),
    }
}
