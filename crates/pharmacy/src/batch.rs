use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use apotheca_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, DrugId, LocationId, SupplierId, UserId,
};
use apotheca_events::Event;

/// Batch identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(pub AggregateId);

impl BatchId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for BatchId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Ledger entry identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(pub Uuid);

impl EntryId {
    /// Uses UUIDv7 (time-ordered). Prefer passing IDs explicitly in tests.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for EntryId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Kind of a stock movement, which fixes the sign of its quantity effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementKind {
    /// Goods received into the batch (credit).
    Inbound,
    /// A sale out of the batch (debit, approval-gated).
    Sale,
    /// A customer return back into stock (credit).
    ReturnIn,
    /// A return out to the supplier (debit).
    ReturnOut,
}

impl MovementKind {
    /// Credits increase `on_hand`; debits decrease it.
    pub fn is_credit(self) -> bool {
        matches!(self, MovementKind::Inbound | MovementKind::ReturnIn)
    }

    pub fn is_debit(self) -> bool {
        !self.is_credit()
    }

    /// Quantity effect on `on_hand` for a movement of `quantity` units.
    pub fn signed(self, quantity: i64) -> i64 {
        if self.is_credit() { quantity } else { -quantity }
    }
}

impl core::fmt::Display for MovementKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            MovementKind::Inbound => write!(f, "inbound"),
            MovementKind::Sale => write!(f, "sale"),
            MovementKind::ReturnIn => write!(f, "positive return"),
            MovementKind::ReturnOut => write!(f, "negative return"),
        }
    }
}

impl apotheca_core::ValueObject for MovementKind {}

/// Ledger entry status lifecycle.
///
/// Non-sale entries are born `Completed` and never change. Sale entries are
/// born `Pending` and end `Approved` or `Declined`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Pending,
    Completed,
    Approved,
    Declined,
}

impl core::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            EntryStatus::Pending => write!(f, "pending"),
            EntryStatus::Completed => write!(f, "completed"),
            EntryStatus::Approved => write!(f, "approved"),
            EntryStatus::Declined => write!(f, "declined"),
        }
    }
}

impl apotheca_core::ValueObject for EntryStatus {}

/// One immutable record of a quantity-affecting event against the batch.
///
/// Only the `status` and `notes` of a sale entry ever change after creation,
/// and only through the approval workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entry_id: EntryId,
    pub kind: MovementKind,
    /// Positive unit count; the sign comes from `kind`.
    pub quantity: i64,
    /// Batch unit price at recording time, in smallest currency unit.
    pub unit_price: u64,
    pub status: EntryStatus,
    /// Acting user; cleared if the user is later removed.
    pub user_id: Option<UserId>,
    pub notes: Option<String>,
    pub from_location: Option<LocationId>,
    pub to_location: Option<LocationId>,
    pub recorded_at: DateTime<Utc>,
}

impl apotheca_core::Entity for LedgerEntry {
    type Id = EntryId;

    fn id(&self) -> &Self::Id {
        &self.entry_id
    }
}

/// Aggregate root: Batch (a receivable lot of a drug).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    id: BatchId,
    drug_id: Option<DrugId>,
    supplier_id: Option<SupplierId>,
    manufactured_on: NaiveDate,
    expires_on: NaiveDate,
    purchased_on: NaiveDate,
    /// Smallest currency unit (e.g., cents).
    unit_cost: u64,
    unit_price: u64,
    on_hand: i64,
    low_stock_threshold: i64,
    entries: Vec<LedgerEntry>,
    version: u64,
    created: bool,
    retired: bool,
}

impl Batch {
    /// Create an empty, not-yet-received aggregate instance for rehydration.
    pub fn empty(id: BatchId) -> Self {
        Self {
            id,
            drug_id: None,
            supplier_id: None,
            manufactured_on: NaiveDate::MIN,
            expires_on: NaiveDate::MIN,
            purchased_on: NaiveDate::MIN,
            unit_cost: 0,
            unit_price: 0,
            on_hand: 0,
            low_stock_threshold: 0,
            entries: Vec::new(),
            version: 0,
            created: false,
            retired: false,
        }
    }

    pub fn id_typed(&self) -> BatchId {
        self.id
    }

    pub fn drug_id(&self) -> Option<DrugId> {
        self.drug_id
    }

    pub fn supplier_id(&self) -> Option<SupplierId> {
        self.supplier_id
    }

    pub fn expires_on(&self) -> NaiveDate {
        self.expires_on
    }

    pub fn unit_price(&self) -> u64 {
        self.unit_price
    }

    pub fn on_hand(&self) -> i64 {
        self.on_hand
    }

    pub fn low_stock_threshold(&self) -> i64 {
        self.low_stock_threshold
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn entry(&self, entry_id: EntryId) -> Option<&LedgerEntry> {
        self.entries.iter().find(|e| e.entry_id == entry_id)
    }

    pub fn is_retired(&self) -> bool {
        self.retired
    }
}

impl AggregateRoot for Batch {
    type Id = BatchId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: ReceiveBatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveBatch {
    pub batch_id: BatchId,
    pub drug_id: DrugId,
    pub supplier_id: SupplierId,
    pub manufactured_on: NaiveDate,
    pub expires_on: NaiveDate,
    pub purchased_on: NaiveDate,
    pub unit_cost: u64,
    pub unit_price: u64,
    pub opening_qty: i64,
    pub low_stock_threshold: i64,
    pub user_id: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordMovement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMovement {
    pub batch_id: BatchId,
    pub entry_id: EntryId,
    pub kind: MovementKind,
    pub quantity: i64,
    pub user_id: Option<UserId>,
    pub notes: Option<String>,
    pub from_location: Option<LocationId>,
    pub to_location: Option<LocationId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ApproveSale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveSale {
    pub batch_id: BatchId,
    pub entry_id: EntryId,
    pub user_id: Option<UserId>,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeclineSale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclineSale {
    pub batch_id: BatchId,
    pub entry_id: EntryId,
    pub user_id: Option<UserId>,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RetireBatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetireBatch {
    pub batch_id: BatchId,
    pub user_id: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchCommand {
    ReceiveBatch(ReceiveBatch),
    RecordMovement(RecordMovement),
    ApproveSale(ApproveSale),
    DeclineSale(DeclineSale),
    RetireBatch(RetireBatch),
}

impl BatchCommand {
    pub fn batch_id(&self) -> BatchId {
        match self {
            BatchCommand::ReceiveBatch(cmd) => cmd.batch_id,
            BatchCommand::RecordMovement(cmd) => cmd.batch_id,
            BatchCommand::ApproveSale(cmd) => cmd.batch_id,
            BatchCommand::DeclineSale(cmd) => cmd.batch_id,
            BatchCommand::RetireBatch(cmd) => cmd.batch_id,
        }
    }
}

impl apotheca_events::Command for BatchCommand {
    fn target_aggregate_id(&self) -> AggregateId {
        self.batch_id().0
    }
}

/// Event: BatchReceived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReceived {
    pub batch_id: BatchId,
    pub drug_id: DrugId,
    pub supplier_id: SupplierId,
    pub manufactured_on: NaiveDate,
    pub expires_on: NaiveDate,
    pub purchased_on: NaiveDate,
    pub unit_cost: u64,
    pub unit_price: u64,
    pub opening_qty: i64,
    pub low_stock_threshold: i64,
    pub user_id: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: MovementRecorded (non-sale; entry is born completed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRecorded {
    pub batch_id: BatchId,
    pub entry_id: EntryId,
    pub kind: MovementKind,
    pub quantity: i64,
    pub unit_price: u64,
    pub user_id: Option<UserId>,
    pub notes: Option<String>,
    pub from_location: Option<LocationId>,
    pub to_location: Option<LocationId>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SaleRequested (entry is born pending; stock is reserved now).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleRequested {
    pub batch_id: BatchId,
    pub entry_id: EntryId,
    pub quantity: i64,
    pub unit_price: u64,
    pub user_id: Option<UserId>,
    pub notes: Option<String>,
    pub from_location: Option<LocationId>,
    pub to_location: Option<LocationId>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SaleApproved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleApproved {
    pub batch_id: BatchId,
    pub entry_id: EntryId,
    /// Entry quantity, denormalized so consumers need no entry lookup.
    pub quantity: i64,
    pub user_id: Option<UserId>,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SaleDeclined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleDeclined {
    pub batch_id: BatchId,
    pub entry_id: EntryId,
    /// Entry quantity, denormalized so consumers need no entry lookup.
    pub quantity: i64,
    pub user_id: Option<UserId>,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: BatchRetired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRetired {
    pub batch_id: BatchId,
    pub user_id: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchEvent {
    BatchReceived(BatchReceived),
    MovementRecorded(MovementRecorded),
    SaleRequested(SaleRequested),
    SaleApproved(SaleApproved),
    SaleDeclined(SaleDeclined),
    BatchRetired(BatchRetired),
}

impl Event for BatchEvent {
    fn event_type(&self) -> &'static str {
        match self {
            BatchEvent::BatchReceived(_) => "pharmacy.batch.received",
            BatchEvent::MovementRecorded(_) => "pharmacy.batch.movement_recorded",
            BatchEvent::SaleRequested(_) => "pharmacy.batch.sale_requested",
            BatchEvent::SaleApproved(_) => "pharmacy.batch.sale_approved",
            BatchEvent::SaleDeclined(_) => "pharmacy.batch.sale_declined",
            BatchEvent::BatchRetired(_) => "pharmacy.batch.retired",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            BatchEvent::BatchReceived(e) => e.occurred_at,
            BatchEvent::MovementRecorded(e) => e.occurred_at,
            BatchEvent::SaleRequested(e) => e.occurred_at,
            BatchEvent::SaleApproved(e) => e.occurred_at,
            BatchEvent::SaleDeclined(e) => e.occurred_at,
            BatchEvent::BatchRetired(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Batch {
    type Command = BatchCommand;
    type Event = BatchEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            BatchEvent::BatchReceived(e) => {
                self.id = e.batch_id;
                self.drug_id = Some(e.drug_id);
                self.supplier_id = Some(e.supplier_id);
                self.manufactured_on = e.manufactured_on;
                self.expires_on = e.expires_on;
                self.purchased_on = e.purchased_on;
                self.unit_cost = e.unit_cost;
                self.unit_price = e.unit_price;
                self.on_hand = e.opening_qty;
                self.low_stock_threshold = e.low_stock_threshold;
                self.entries.clear();
                self.created = true;
                self.retired = false;
            }
            BatchEvent::MovementRecorded(e) => {
                self.on_hand += e.kind.signed(e.quantity);
                self.entries.push(LedgerEntry {
                    entry_id: e.entry_id,
                    kind: e.kind,
                    quantity: e.quantity,
                    unit_price: e.unit_price,
                    status: EntryStatus::Completed,
                    user_id: e.user_id,
                    notes: e.notes.clone(),
                    from_location: e.from_location,
                    to_location: e.to_location,
                    recorded_at: e.occurred_at,
                });
            }
            BatchEvent::SaleRequested(e) => {
                // Reservation: the debit lands with the pending entry.
                self.on_hand -= e.quantity;
                self.entries.push(LedgerEntry {
                    entry_id: e.entry_id,
                    kind: MovementKind::Sale,
                    quantity: e.quantity,
                    unit_price: e.unit_price,
                    status: EntryStatus::Pending,
                    user_id: e.user_id,
                    notes: e.notes.clone(),
                    from_location: e.from_location,
                    to_location: e.to_location,
                    recorded_at: e.occurred_at,
                });
            }
            BatchEvent::SaleApproved(e) => {
                if let Some(entry) = self.entries.iter_mut().find(|x| x.entry_id == e.entry_id) {
                    entry.status = EntryStatus::Approved;
                    entry.notes = concat_notes(entry.notes.take(), e.notes.as_deref());
                }
            }
            BatchEvent::SaleDeclined(e) => {
                if let Some(entry) = self.entries.iter_mut().find(|x| x.entry_id == e.entry_id) {
                    entry.status = EntryStatus::Declined;
                    entry.notes = concat_notes(entry.notes.take(), Some(&e.reason));
                    // Release the reservation made at request time.
                    self.on_hand += entry.quantity;
                }
            }
            BatchEvent::BatchRetired(_) => {
                self.retired = true;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            BatchCommand::ReceiveBatch(cmd) => self.handle_receive(cmd),
            BatchCommand::RecordMovement(cmd) => self.handle_record(cmd),
            BatchCommand::ApproveSale(cmd) => self.handle_approve(cmd),
            BatchCommand::DeclineSale(cmd) => self.handle_decline(cmd),
            BatchCommand::RetireBatch(cmd) => self.handle_retire(cmd),
        }
    }
}

fn concat_notes(existing: Option<String>, addition: Option<&str>) -> Option<String> {
    match (existing, addition) {
        (old, None) => old,
        (None, Some(new)) => Some(new.to_string()),
        (Some(old), Some(new)) => Some(format!("{old}\n{new}")),
    }
}

impl Batch {
    fn ensure_batch_id(&self, batch_id: BatchId) -> Result<(), DomainError> {
        if self.id != batch_id {
            return Err(DomainError::bad_request("batch_id mismatch"));
        }
        Ok(())
    }

    fn ensure_live(&self, batch_id: BatchId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_batch_id(batch_id)?;
        if self.retired {
            return Err(DomainError::conflict("batch is retired"));
        }
        Ok(())
    }

    fn handle_receive(&self, cmd: &ReceiveBatch) -> Result<Vec<BatchEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("batch already exists"));
        }
        if cmd.expires_on <= cmd.manufactured_on {
            return Err(DomainError::bad_request(
                "expiry date must be after manufacture date",
            ));
        }
        if cmd.opening_qty < 0 {
            return Err(DomainError::bad_request("opening quantity cannot be negative"));
        }
        if cmd.low_stock_threshold < 0 {
            return Err(DomainError::bad_request(
                "low stock threshold cannot be negative",
            ));
        }

        Ok(vec![BatchEvent::BatchReceived(BatchReceived {
            batch_id: cmd.batch_id,
            drug_id: cmd.drug_id,
            supplier_id: cmd.supplier_id,
            manufactured_on: cmd.manufactured_on,
            expires_on: cmd.expires_on,
            purchased_on: cmd.purchased_on,
            unit_cost: cmd.unit_cost,
            unit_price: cmd.unit_price,
            opening_qty: cmd.opening_qty,
            low_stock_threshold: cmd.low_stock_threshold,
            user_id: cmd.user_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_record(&self, cmd: &RecordMovement) -> Result<Vec<BatchEvent>, DomainError> {
        self.ensure_live(cmd.batch_id)?;

        if cmd.quantity <= 0 {
            return Err(DomainError::bad_request("quantity must be a positive integer"));
        }

        if self.entry(cmd.entry_id).is_some() {
            return Err(DomainError::conflict("ledger entry id already used"));
        }

        if cmd.kind.is_debit() && cmd.quantity > self.on_hand {
            return Err(DomainError::insufficient_stock(format!(
                "{} of {} requested, {} on hand",
                cmd.quantity, cmd.kind, self.on_hand
            )));
        }

        let event = match cmd.kind {
            MovementKind::Sale => BatchEvent::SaleRequested(SaleRequested {
                batch_id: cmd.batch_id,
                entry_id: cmd.entry_id,
                quantity: cmd.quantity,
                unit_price: self.unit_price,
                user_id: cmd.user_id,
                notes: cmd.notes.clone(),
                from_location: cmd.from_location,
                to_location: cmd.to_location,
                occurred_at: cmd.occurred_at,
            }),
            _ => BatchEvent::MovementRecorded(MovementRecorded {
                batch_id: cmd.batch_id,
                entry_id: cmd.entry_id,
                kind: cmd.kind,
                quantity: cmd.quantity,
                unit_price: self.unit_price,
                user_id: cmd.user_id,
                notes: cmd.notes.clone(),
                from_location: cmd.from_location,
                to_location: cmd.to_location,
                occurred_at: cmd.occurred_at,
            }),
        };

        Ok(vec![event])
    }

    fn handle_approve(&self, cmd: &ApproveSale) -> Result<Vec<BatchEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_batch_id(cmd.batch_id)?;

        let entry = self.entry(cmd.entry_id).ok_or(DomainError::NotFound)?;

        if entry.kind != MovementKind::Sale {
            return Err(DomainError::bad_request(format!(
                "entry is a {}, only sales can be approved",
                entry.kind
            )));
        }
        if entry.status != EntryStatus::Pending {
            return Err(DomainError::bad_request(format!(
                "sale entry is {}, only pending sales can be approved",
                entry.status
            )));
        }

        Ok(vec![BatchEvent::SaleApproved(SaleApproved {
            batch_id: cmd.batch_id,
            entry_id: cmd.entry_id,
            quantity: entry.quantity,
            user_id: cmd.user_id,
            notes: cmd.notes.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_decline(&self, cmd: &DeclineSale) -> Result<Vec<BatchEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_batch_id(cmd.batch_id)?;

        if cmd.reason.trim().is_empty() {
            return Err(DomainError::bad_request("a decline reason is required"));
        }

        let entry = self.entry(cmd.entry_id).ok_or(DomainError::NotFound)?;

        if entry.status != EntryStatus::Pending {
            return Err(DomainError::bad_request(format!(
                "sale entry is {}, only pending sales can be declined",
                entry.status
            )));
        }

        Ok(vec![BatchEvent::SaleDeclined(SaleDeclined {
            batch_id: cmd.batch_id,
            entry_id: cmd.entry_id,
            quantity: entry.quantity,
            user_id: cmd.user_id,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_retire(&self, cmd: &RetireBatch) -> Result<Vec<BatchEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_batch_id(cmd.batch_id)?;

        if self.retired {
            return Err(DomainError::conflict("batch is already retired"));
        }
        if !self.entries.is_empty() {
            return Err(DomainError::conflict(
                "batch has ledger entries and cannot be deleted",
            ));
        }

        Ok(vec![BatchEvent::BatchRetired(BatchRetired {
            batch_id: cmd.batch_id,
            user_id: cmd.user_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apotheca_events::execute;
    use proptest::prelude::*;

    fn test_batch_id() -> BatchId {
        BatchId::new(AggregateId::new())
    }

    fn test_user_id() -> UserId {
        UserId::new()
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn receive_cmd(batch_id: BatchId, opening_qty: i64, threshold: i64) -> ReceiveBatch {
        ReceiveBatch {
            batch_id,
            drug_id: DrugId::new(),
            supplier_id: SupplierId::new(),
            manufactured_on: date(2025, 1, 15),
            expires_on: date(2027, 1, 15),
            purchased_on: date(2025, 2, 1),
            unit_cost: 250,
            unit_price: 400,
            opening_qty,
            low_stock_threshold: threshold,
            user_id: Some(test_user_id()),
            occurred_at: test_time(),
        }
    }

    fn received_batch(opening_qty: i64, threshold: i64) -> Batch {
        let batch_id = test_batch_id();
        let mut batch = Batch::empty(batch_id);
        execute(
            &mut batch,
            &BatchCommand::ReceiveBatch(receive_cmd(batch_id, opening_qty, threshold)),
        )
        .unwrap();
        batch
    }

    fn movement_cmd(batch: &Batch, kind: MovementKind, quantity: i64) -> RecordMovement {
        RecordMovement {
            batch_id: batch.id_typed(),
            entry_id: EntryId::new(),
            kind,
            quantity,
            user_id: Some(test_user_id()),
            notes: None,
            from_location: None,
            to_location: None,
            occurred_at: test_time(),
        }
    }

    fn record(batch: &mut Batch, kind: MovementKind, quantity: i64) -> Result<EntryId, DomainError> {
        let cmd = movement_cmd(batch, kind, quantity);
        let entry_id = cmd.entry_id;
        execute(batch, &BatchCommand::RecordMovement(cmd))?;
        Ok(entry_id)
    }

    #[test]
    fn receive_batch_emits_batch_received_event() {
        let batch_id = test_batch_id();
        let batch = Batch::empty(batch_id);
        let cmd = receive_cmd(batch_id, 50, 10);

        let events = batch
            .handle(&BatchCommand::ReceiveBatch(cmd.clone()))
            .unwrap();
        assert_eq!(events.len(), 1);

        match &events[0] {
            BatchEvent::BatchReceived(e) => {
                assert_eq!(e.batch_id, batch_id);
                assert_eq!(e.opening_qty, 50);
                assert_eq!(e.low_stock_threshold, 10);
            }
            _ => panic!("Expected BatchReceived event"),
        }
    }

    #[test]
    fn expiry_on_or_before_manufacture_is_rejected() {
        let batch_id = test_batch_id();
        let batch = Batch::empty(batch_id);
        let mut cmd = receive_cmd(batch_id, 10, 5);
        cmd.expires_on = cmd.manufactured_on;

        let err = batch.handle(&BatchCommand::ReceiveBatch(cmd)).unwrap_err();
        match err {
            DomainError::BadRequest(msg) if msg.contains("expiry date") => {}
            _ => panic!("Expected BadRequest for expiry/manufacture ordering"),
        }
    }

    #[test]
    fn inbound_credits_stock_with_completed_entry() {
        let mut batch = received_batch(10, 3);
        let entry_id = record(&mut batch, MovementKind::Inbound, 15).unwrap();

        assert_eq!(batch.on_hand(), 25);
        let entry = batch.entry(entry_id).unwrap();
        assert_eq!(entry.status, EntryStatus::Completed);
        assert_eq!(entry.quantity, 15);
        assert_eq!(entry.unit_price, 400);
    }

    #[test]
    fn positive_return_is_a_credit_and_negative_return_a_debit() {
        let mut batch = received_batch(10, 3);

        record(&mut batch, MovementKind::ReturnIn, 4).unwrap();
        assert_eq!(batch.on_hand(), 14);

        record(&mut batch, MovementKind::ReturnOut, 6).unwrap();
        assert_eq!(batch.on_hand(), 8);
    }

    #[test]
    fn zero_or_negative_quantity_is_rejected() {
        let mut batch = received_batch(10, 3);

        for qty in [0, -5] {
            let err = record(&mut batch, MovementKind::Inbound, qty).unwrap_err();
            match err {
                DomainError::BadRequest(msg) if msg.contains("positive integer") => {}
                _ => panic!("Expected BadRequest for non-positive quantity"),
            }
        }
        assert_eq!(batch.on_hand(), 10);
        assert!(batch.entries().is_empty());
    }

    #[test]
    fn debit_exceeding_on_hand_is_rejected_without_partial_writes() {
        let mut batch = received_batch(5, 2);

        let err = record(&mut batch, MovementKind::ReturnOut, 10).unwrap_err();
        match err {
            DomainError::InsufficientStock(msg) if msg.contains("5 on hand") => {}
            _ => panic!("Expected InsufficientStock"),
        }

        // Batch and ledger unchanged.
        assert_eq!(batch.on_hand(), 5);
        assert!(batch.entries().is_empty());
    }

    #[test]
    fn debit_down_to_exactly_zero_is_allowed() {
        let mut batch = received_batch(5, 2);
        record(&mut batch, MovementKind::ReturnOut, 5).unwrap();
        assert_eq!(batch.on_hand(), 0);
    }

    #[test]
    fn sale_reserves_stock_with_a_pending_entry() {
        let mut batch = received_batch(50, 10);
        let entry_id = record(&mut batch, MovementKind::Sale, 45).unwrap();

        assert_eq!(batch.on_hand(), 5);
        let entry = batch.entry(entry_id).unwrap();
        assert_eq!(entry.kind, MovementKind::Sale);
        assert_eq!(entry.status, EntryStatus::Pending);
    }

    #[test]
    fn sale_exceeding_on_hand_is_rejected_at_request_time() {
        let mut batch = received_batch(5, 2);
        let err = record(&mut batch, MovementKind::Sale, 6).unwrap_err();
        assert!(matches!(err, DomainError::InsufficientStock(_)));
        assert_eq!(batch.on_hand(), 5);
    }

    #[test]
    fn approve_pending_sale_changes_status_but_not_stock() {
        let mut batch = received_batch(20, 5);
        let entry_id = record(&mut batch, MovementKind::Sale, 8).unwrap();
        assert_eq!(batch.on_hand(), 12);

        let batch_id = batch.id_typed();
        execute(
            &mut batch,
            &BatchCommand::ApproveSale(ApproveSale {
                batch_id,
                entry_id,
                user_id: Some(test_user_id()),
                notes: Some("counter pickup".to_string()),
                occurred_at: test_time(),
            }),
        )
        .unwrap();

        assert_eq!(batch.on_hand(), 12);
        let entry = batch.entry(entry_id).unwrap();
        assert_eq!(entry.status, EntryStatus::Approved);
        assert_eq!(entry.notes.as_deref(), Some("counter pickup"));
    }

    #[test]
    fn approving_twice_is_rejected_and_stock_changes_at_most_once() {
        let mut batch = received_batch(20, 5);
        let entry_id = record(&mut batch, MovementKind::Sale, 8).unwrap();

        let approve = BatchCommand::ApproveSale(ApproveSale {
            batch_id: batch.id_typed(),
            entry_id,
            user_id: Some(test_user_id()),
            notes: None,
            occurred_at: test_time(),
        });

        execute(&mut batch, &approve).unwrap();
        let err = batch.handle(&approve).unwrap_err();
        match err {
            DomainError::BadRequest(msg) if msg.contains("approved") => {}
            _ => panic!("Expected BadRequest naming the current status"),
        }
        assert_eq!(batch.on_hand(), 12);
    }

    #[test]
    fn decline_restores_exact_presale_quantity() {
        let mut batch = received_batch(50, 10);
        let entry_id = record(&mut batch, MovementKind::Sale, 45).unwrap();
        assert_eq!(batch.on_hand(), 5);

        let batch_id = batch.id_typed();
        execute(
            &mut batch,
            &BatchCommand::DeclineSale(DeclineSale {
                batch_id,
                entry_id,
                user_id: Some(test_user_id()),
                reason: "customer cancelled".to_string(),
                occurred_at: test_time(),
            }),
        )
        .unwrap();

        assert_eq!(batch.on_hand(), 50);
        let entry = batch.entry(entry_id).unwrap();
        assert_eq!(entry.status, EntryStatus::Declined);
        assert_eq!(entry.notes.as_deref(), Some("customer cancelled"));
    }

    #[test]
    fn decline_appends_reason_to_existing_notes() {
        let mut batch = received_batch(20, 5);
        let cmd = RecordMovement {
            notes: Some("phone order".to_string()),
            ..movement_cmd(&batch, MovementKind::Sale, 3)
        };
        let entry_id = cmd.entry_id;
        execute(&mut batch, &BatchCommand::RecordMovement(cmd)).unwrap();

        let batch_id = batch.id_typed();
        execute(
            &mut batch,
            &BatchCommand::DeclineSale(DeclineSale {
                batch_id,
                entry_id,
                user_id: None,
                reason: "out of delivery area".to_string(),
                occurred_at: test_time(),
            }),
        )
        .unwrap();

        let entry = batch.entry(entry_id).unwrap();
        assert_eq!(
            entry.notes.as_deref(),
            Some("phone order\nout of delivery area")
        );
    }

    #[test]
    fn decline_requires_a_reason() {
        let mut batch = received_batch(20, 5);
        let entry_id = record(&mut batch, MovementKind::Sale, 3).unwrap();

        let err = batch
            .handle(&BatchCommand::DeclineSale(DeclineSale {
                batch_id: batch.id_typed(),
                entry_id,
                user_id: None,
                reason: "  ".to_string(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        match err {
            DomainError::BadRequest(msg) if msg.contains("reason") => {}
            _ => panic!("Expected BadRequest for missing reason"),
        }
    }

    #[test]
    fn declining_a_declined_sale_is_rejected_without_double_credit() {
        let mut batch = received_batch(20, 5);
        let entry_id = record(&mut batch, MovementKind::Sale, 8).unwrap();

        let decline = BatchCommand::DeclineSale(DeclineSale {
            batch_id: batch.id_typed(),
            entry_id,
            user_id: None,
            reason: "duplicate request".to_string(),
            occurred_at: test_time(),
        });

        execute(&mut batch, &decline).unwrap();
        assert_eq!(batch.on_hand(), 20);

        let err = batch.handle(&decline).unwrap_err();
        assert!(matches!(err, DomainError::BadRequest(_)));
        assert_eq!(batch.on_hand(), 20);
    }

    #[test]
    fn approving_a_non_sale_entry_is_rejected() {
        let mut batch = received_batch(20, 5);
        let entry_id = record(&mut batch, MovementKind::Inbound, 5).unwrap();

        let err = batch
            .handle(&BatchCommand::ApproveSale(ApproveSale {
                batch_id: batch.id_typed(),
                entry_id,
                user_id: None,
                notes: None,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        match err {
            DomainError::BadRequest(msg) if msg.contains("only sales") => {}
            _ => panic!("Expected BadRequest for non-sale entry"),
        }
    }

    #[test]
    fn approving_an_unknown_entry_is_not_found() {
        let batch = received_batch(20, 5);
        let err = batch
            .handle(&BatchCommand::ApproveSale(ApproveSale {
                batch_id: batch.id_typed(),
                entry_id: EntryId::new(),
                user_id: None,
                notes: None,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert_eq!(err, DomainError::NotFound);
    }

    #[test]
    fn retire_with_ledger_entries_is_a_conflict() {
        let mut batch = received_batch(20, 5);
        record(&mut batch, MovementKind::Inbound, 5).unwrap();

        let err = batch
            .handle(&BatchCommand::RetireBatch(RetireBatch {
                batch_id: batch.id_typed(),
                user_id: None,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        match err {
            DomainError::Conflict(msg) if msg.contains("ledger entries") => {}
            _ => panic!("Expected Conflict for batch with entries"),
        }
    }

    #[test]
    fn retire_without_entries_succeeds_and_blocks_further_movements() {
        let mut batch = received_batch(20, 5);
        let batch_id = batch.id_typed();
        execute(
            &mut batch,
            &BatchCommand::RetireBatch(RetireBatch {
                batch_id,
                user_id: None,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert!(batch.is_retired());

        let err = record(&mut batch, MovementKind::Inbound, 1).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn sale_return_inbound_sequence() {
        // Batch at 50, threshold 10.
        let mut batch = received_batch(50, 10);

        // Sale of 45 → 5 on hand.
        record(&mut batch, MovementKind::Sale, 45).unwrap();
        assert_eq!(batch.on_hand(), 5);

        // Negative return of 10 on a balance of 5 must fail.
        let err = record(&mut batch, MovementKind::ReturnOut, 10).unwrap_err();
        assert!(matches!(err, DomainError::InsufficientStock(_)));
        assert_eq!(batch.on_hand(), 5);

        // Negative return of 5 (down to exactly 0) is fine.
        record(&mut batch, MovementKind::ReturnOut, 5).unwrap();
        assert_eq!(batch.on_hand(), 0);

        // Inbound of 20 → 20 on hand.
        record(&mut batch, MovementKind::Inbound, 20).unwrap();
        assert_eq!(batch.on_hand(), 20);
    }

    #[test]
    fn version_increments_on_apply() {
        let batch_id = test_batch_id();
        let mut batch = Batch::empty(batch_id);
        assert_eq!(batch.version(), 0);

        execute(
            &mut batch,
            &BatchCommand::ReceiveBatch(receive_cmd(batch_id, 10, 2)),
        )
        .unwrap();
        assert_eq!(batch.version(), 1);

        record(&mut batch, MovementKind::Inbound, 1).unwrap();
        assert_eq!(batch.version(), 2);
    }

    #[test]
    fn handle_does_not_mutate_state() {
        let mut batch = received_batch(10, 2);
        let cmd = BatchCommand::RecordMovement(movement_cmd(&batch, MovementKind::Sale, 4));

        let before_version = batch.version();
        let before_on_hand = batch.on_hand();
        let before_entries = batch.entries().len();

        let events1 = batch.handle(&cmd).unwrap();
        let events2 = batch.handle(&cmd).unwrap();

        assert_eq!(batch.version(), before_version);
        assert_eq!(batch.on_hand(), before_on_hand);
        assert_eq!(batch.entries().len(), before_entries);
        assert_eq!(events1, events2);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: whatever sequence of movements is attempted, accepted or
        /// rejected, `on_hand` never goes negative.
        #[test]
        fn on_hand_never_negative(
            opening in 0i64..100,
            ops in prop::collection::vec((0u8..4, 1i64..150), 1..40)
        ) {
            let mut batch = received_batch(opening, 10);

            for (kind_idx, qty) in ops {
                let kind = match kind_idx {
                    0 => MovementKind::Inbound,
                    1 => MovementKind::Sale,
                    2 => MovementKind::ReturnIn,
                    _ => MovementKind::ReturnOut,
                };
                // Rejected commands must leave state unchanged.
                let before = batch.clone();
                if record(&mut batch, kind, qty).is_err() {
                    prop_assert_eq!(&before, &batch);
                }
                prop_assert!(batch.on_hand() >= 0);
            }
        }

        /// Property: requesting then declining a sale is a quantity round-trip.
        #[test]
        fn decline_round_trips_quantity(
            opening in 1i64..200,
            sale_qty in 1i64..200
        ) {
            prop_assume!(sale_qty <= opening);
            let mut batch = received_batch(opening, 10);

            let entry_id = record(&mut batch, MovementKind::Sale, sale_qty).unwrap();
            prop_assert_eq!(batch.on_hand(), opening - sale_qty);

            let batch_id = batch.id_typed();
            execute(&mut batch, &BatchCommand::DeclineSale(DeclineSale {
                batch_id,
                entry_id,
                user_id: None,
                reason: "round trip".to_string(),
                occurred_at: test_time(),
            })).unwrap();

            prop_assert_eq!(batch.on_hand(), opening);
        }
    }
}
