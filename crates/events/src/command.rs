use apotheca_core::AggregateId;

/// A command targets a specific aggregate (command abstraction).
///
/// Commands represent **intent** - a request to perform an action on an
/// aggregate (e.g. "record a sale of 5 units against this batch"). They are
/// transient (not persisted) and are transformed into events (which are).
///
/// Commands are rejected if invalid; events represent accepted changes.
///
/// `target_aggregate_id()` lets infrastructure route a command to the
/// correct batch stream, which is also the transaction boundary: each
/// command operates on exactly one aggregate, so commands against different
/// batches can be processed concurrently.
pub trait Command: Clone + core::fmt::Debug + Send + Sync + 'static {
    fn target_aggregate_id(&self) -> AggregateId;
}
