//! Infrastructure layer: event store, dispatch, read models, service wiring.

pub mod command_dispatcher;
pub mod config;
pub mod event_store;
pub mod expiry_worker;
pub mod projections;
pub mod read_model;
pub mod stock_service;


pub use command_dispatcher::{CommandDispatcher, DispatchError};
pub use config::StockConfig;
pub use event_store::{
    EventStore, EventStoreError, InMemoryEventStore, PostgresEventStore, StoredEvent,
    UncommittedEvent,
};
pub use expiry_worker::{ExpiryScanWorker, ExpiryScanWorkerConfig, ExpiryScanWorkerHandle};
pub use stock_service::{
    NewBatch, NoExternalReferences, ReferenceGuard, StockService, StockServiceError,
};
