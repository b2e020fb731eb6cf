//! `apotheca-events` — event abstractions and transport.
//!
//! Typed domain events, the envelope they are persisted in, and the pub/sub
//! bus they are distributed over after a successful append.

pub mod bus;
pub mod command;
pub mod envelope;
pub mod event;
pub mod handler;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use command::Command;
pub use envelope::EventEnvelope;
pub use event::Event;
pub use handler::execute;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
