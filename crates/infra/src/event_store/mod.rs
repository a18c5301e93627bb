//! Append-only event store boundary.
//!
//! Defines the storage abstraction for refund event streams plus the two
//! backends: an in-memory store for tests/dev and a Postgres store for
//! durable deployments.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
