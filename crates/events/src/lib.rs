//! `refundgate-events` — domain-agnostic event plumbing.
//!
//! The refund workflow is event-sourced: transitions append immutable events,
//! and everything downstream (read models, notifications) consumes them. This
//! crate holds the pieces that do not know anything about refunds: the event
//! contract, the stream envelope, and the pub/sub bus.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
