//! Infrastructure layer: event store, command execution, projections,
//! settlement gateway, notifications.
//!
//! Domain crates stay pure; everything that touches a database, a payment
//! provider, a clock, or the bus lives here.

pub mod event_store;
pub mod executor;
pub mod notify;
pub mod projections;
pub mod read_model;
pub mod service;
pub mod settlement;
