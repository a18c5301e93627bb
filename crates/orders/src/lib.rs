//! `refundgate-orders` — boundary types for the external order store.
//!
//! The refund engine consumes orders, it does not own them. This crate models
//! just enough of an order to validate a refund request (which line is being
//! returned, at what captured price) plus the lookup port the workflow calls.

pub mod directory;
pub mod order;

pub use directory::{InMemoryOrderDirectory, OrderDirectory};
pub use order::{Order, OrderLine};
