//! HTTP surface of the refund workflow engine.
//!
//! Handlers stay thin: they parse the wire format, resolve the acting
//! identity, call [`refundgate_infra::service::RefundService`], and map
//! failures onto the JSON error contract. No workflow rule lives here.

pub mod app;
pub mod context;
pub mod middleware;
