//! Projection implementations (read model builders).
//!
//! Projections consume domain events and build query-optimized read models.
//! All projections are:
//! - **Rebuildable**: Can be reconstructed from the event stream
//! - **Idempotent**: Safe for at-least-once delivery, tracked by a
//!   per-aggregate sequence cursor

pub mod refunds;

pub use refunds::{RefundProjectionError, RefundStats, RefundView, RefundsProjection};
