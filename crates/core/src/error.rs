//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// illegal transitions, conflicts). Infrastructure concerns belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed or missing input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An action was requested from a state that does not permit it.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested resource was not found (domain-level).
    #[error("not found")]
    NotFound,

    /// A conflict occurred (e.g. stale version / optimistic concurrency).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The settlement gateway failed after retries were exhausted.
    #[error("settlement gateway failure: {0}")]
    GatewayFailure(String),

    /// The aggregate is parked in its exception state and only accepts an
    /// explicit operator resolution.
    #[error("exception state: {0}")]
    ExceptionState(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_transition(msg: impl Into<String>) -> Self {
        Self::InvalidTransition(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }

    pub fn gateway_failure(msg: impl Into<String>) -> Self {
        Self::GatewayFailure(msg.into())
    }

    pub fn exception_state(msg: impl Into<String>) -> Self {
        Self::ExceptionState(msg.into())
    }
}
