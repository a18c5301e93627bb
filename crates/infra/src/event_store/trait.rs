use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use refundgate_core::{AggregateId, ExpectedVersion};
use std::sync::Arc;

/// An event ready to be appended to a stream (not yet assigned a sequence number).
///
/// Events move through this lifecycle:
///
/// 1. **Domain event**: produced by an aggregate's `handle()` method
/// 2. **UncommittedEvent**: wrapped with stream metadata, payload serialized
/// 3. **StoredEvent**: persisted with an assigned sequence_number
/// 4. **EventEnvelope**: published to the event bus for consumers
///
/// Use [`UncommittedEvent::from_typed`] to build one from a typed domain event;
/// it serializes the payload and captures the event metadata needed to
/// deserialize it again later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncommittedEvent {
    pub event_id: Uuid,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

impl UncommittedEvent {
    /// Build an uncommitted event from a typed domain event.
    ///
    /// Serializes the payload and captures the metadata (`event_type`,
    /// `event_version`, `occurred_at`) needed to deserialize it again later,
    /// which keeps this crate decoupled from the domain event enums.
    pub fn from_typed<E>(
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        event_id: Uuid,
        event: &E,
    ) -> Result<Self, EventStoreError>
    where
        E: refundgate_events::Event + Serialize,
    {
        let payload = serde_json::to_value(event).map_err(|e| {
            EventStoreError::InvalidAppend(format!("payload serialization failed: {e}"))
        })?;

        Ok(Self {
            event_id,
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            event_type: event.event_type().to_string(),
            event_version: event.version(),
            occurred_at: event.occurred_at(),
            payload,
        })
    }
}

/// An event persisted in an append-only stream.
///
/// Sequence numbers are assigned by the store during append. They are
/// stream-scoped, start at 1, increase by exactly one per event, and never
/// change once assigned. They drive replay ordering, optimistic concurrency
/// checks, and projection idempotency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub event_id: Uuid,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,

    /// Monotonically increasing position in the aggregate stream.
    pub sequence_number: u64,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

impl StoredEvent {
    pub fn stream_version(&self) -> u64 {
        self.sequence_number
    }

    /// Convert a stored event into an event envelope for publication.
    pub fn to_envelope(&self) -> refundgate_events::EventEnvelope<JsonValue> {
        refundgate_events::EventEnvelope::new(
            self.event_id,
            self.aggregate_id,
            self.aggregate_type.clone(),
            self.sequence_number,
            self.payload.clone(),
        )
    }
}

/// Event store operation error.
///
/// These are infrastructure errors (storage, concurrency), as opposed to the
/// domain errors an aggregate returns from `handle()`.
#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("aggregate type mismatch: {0}")]
    AggregateTypeMismatch(String),

    #[error("invalid append: {0}")]
    InvalidAppend(String),

    #[error("storage failure: {0}")]
    Storage(String),
}

/// Append-only event store.
///
/// Events are organized into streams, one stream per aggregate instance,
/// keyed by `AggregateId`. Within a stream, sequence numbers are
/// monotonically increasing with no gaps.
///
/// Implementations must:
/// - enforce optimistic concurrency via `ExpectedVersion` before append
/// - assign sequence numbers starting at `current_version + 1`
/// - persist a batch atomically (all events or none)
/// - never modify or delete stored events
#[async_trait::async_trait]
pub trait EventStore: Send + Sync {
    /// Append events to an aggregate stream (append-only).
    async fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Load the full stream for an aggregate, in sequence number order.
    ///
    /// Returns an empty vector if the stream does not exist yet.
    async fn load_stream(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Load every stored event across all streams, ordered by aggregate and
    /// then sequence number. Used to rebuild projections from scratch.
    async fn load_all(&self) -> Result<Vec<StoredEvent>, EventStoreError>;
}

#[async_trait::async_trait]
impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    async fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).append(events, expected_version).await
    }

    async fn load_stream(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).load_stream(aggregate_id).await
    }

    async fn load_all(&self) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).load_all().await
    }
}
