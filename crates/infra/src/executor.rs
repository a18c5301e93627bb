//! Command execution pipeline.
//!
//! Every state change in the system flows through [`CommandExecutor::execute`]:
//!
//! ```text
//! Command
//!   ↓
//! 1. Load events from the store
//!   ↓
//! 2. Check the caller's expected version (stale-write fencing)
//!   ↓
//! 3. Rehydrate the aggregate (fold historical events)
//!   ↓
//! 4. Handle the command (pure decision logic, produces events)
//!   ↓
//! 5. Append to the store (optimistic concurrency re-checked)
//!   ↓
//! 6. Publish committed events to the bus
//! ```
//!
//! Events are persisted before publication: if the append fails nothing is
//! published, and a publish failure after a successful append is reported as
//! `ExecutorError::Publish` while the events stay durable (at-least-once
//! delivery; downstream consumers must be idempotent).

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use refundgate_core::{Aggregate, AggregateId, DomainError, ExpectedVersion};
use refundgate_events::{EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// Malformed or rejected input (deterministic).
    #[error("validation failed: {0}")]
    Validation(String),
    /// The workflow does not allow this action from the current state.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),
    /// Optimistic concurrency failure (stale expected version).
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("not found")]
    NotFound,
    /// The aggregate is parked in its exception state.
    #[error("exception state: {0}")]
    ExceptionState(String),
    /// An external settlement call failed.
    #[error("gateway failure: {0}")]
    GatewayFailure(String),
    /// Historical event payloads could not be decoded.
    #[error("event deserialization failed: {0}")]
    Deserialize(String),
    #[error("event store error: {0}")]
    Store(#[from] EventStoreError),
    /// Publication failed after a successful append.
    #[error("event publication failed: {0}")]
    Publish(String),
}

impl From<DomainError> for ExecutorError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => ExecutorError::Validation(msg),
            DomainError::InvalidTransition(msg) => ExecutorError::InvalidTransition(msg),
            DomainError::InvalidId(msg) => ExecutorError::Validation(msg),
            DomainError::Conflict(msg) => ExecutorError::Conflict(msg),
            DomainError::NotFound => ExecutorError::NotFound,
            DomainError::GatewayFailure(msg) => ExecutorError::GatewayFailure(msg),
            DomainError::ExceptionState(msg) => ExecutorError::ExceptionState(msg),
        }
    }
}

/// Result of a successful command execution.
#[derive(Debug)]
pub struct ExecutionOutcome<A> {
    /// The aggregate after the new events were applied.
    pub aggregate: A,
    /// The committed events, with assigned sequence numbers.
    pub committed: Vec<StoredEvent>,
}

/// Reusable command execution engine for event-sourced aggregates.
///
/// Generic over the store and bus so tests can run fully in memory while
/// deployments use Postgres, without touching domain code.
#[derive(Debug)]
pub struct CommandExecutor<S, B> {
    store: S,
    bus: B,
}

impl<S, B> CommandExecutor<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }
}

impl<S, B> CommandExecutor<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Execute a command through the full pipeline.
    ///
    /// `expected_version` is the caller's view of the aggregate version (for
    /// HTTP callers, the `If-Match` header). `None` skips the caller-side
    /// check; the store-side optimistic check still applies, pinned to the
    /// version observed during rehydration, so two racing writers can never
    /// both commit.
    pub async fn execute<A>(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: &A::Command,
        expected_version: Option<u64>,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<ExecutionOutcome<A>, ExecutorError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: refundgate_events::Event + Serialize + DeserializeOwned,
    {
        // 1) Load history
        let history = self.store.load_stream(aggregate_id).await?;
        validate_loaded_stream(aggregate_id, &history)?;
        let current = stream_version(&history);

        // 2) Fence stale writers before doing any work
        if let Some(expected) = expected_version {
            if expected != current {
                return Err(ExecutorError::Conflict(format!(
                    "expected version {expected}, found {current}"
                )));
            }
        }

        // 3) Rehydrate
        let mut aggregate = make_aggregate(aggregate_id);
        apply_history::<A>(&mut aggregate, history)?;

        // 4) Decide (no mutation)
        let decided = aggregate.handle(command).map_err(ExecutorError::from)?;
        if decided.is_empty() {
            return Ok(ExecutionOutcome {
                aggregate,
                committed: vec![],
            });
        }

        // 5) Persist, re-checking the version observed at load time
        let uncommitted = decided
            .iter()
            .map(|ev| {
                UncommittedEvent::from_typed(aggregate_id, aggregate_type, Uuid::now_v7(), ev)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let committed = self
            .store
            .append(uncommitted, ExpectedVersion::Exact(current))
            .await?;

        for event in &decided {
            aggregate.apply(event);
        }

        // 6) Publish committed events (after append)
        for stored in &committed {
            self.bus
                .publish(stored.to_envelope())
                .map_err(|e| ExecutorError::Publish(e.to_string()))?;
        }

        Ok(ExecutionOutcome {
            aggregate,
            committed,
        })
    }

    /// Load and fold an aggregate without executing a command.
    pub async fn rehydrate<A>(
        &self,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<A, ExecutorError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        let history = self.store.load_stream(aggregate_id).await?;
        validate_loaded_stream(aggregate_id, &history)?;

        let mut aggregate = make_aggregate(aggregate_id);
        apply_history::<A>(&mut aggregate, history)?;
        Ok(aggregate)
    }
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

fn validate_loaded_stream(
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> Result<(), ExecutorError> {
    // A loaded stream must belong to this aggregate and carry strictly
    // increasing sequence numbers.
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.aggregate_id != aggregate_id {
            return Err(ExecutorError::Store(EventStoreError::InvalidAppend(
                format!("loaded stream contains wrong aggregate_id at index {idx}"),
            )));
        }
        if e.sequence_number <= last {
            return Err(ExecutorError::Store(EventStoreError::InvalidAppend(
                format!(
                    "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                    e.sequence_number
                ),
            )));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: Vec<StoredEvent>) -> Result<(), ExecutorError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    for stored in history {
        let ev: A::Event = serde_json::from_value(stored.payload)
            .map_err(|e| ExecutorError::Deserialize(e.to_string()))?;
        aggregate.apply(&ev);
    }
    Ok(())
}
