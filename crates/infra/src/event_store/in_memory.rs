use std::collections::HashMap;
use std::sync::RwLock;

use refundgate_core::{AggregateId, ExpectedVersion};

use super::r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

/// Event store backed by a map of per-aggregate vectors.
///
/// The default store for tests and single-node dev runs. Everything the
/// Postgres store enforces transactionally is enforced here under one write
/// lock: batches stay within one stream, versions are fenced, sequence
/// numbers are assigned gaplessly.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    streams: RwLock<HashMap<AggregateId, Vec<StoredEvent>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn version_of(stream: &[StoredEvent]) -> u64 {
        stream.last().map_or(0, |event| event.sequence_number)
    }
}

/// A batch must describe one aggregate; reject it before touching state.
fn batch_stream(events: &[UncommittedEvent]) -> Result<(AggregateId, &str), EventStoreError> {
    let aggregate_id = events[0].aggregate_id;
    let aggregate_type = events[0].aggregate_type.as_str();

    for (index, event) in events.iter().enumerate() {
        if event.aggregate_id != aggregate_id {
            return Err(EventStoreError::InvalidAppend(format!(
                "batch mixes aggregate ids (first mismatch at index {index})"
            )));
        }
        if event.aggregate_type != aggregate_type {
            return Err(EventStoreError::AggregateTypeMismatch(format!(
                "batch mixes aggregate types (first mismatch at index {index})"
            )));
        }
    }

    Ok((aggregate_id, aggregate_type))
}

#[async_trait::async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        if events.is_empty() {
            return Ok(vec![]);
        }
        let (aggregate_id, aggregate_type) = batch_stream(&events)?;
        let aggregate_type = aggregate_type.to_string();

        let mut streams = self
            .streams
            .write()
            .map_err(|_| EventStoreError::Storage("lock poisoned".to_string()))?;

        let stream = streams.entry(aggregate_id).or_default();
        let current = Self::version_of(stream);

        if !expected_version.matches(current) {
            return Err(EventStoreError::Concurrency(format!(
                "expected {expected_version:?}, found {current}"
            )));
        }

        // A stream keeps the aggregate type of its first event forever.
        if let Some(first) = stream.first() {
            if first.aggregate_type != aggregate_type {
                return Err(EventStoreError::AggregateTypeMismatch(format!(
                    "stream aggregate_type is '{}', attempted append with '{aggregate_type}'",
                    first.aggregate_type
                )));
            }
        }

        let committed: Vec<StoredEvent> = events
            .into_iter()
            .zip(current + 1..)
            .map(|(event, sequence_number)| StoredEvent {
                event_id: event.event_id,
                aggregate_id: event.aggregate_id,
                aggregate_type: event.aggregate_type,
                sequence_number,
                event_type: event.event_type,
                event_version: event.event_version,
                occurred_at: event.occurred_at,
                payload: event.payload,
            })
            .collect();

        stream.extend(committed.iter().cloned());
        Ok(committed)
    }

    async fn load_stream(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let streams = self
            .streams
            .read()
            .map_err(|_| EventStoreError::Storage("lock poisoned".to_string()))?;

        Ok(streams.get(&aggregate_id).cloned().unwrap_or_default())
    }

    async fn load_all(&self) -> Result<Vec<StoredEvent>, EventStoreError> {
        let streams = self
            .streams
            .read()
            .map_err(|_| EventStoreError::Storage("lock poisoned".to_string()))?;

        let mut all: Vec<StoredEvent> = streams.values().flatten().cloned().collect();
        all.sort_by_key(|event| (*event.aggregate_id.as_uuid(), event.sequence_number));
        Ok(all)
    }
}
