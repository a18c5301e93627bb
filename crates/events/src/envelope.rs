use serde::{Deserialize, Serialize};
use uuid::Uuid;

use refundgate_core::AggregateId;

/// One committed event plus the stream metadata the store assigned to it.
///
/// This is what travels over the bus after an append commits. Consumers route
/// on `aggregate_type`, dedupe on `(aggregate_id, sequence_number)`, and
/// deserialize `payload` against the event enum of the stream they follow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    /// Globally unique id of this event record.
    event_id: Uuid,

    /// Stream coordinates: which aggregate, and where in its history.
    /// `sequence_number` starts at 1 and doubles as the aggregate version
    /// once the event applies.
    aggregate_id: AggregateId,
    aggregate_type: String,
    sequence_number: u64,

    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(
        event_id: Uuid,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        sequence_number: u64,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            sequence_number,
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn aggregate_id(&self) -> AggregateId {
        self.aggregate_id
    }

    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    /// Position in the aggregate stream, 1-based and gapless.
    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }
}
