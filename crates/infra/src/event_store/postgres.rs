//! Postgres-backed event store.
//!
//! Persists refund event streams in an append-only table with optimistic
//! concurrency enforced at the database level.
//!
//! ## Error Mapping
//!
//! | PostgreSQL error code | `EventStoreError` | Scenario |
//! |-----------------------|-------------------|----------|
//! | `23505` (unique violation) | `Concurrency` | Concurrent append hit the `(aggregate_id, sequence_number)` constraint |
//! | `23514` (check violation)  | `InvalidAppend` | Invalid data (e.g. sequence_number <= 0) |
//! | other database errors      | `Storage` | Connectivity, pool, unexpected failures |

use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::sync::Arc;
use tracing::instrument;

use refundgate_core::{AggregateId, ExpectedVersion};

use super::r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS refund_events (
    event_id        UUID PRIMARY KEY,
    aggregate_id    UUID NOT NULL,
    aggregate_type  TEXT NOT NULL,
    sequence_number BIGINT NOT NULL CHECK (sequence_number > 0),
    event_type      TEXT NOT NULL,
    event_version   INT NOT NULL,
    occurred_at     TIMESTAMPTZ NOT NULL,
    payload         JSONB NOT NULL,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    UNIQUE (aggregate_id, sequence_number)
)
"#;

/// Postgres-backed append-only event store.
///
/// The `append` path runs inside a transaction: read the current stream
/// version, validate it against `ExpectedVersion`, insert the new rows. A
/// concurrent append between the read and the insert trips the unique
/// constraint on `(aggregate_id, sequence_number)` and surfaces as a
/// `Concurrency` error, so losers of a race never overwrite history.
#[derive(Debug, Clone)]
pub struct PostgresEventStore {
    pool: Arc<PgPool>,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Connect to the database and make sure the events table exists.
    pub async fn connect(database_url: &str) -> Result<Self, EventStoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await
            .map_err(|e| EventStoreError::Storage(format!("connect failed: {e}")))?;

        let store = Self::new(pool);
        store.ensure_schema().await?;
        Ok(store)
    }

    pub async fn ensure_schema(&self) -> Result<(), EventStoreError> {
        sqlx::query(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    #[instrument(skip(self, events), fields(aggregate_id = %aggregate_id.as_uuid(), event_count = events.len()), err)]
    async fn append_events(
        &self,
        aggregate_id: AggregateId,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let aggregate_type = events[0].aggregate_type.clone();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let (current_version, existing_type) =
            check_stream_version(&mut tx, aggregate_id).await?;

        if let Some(ref existing) = existing_type {
            if existing != &aggregate_type {
                return Err(EventStoreError::AggregateTypeMismatch(format!(
                    "stream aggregate_type is '{existing}', attempted append with '{aggregate_type}'"
                )));
            }
        }

        if !expected_version.matches(current_version) {
            return Err(EventStoreError::Concurrency(format!(
                "expected {expected_version:?}, found {current_version}"
            )));
        }

        let mut stored_events = Vec::with_capacity(events.len());
        let mut next_sequence = current_version + 1;

        for event in events {
            sqlx::query(
                r#"
                INSERT INTO refund_events (
                    event_id,
                    aggregate_id,
                    aggregate_type,
                    sequence_number,
                    event_type,
                    event_version,
                    occurred_at,
                    payload
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(event.event_id)
            .bind(aggregate_id.as_uuid())
            .bind(&aggregate_type)
            .bind(next_sequence as i64)
            .bind(&event.event_type)
            .bind(event.event_version as i32)
            .bind(event.occurred_at)
            .bind(&event.payload)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    EventStoreError::Concurrency(format!(
                        "concurrent append detected: sequence_number {next_sequence} already exists"
                    ))
                } else {
                    map_sqlx_error("insert_event", e)
                }
            })?;

            stored_events.push(StoredEvent {
                event_id: event.event_id,
                aggregate_id: event.aggregate_id,
                aggregate_type: event.aggregate_type,
                sequence_number: next_sequence,
                event_type: event.event_type,
                event_version: event.event_version,
                occurred_at: event.occurred_at,
                payload: event.payload,
            });
            next_sequence += 1;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(stored_events)
    }
}

#[async_trait::async_trait]
impl EventStore for PostgresEventStore {
    async fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        if events.is_empty() {
            return Ok(vec![]);
        }

        let aggregate_id = events[0].aggregate_id;
        for (idx, e) in events.iter().enumerate() {
            if e.aggregate_id != aggregate_id {
                return Err(EventStoreError::InvalidAppend(format!(
                    "batch contains multiple aggregate_ids (index {idx})"
                )));
            }
        }

        self.append_events(aggregate_id, events, expected_version)
            .await
    }

    #[instrument(skip(self), fields(aggregate_id = %aggregate_id.as_uuid()), err)]
    async fn load_stream(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                event_id,
                aggregate_id,
                aggregate_type,
                sequence_number,
                event_type,
                event_version,
                occurred_at,
                payload
            FROM refund_events
            WHERE aggregate_id = $1
            ORDER BY sequence_number ASC
            "#,
        )
        .bind(aggregate_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_stream", e))?;

        rows.iter().map(row_to_stored_event).collect()
    }

    async fn load_all(&self) -> Result<Vec<StoredEvent>, EventStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                event_id,
                aggregate_id,
                aggregate_type,
                sequence_number,
                event_type,
                event_version,
                occurred_at,
                payload
            FROM refund_events
            ORDER BY aggregate_id ASC, sequence_number ASC
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_all", e))?;

        rows.iter().map(row_to_stored_event).collect()
    }
}

async fn check_stream_version(
    tx: &mut Transaction<'_, Postgres>,
    aggregate_id: AggregateId,
) -> Result<(u64, Option<String>), EventStoreError> {
    let row = sqlx::query(
        r#"
        SELECT
            COALESCE(MAX(sequence_number), 0) AS current_version,
            MAX(aggregate_type) AS aggregate_type
        FROM refund_events
        WHERE aggregate_id = $1
        "#,
    )
    .bind(aggregate_id.as_uuid())
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("check_stream_version", e))?;

    let current_version: Option<i64> = row
        .try_get("current_version")
        .map_err(|e| EventStoreError::Storage(format!("failed to read current_version: {e}")))?;
    let aggregate_type: Option<String> = row
        .try_get("aggregate_type")
        .map_err(|e| EventStoreError::Storage(format!("failed to read aggregate_type: {e}")))?;

    Ok((current_version.unwrap_or(0) as u64, aggregate_type))
}

fn row_to_stored_event(row: &sqlx::postgres::PgRow) -> Result<StoredEvent, EventStoreError> {
    let read = |e: sqlx::Error| EventStoreError::Storage(format!("failed to read event row: {e}"));

    let aggregate_id: uuid::Uuid = row.try_get("aggregate_id").map_err(read)?;
    let sequence_number: i64 = row.try_get("sequence_number").map_err(read)?;
    let event_version: i32 = row.try_get("event_version").map_err(read)?;
    let occurred_at: DateTime<Utc> = row.try_get("occurred_at").map_err(read)?;

    Ok(StoredEvent {
        event_id: row.try_get("event_id").map_err(read)?,
        aggregate_id: AggregateId::from_uuid(aggregate_id),
        aggregate_type: row.try_get("aggregate_type").map_err(read)?,
        sequence_number: sequence_number as u64,
        event_type: row.try_get("event_type").map_err(read)?,
        event_version: event_version as u32,
        occurred_at,
        payload: row.try_get("payload").map_err(read)?,
    })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> EventStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => EventStoreError::Concurrency(msg),
                Some("23503") | Some("23514") => EventStoreError::InvalidAppend(msg),
                _ => EventStoreError::Storage(msg),
            }
        }
        other => EventStoreError::Storage(format!("sqlx error in {operation}: {other}")),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        return db_err.code().as_deref() == Some("23505");
    }
    false
}
