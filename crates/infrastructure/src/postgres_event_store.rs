use async_trait::async_trait;
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use trellis_application::{EventRecord, EventStore, IngestEventInput};
use trellis_core::{AppError, AppResult, EventId};

/// PostgreSQL-backed event repository.
///
/// Event ids carry the ingest idempotency contract: inserting a duplicate
/// id returns the already-stored row instead of a second copy.
#[derive(Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    /// Creates an event store with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct EventRow {
    id: uuid::Uuid,
    event_type: String,
    source: String,
    payload: Value,
    received_at: chrono::DateTime<chrono::Utc>,
}

#[async_trait]
impl EventStore for PostgresEventStore {
    async fn insert(&self, input: IngestEventInput) -> AppResult<(EventRecord, bool)> {
        let event_id = input.id.unwrap_or_default();

        let inserted = sqlx::query_as::<_, EventRow>(
            r#"
            INSERT INTO events (id, event_type, source, payload)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO NOTHING
            RETURNING id, event_type, source, payload, received_at
            "#,
        )
        .bind(event_id.as_uuid())
        .bind(input.event_type.as_str())
        .bind(input.source.as_str())
        .bind(&input.payload)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to insert event '{event_id}': {error}"))
        })?;

        if let Some(row) = inserted {
            return Ok((event_from_row(row), true));
        }

        let existing = self.find(event_id).await?.ok_or_else(|| {
            AppError::Internal(format!(
                "event '{event_id}' conflicted on insert but cannot be read back"
            ))
        })?;
        Ok((existing, false))
    }

    async fn find(&self, event_id: EventId) -> AppResult<Option<EventRecord>> {
        let row = sqlx::query_as::<_, EventRow>(
            "SELECT id, event_type, source, payload, received_at FROM events WHERE id = $1",
        )
        .bind(event_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to find event '{event_id}': {error}"))
        })?;

        Ok(row.map(event_from_row))
    }
}

fn event_from_row(row: EventRow) -> EventRecord {
    EventRecord {
        id: EventId::from_uuid(row.id),
        event_type: row.event_type,
        source: row.source,
        payload: row.payload,
        received_at: row.received_at,
    }
}
