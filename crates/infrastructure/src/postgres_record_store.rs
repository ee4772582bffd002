use async_trait::async_trait;
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use trellis_application::RecordStore;
use trellis_core::{AppError, AppResult};

/// PostgreSQL-backed record collaborator for record CRUD actions.
///
/// Records are stored as `(entity, entity_id, data)` rows. A caller may
/// pass its own `id` inside `data` as the idempotency key; otherwise one is
/// generated.
#[derive(Clone)]
pub struct PostgresRecordStore {
    pool: PgPool,
}

impl PostgresRecordStore {
    /// Creates a record store with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct RecordRow {
    data: Value,
}

#[async_trait]
impl RecordStore for PostgresRecordStore {
    async fn create_record(&self, entity: &str, data: Value) -> AppResult<Value> {
        let entity_id = data
            .get("id")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let mut record = data.as_object().cloned().unwrap_or_default();
        record.insert("id".to_owned(), Value::String(entity_id.clone()));
        let record = Value::Object(record);

        // Idempotent on the caller-supplied id: replaying the same create
        // leaves the first row in place.
        sqlx::query(
            r#"
            INSERT INTO records (entity, entity_id, data)
            VALUES ($1, $2, $3)
            ON CONFLICT (entity, entity_id) DO NOTHING
            "#,
        )
        .bind(entity)
        .bind(entity_id.as_str())
        .bind(&record)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Transient(format!(
                "failed to create record '{entity}/{entity_id}': {error}"
            ))
        })?;

        Ok(record)
    }

    async fn update_record(&self, entity: &str, entity_id: &str, data: Value) -> AppResult<Value> {
        let row = sqlx::query_as::<_, RecordRow>(
            r#"
            UPDATE records
            SET data = data || $3, updated_at = now()
            WHERE entity = $1 AND entity_id = $2
            RETURNING data
            "#,
        )
        .bind(entity)
        .bind(entity_id)
        .bind(&data)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::Transient(format!(
                "failed to update record '{entity}/{entity_id}': {error}"
            ))
        })?;

        row.map(|row| row.data).ok_or_else(|| {
            AppError::Permanent(format!("record '{entity}/{entity_id}' does not exist"))
        })
    }

    async fn delete_record(&self, entity: &str, entity_id: &str) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM records WHERE entity = $1 AND entity_id = $2")
            .bind(entity)
            .bind(entity_id)
            .execute(&self.pool)
            .await
            .map_err(|error| {
                AppError::Transient(format!(
                    "failed to delete record '{entity}/{entity_id}': {error}"
                ))
            })?;

        if result.rows_affected() == 0 {
            return Err(AppError::Permanent(format!(
                "record '{entity}/{entity_id}' does not exist"
            )));
        }

        Ok(())
    }
}
