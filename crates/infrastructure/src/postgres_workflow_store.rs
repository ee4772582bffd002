use async_trait::async_trait;
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use trellis_application::{PublishWorkflowInput, PublishedWorkflow, WorkflowStore};
use trellis_core::{AppError, AppResult, WorkflowRef};
use trellis_domain::{WorkflowDefinition, validate_definition};

/// PostgreSQL-backed workflow version repository.
#[derive(Clone)]
pub struct PostgresWorkflowStore {
    pool: PgPool,
}

impl PostgresWorkflowStore {
    /// Creates a workflow store with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct WorkflowRow {
    id: uuid::Uuid,
    workflow_id: String,
    version: String,
    name: String,
    enabled: bool,
    tags: Vec<String>,
    definition: Value,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

const WORKFLOW_COLUMNS: &str = r#"
    id,
    workflow_id,
    version,
    name,
    enabled,
    tags,
    definition,
    created_at,
    updated_at
"#;

#[async_trait]
impl WorkflowStore for PostgresWorkflowStore {
    async fn publish(&self, input: PublishWorkflowInput) -> AppResult<PublishedWorkflow> {
        validate_definition(&input.definition)?;

        let definition = serde_json::to_value(&input.definition).map_err(|error| {
            AppError::Validation(format!("failed to serialize workflow definition: {error}"))
        })?;

        let row = sqlx::query_as::<_, WorkflowRow>(
            r#"
            INSERT INTO workflows (workflow_id, version, name, enabled, tags, definition)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING
                id,
                workflow_id,
                version,
                name,
                enabled,
                tags,
                definition,
                created_at,
                updated_at
            "#,
        )
        .bind(input.workflow_id.as_str())
        .bind(input.version.as_str())
        .bind(input.name.as_str())
        .bind(input.enabled)
        .bind(&input.tags)
        .bind(definition)
        .fetch_one(&self.pool)
        .await
        .map_err(|error| match &error {
            sqlx::Error::Database(database_error) if database_error.is_unique_violation() => {
                AppError::Conflict(format!(
                    "workflow '{}' version '{}' already exists",
                    input.workflow_id, input.version
                ))
            }
            _ => AppError::Internal(format!(
                "failed to publish workflow '{}' version '{}': {error}",
                input.workflow_id, input.version
            )),
        })?;

        workflow_from_row(row)
    }

    async fn find_by_ref(&self, workflow_ref: WorkflowRef) -> AppResult<Option<PublishedWorkflow>> {
        let row = sqlx::query_as::<_, WorkflowRow>(
            format!("SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE id = $1").as_str(),
        )
        .bind(workflow_ref.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to find workflow row '{workflow_ref}': {error}"))
        })?;

        row.map(workflow_from_row).transpose()
    }

    async fn list_versions(&self, workflow_id: &str) -> AppResult<Vec<PublishedWorkflow>> {
        let rows = sqlx::query_as::<_, WorkflowRow>(
            format!(
                "SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE workflow_id = $1 ORDER BY version DESC"
            )
            .as_str(),
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to list versions of workflow '{workflow_id}': {error}"
            ))
        })?;

        rows.into_iter().map(workflow_from_row).collect()
    }

    async fn list_latest(&self) -> AppResult<Vec<PublishedWorkflow>> {
        let rows = sqlx::query_as::<_, WorkflowRow>(
            format!(
                r#"
                SELECT DISTINCT ON (workflow_id) {WORKFLOW_COLUMNS}
                FROM workflows
                ORDER BY workflow_id, version DESC
                "#
            )
            .as_str(),
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to list workflows: {error}")))?;

        rows.into_iter().map(workflow_from_row).collect()
    }

    async fn set_enabled(&self, workflow_id: &str, version: &str, enabled: bool) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE workflows
            SET enabled = $3, updated_at = now()
            WHERE workflow_id = $1 AND version = $2
            "#,
        )
        .bind(workflow_id)
        .bind(version)
        .bind(enabled)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to update enabled flag on workflow '{workflow_id}' version '{version}': {error}"
            ))
        })?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "workflow '{workflow_id}' version '{version}' does not exist"
            )));
        }

        Ok(())
    }

    async fn list_enabled_for_trigger(
        &self,
        trigger_type: &str,
        match_key: &str,
    ) -> AppResult<Vec<PublishedWorkflow>> {
        let rows = sqlx::query_as::<_, WorkflowRow>(
            format!(
                r#"
                SELECT {WORKFLOW_COLUMNS}
                FROM workflows
                WHERE enabled
                  AND definition -> 'trigger' ->> 'type' = $1
                  AND COALESCE(
                        definition -> 'trigger' ->> 'event',
                        definition -> 'trigger' ->> 'cron'
                      ) = $2
                ORDER BY workflow_id, version DESC
                "#
            )
            .as_str(),
        )
        .bind(trigger_type)
        .bind(match_key)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to list workflows for trigger '{trigger_type}/{match_key}': {error}"
            ))
        })?;

        rows.into_iter().map(workflow_from_row).collect()
    }
}


fn workflow_from_row(row: WorkflowRow) -> AppResult<PublishedWorkflow> {
    let definition: WorkflowDefinition =
        serde_json::from_value(row.definition).map_err(|error| {
            AppError::Internal(format!(
                "failed to deserialize definition of workflow row '{}': {error}",
                row.id
            ))
        })?;

    Ok(PublishedWorkflow {
        id: WorkflowRef::from_uuid(row.id),
        workflow_id: row.workflow_id,
        version: row.version,
        name: row.name,
        enabled: row.enabled,
        tags: row.tags,
        definition,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}
