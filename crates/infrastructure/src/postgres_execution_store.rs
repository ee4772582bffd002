use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use trellis_application::{
    CreateExecutionInput, ExecutionListQuery, ExecutionRecord, ExecutionResult, ExecutionStatus,
    ExecutionStore, StepExecutionRecord, StepExecutionStatus, WaitKind, WaitRecord,
};
use trellis_core::{AppError, AppResult, ApprovalId, EventId, ExecutionId, WorkflowRef};

/// PostgreSQL-backed execution, step-attempt, and wait-record repository.
#[derive(Clone)]
pub struct PostgresExecutionStore {
    pool: PgPool,
}

impl PostgresExecutionStore {
    /// Creates an execution store with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct ExecutionRow {
    id: uuid::Uuid,
    workflow_ref: uuid::Uuid,
    trigger_event_id: Option<uuid::Uuid>,
    status: String,
    result: Option<String>,
    current_step_id: Option<String>,
    context: Value,
    error_message: Option<String>,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, FromRow)]
struct StepExecutionRow {
    execution_id: uuid::Uuid,
    step_id: String,
    attempt: i32,
    status: String,
    input: Value,
    output: Option<Value>,
    error_message: Option<String>,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, FromRow)]
struct WaitRecordRow {
    execution_id: uuid::Uuid,
    step_id: String,
    wait_kind: String,
    event_name: Option<String>,
    approval_id: Option<uuid::Uuid>,
    timeout_at: Option<DateTime<Utc>>,
    on_timeout_step_id: Option<String>,
}

const EXECUTION_COLUMNS: &str = r#"
    id,
    workflow_ref,
    trigger_event_id,
    status,
    result,
    current_step_id,
    context,
    error_message,
    started_at,
    completed_at
"#;

const WAIT_COLUMNS: &str = r#"
    execution_id,
    step_id,
    wait_kind,
    event_name,
    approval_id,
    timeout_at,
    on_timeout_step_id
"#;

#[async_trait]
impl ExecutionStore for PostgresExecutionStore {
    async fn create(&self, input: CreateExecutionInput) -> AppResult<ExecutionRecord> {
        let row = sqlx::query_as::<_, ExecutionRow>(
            format!(
                r#"
                INSERT INTO executions (workflow_ref, trigger_event_id, status, current_step_id, context)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING {EXECUTION_COLUMNS}
                "#
            )
            .as_str(),
        )
        .bind(input.workflow_ref.as_uuid())
        .bind(input.trigger_event_id.map(|event_id| event_id.as_uuid()))
        .bind(input.status.as_str())
        .bind(input.current_step_id)
        .bind(&input.context)
        .fetch_one(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to create execution: {error}")))?;

        execution_from_row(row)
    }

    async fn find(&self, execution_id: ExecutionId) -> AppResult<Option<ExecutionRecord>> {
        let row = sqlx::query_as::<_, ExecutionRow>(
            format!("SELECT {EXECUTION_COLUMNS} FROM executions WHERE id = $1").as_str(),
        )
        .bind(execution_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to find execution '{execution_id}': {error}"))
        })?;

        row.map(execution_from_row).transpose()
    }

    async fn list(&self, query: ExecutionListQuery) -> AppResult<Vec<ExecutionRecord>> {
        let limit = if query.limit == 0 { 50 } else { query.limit };
        let rows = sqlx::query_as::<_, ExecutionRow>(
            format!(
                r#"
                SELECT {EXECUTION_COLUMNS}
                FROM executions
                WHERE ($1::TEXT IS NULL OR status = $1)
                  AND (
                        $2::TEXT IS NULL
                        OR workflow_ref IN (SELECT id FROM workflows WHERE workflow_id = $2)
                      )
                ORDER BY started_at DESC
                LIMIT $3 OFFSET $4
                "#
            )
            .as_str(),
        )
        .bind(query.status.map(|status| status.as_str()))
        .bind(query.workflow_id)
        .bind(i64::try_from(limit).map_err(|error| {
            AppError::Validation(format!("invalid execution list limit: {error}"))
        })?)
        .bind(i64::try_from(query.offset).map_err(|error| {
            AppError::Validation(format!("invalid execution list offset: {error}"))
        })?)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to list executions: {error}")))?;

        rows.into_iter().map(execution_from_row).collect()
    }

    async fn mark_running(
        &self,
        execution_id: ExecutionId,
        current_step_id: Option<&str>,
        context: &Value,
    ) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE executions
            SET status = 'running', current_step_id = $2, context = $3
            WHERE id = $1
            "#,
        )
        .bind(execution_id.as_uuid())
        .bind(current_step_id)
        .bind(context)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to mark execution '{execution_id}' running: {error}"
            ))
        })?;

        require_updated(result, execution_id)
    }

    async fn advance_step(
        &self,
        execution_id: ExecutionId,
        current_step_id: &str,
        context: &Value,
    ) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE executions
            SET current_step_id = $2, context = $3
            WHERE id = $1
            "#,
        )
        .bind(execution_id.as_uuid())
        .bind(current_step_id)
        .bind(context)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to advance execution '{execution_id}': {error}"
            ))
        })?;

        require_updated(result, execution_id)
    }

    async fn suspend(
        &self,
        execution_id: ExecutionId,
        status: ExecutionStatus,
        context: &Value,
        wait: WaitRecord,
    ) -> AppResult<()> {
        let mut transaction = self.pool.begin().await.map_err(|error| {
            AppError::Internal(format!(
                "failed to start suspend transaction for execution '{execution_id}': {error}"
            ))
        })?;

        let result = sqlx::query(
            r#"
            UPDATE executions
            SET status = $2, context = $3
            WHERE id = $1
            "#,
        )
        .bind(execution_id.as_uuid())
        .bind(status.as_str())
        .bind(context)
        .execute(&mut *transaction)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to suspend execution '{execution_id}': {error}"
            ))
        })?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "execution '{execution_id}' does not exist"
            )));
        }

        sqlx::query(
            r#"
            INSERT INTO wait_records (
                execution_id, step_id, wait_kind, event_name, approval_id,
                timeout_at, on_timeout_step_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(wait.execution_id.as_uuid())
        .bind(wait.step_id.as_str())
        .bind(wait.wait_kind.as_str())
        .bind(wait.event_name.as_deref())
        .bind(wait.approval_id.map(|approval_id| approval_id.as_uuid()))
        .bind(wait.timeout_at)
        .bind(wait.on_timeout_step_id.as_deref())
        .execute(&mut *transaction)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to insert wait record for execution '{execution_id}': {error}"
            ))
        })?;

        transaction.commit().await.map_err(|error| {
            AppError::Internal(format!(
                "failed to commit suspend transaction for execution '{execution_id}': {error}"
            ))
        })
    }

    async fn save_context(&self, execution_id: ExecutionId, context: &Value) -> AppResult<()> {
        let result = sqlx::query("UPDATE executions SET context = $2 WHERE id = $1")
            .bind(execution_id.as_uuid())
            .bind(context)
            .execute(&self.pool)
            .await
            .map_err(|error| {
                AppError::Internal(format!(
                    "failed to save context of execution '{execution_id}': {error}"
                ))
            })?;

        require_updated(result, execution_id)
    }

    async fn pause(&self, execution_id: ExecutionId) -> AppResult<()> {
        // The status guard keeps this a no-op for executions that already
        // suspended or terminated before the shutdown write landed.
        sqlx::query("UPDATE executions SET status = 'paused' WHERE id = $1 AND status = 'running'")
            .bind(execution_id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|error| {
                AppError::Internal(format!(
                    "failed to pause execution '{execution_id}': {error}"
                ))
            })?;

        Ok(())
    }

    async fn complete(
        &self,
        execution_id: ExecutionId,
        status: ExecutionStatus,
        result: Option<ExecutionResult>,
        error_message: Option<&str>,
    ) -> AppResult<ExecutionRecord> {
        // The status guard makes the terminal transition a compare-and-set:
        // a second terminal writer observes zero updated rows.
        let row = sqlx::query_as::<_, ExecutionRow>(
            format!(
                r#"
                UPDATE executions
                SET status = $2, result = $3, error_message = $4, completed_at = now()
                WHERE id = $1
                  AND status NOT IN ('completed', 'failed', 'blocked', 'cancelled')
                RETURNING {EXECUTION_COLUMNS}
                "#
            )
            .as_str(),
        )
        .bind(execution_id.as_uuid())
        .bind(status.as_str())
        .bind(result.map(|result| result.as_str()))
        .bind(error_message)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to complete execution '{execution_id}': {error}"
            ))
        })?;

        match row {
            Some(row) => execution_from_row(row),
            None => Err(AppError::Conflict(format!(
                "execution '{execution_id}' is missing or already terminal"
            ))),
        }
    }

    async fn start_step(
        &self,
        execution_id: ExecutionId,
        step_id: &str,
        attempt: i32,
        input: &Value,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO step_executions (execution_id, step_id, attempt, status, input)
            VALUES ($1, $2, $3, 'running', $4)
            "#,
        )
        .bind(execution_id.as_uuid())
        .bind(step_id)
        .bind(attempt)
        .bind(input)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to append step row '{step_id}' attempt {attempt} for execution '{execution_id}': {error}"
            ))
        })?;

        Ok(())
    }

    async fn finish_step(
        &self,
        execution_id: ExecutionId,
        step_id: &str,
        attempt: i32,
        status: StepExecutionStatus,
        output: Option<&Value>,
        error_message: Option<&str>,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE step_executions
            SET status = $4, output = $5, error_message = $6, completed_at = now()
            WHERE id = (
                SELECT id
                FROM step_executions
                WHERE execution_id = $1 AND step_id = $2 AND attempt = $3
                ORDER BY id DESC
                LIMIT 1
            )
            "#,
        )
        .bind(execution_id.as_uuid())
        .bind(step_id)
        .bind(attempt)
        .bind(status.as_str())
        .bind(output)
        .bind(error_message)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to finalize step row '{step_id}' attempt {attempt} for execution '{execution_id}': {error}"
            ))
        })?;

        Ok(())
    }

    async fn list_step_executions(
        &self,
        execution_id: ExecutionId,
    ) -> AppResult<Vec<StepExecutionRecord>> {
        let rows = sqlx::query_as::<_, StepExecutionRow>(
            r#"
            SELECT execution_id, step_id, attempt, status, input, output, error_message,
                   started_at, completed_at
            FROM step_executions
            WHERE execution_id = $1
            ORDER BY id
            "#,
        )
        .bind(execution_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to list step rows for execution '{execution_id}': {error}"
            ))
        })?;

        rows.into_iter().map(step_execution_from_row).collect()
    }

    async fn consume_wait(&self, execution_id: ExecutionId) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE wait_records
            SET consumed = TRUE
            WHERE id = (
                SELECT id
                FROM wait_records
                WHERE execution_id = $1 AND NOT consumed
                ORDER BY id DESC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            "#,
        )
        .bind(execution_id.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to consume wait record for execution '{execution_id}': {error}"
            ))
        })?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_open_wait(&self, execution_id: ExecutionId) -> AppResult<Option<WaitRecord>> {
        let row = sqlx::query_as::<_, WaitRecordRow>(
            format!(
                r#"
                SELECT {WAIT_COLUMNS}
                FROM wait_records
                WHERE execution_id = $1 AND NOT consumed
                ORDER BY id DESC
                LIMIT 1
                "#
            )
            .as_str(),
        )
        .bind(execution_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to find open wait for execution '{execution_id}': {error}"
            ))
        })?;

        row.map(wait_from_row).transpose()
    }

    async fn list_open_waits_for_event(&self, event_name: &str) -> AppResult<Vec<WaitRecord>> {
        let rows = sqlx::query_as::<_, WaitRecordRow>(
            format!(
                r#"
                SELECT {WAIT_COLUMNS}
                FROM wait_records
                WHERE event_name = $1 AND NOT consumed
                ORDER BY id
                "#
            )
            .as_str(),
        )
        .bind(event_name)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to list open waits for event '{event_name}': {error}"
            ))
        })?;

        rows.into_iter().map(wait_from_row).collect()
    }

    async fn list_expired_waits(&self, now: DateTime<Utc>) -> AppResult<Vec<WaitRecord>> {
        let rows = sqlx::query_as::<_, WaitRecordRow>(
            format!(
                r#"
                SELECT {WAIT_COLUMNS}
                FROM wait_records
                WHERE NOT consumed AND timeout_at IS NOT NULL AND timeout_at <= $1
                ORDER BY timeout_at
                "#
            )
            .as_str(),
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to list expired waits: {error}")))?;

        rows.into_iter().map(wait_from_row).collect()
    }
}

fn require_updated(
    result: sqlx::postgres::PgQueryResult,
    execution_id: ExecutionId,
) -> AppResult<()> {
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!(
            "execution '{execution_id}' does not exist"
        )));
    }

    Ok(())
}

fn execution_from_row(row: ExecutionRow) -> AppResult<ExecutionRecord> {
    Ok(ExecutionRecord {
        id: ExecutionId::from_uuid(row.id),
        workflow_ref: WorkflowRef::from_uuid(row.workflow_ref),
        trigger_event_id: row.trigger_event_id.map(EventId::from_uuid),
        status: ExecutionStatus::parse(row.status.as_str())?,
        result: row
            .result
            .as_deref()
            .map(ExecutionResult::parse)
            .transpose()?,
        current_step_id: row.current_step_id,
        context: row.context,
        error_message: row.error_message,
        started_at: row.started_at,
        completed_at: row.completed_at,
    })
}

fn step_execution_from_row(row: StepExecutionRow) -> AppResult<StepExecutionRecord> {
    Ok(StepExecutionRecord {
        execution_id: ExecutionId::from_uuid(row.execution_id),
        step_id: row.step_id,
        attempt: row.attempt,
        status: StepExecutionStatus::parse(row.status.as_str())?,
        input: row.input,
        output: row.output,
        error_message: row.error_message,
        started_at: row.started_at,
        completed_at: row.completed_at,
    })
}

fn wait_from_row(row: WaitRecordRow) -> AppResult<WaitRecord> {
    Ok(WaitRecord {
        execution_id: ExecutionId::from_uuid(row.execution_id),
        step_id: row.step_id,
        wait_kind: WaitKind::parse(row.wait_kind.as_str())?,
        event_name: row.event_name,
        approval_id: row.approval_id.map(ApprovalId::from_uuid),
        timeout_at: row.timeout_at,
        on_timeout_step_id: row.on_timeout_step_id,
    })
}
