use async_trait::async_trait;
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use trellis_application::{ClaimedEngineJob, EngineJobKind, EngineJobQueue, ResumeTrigger};
use trellis_core::{AppError, AppResult, ExecutionId, JobId};

/// PostgreSQL-backed durable queue for start and resume jobs.
///
/// Claims take `FOR UPDATE SKIP LOCKED` row locks and lease rows with a
/// token; completion and failure are fenced on `(leased_by, lease_token)`
/// so a worker whose lease expired cannot finalize a reassigned job.
#[derive(Clone)]
pub struct PostgresEngineJobQueue {
    pool: PgPool,
}

impl PostgresEngineJobQueue {
    /// Creates a job queue with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct ClaimedJobRow {
    id: uuid::Uuid,
    kind: String,
    execution_id: uuid::Uuid,
    resume_trigger: Option<Value>,
    lease_token: String,
}

#[async_trait]
impl EngineJobQueue for PostgresEngineJobQueue {
    async fn enqueue_start(&self, execution_id: ExecutionId) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO engine_jobs (kind, execution_id)
            VALUES ('start', $1)
            "#,
        )
        .bind(execution_id.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to enqueue start job for execution '{execution_id}': {error}"
            ))
        })?;

        Ok(())
    }

    async fn enqueue_resume(
        &self,
        execution_id: ExecutionId,
        trigger: &ResumeTrigger,
    ) -> AppResult<()> {
        let trigger = serde_json::to_value(trigger).map_err(|error| {
            AppError::Internal(format!("failed to serialize resume trigger: {error}"))
        })?;

        sqlx::query(
            r#"
            INSERT INTO engine_jobs (kind, execution_id, resume_trigger)
            VALUES ('resume', $1, $2)
            "#,
        )
        .bind(execution_id.as_uuid())
        .bind(trigger)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to enqueue resume job for execution '{execution_id}': {error}"
            ))
        })?;

        Ok(())
    }

    async fn claim(
        &self,
        worker_id: &str,
        limit: usize,
        lease_seconds: u32,
    ) -> AppResult<Vec<ClaimedEngineJob>> {
        let rows = sqlx::query_as::<_, ClaimedJobRow>(
            r#"
            WITH candidate_jobs AS (
                SELECT id
                FROM engine_jobs
                WHERE status = 'pending'
                   OR (status = 'leased' AND lease_expires_at < now())
                ORDER BY created_at ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE engine_jobs jobs
            SET
                status = 'leased',
                leased_by = $2,
                lease_token = gen_random_uuid()::TEXT,
                lease_expires_at = now() + make_interval(secs => $3::INT),
                updated_at = now()
            FROM candidate_jobs
            WHERE jobs.id = candidate_jobs.id
            RETURNING jobs.id, jobs.kind, jobs.execution_id, jobs.resume_trigger, jobs.lease_token
            "#,
        )
        .bind(i64::try_from(limit).map_err(|error| {
            AppError::Validation(format!("invalid engine job claim limit: {error}"))
        })?)
        .bind(worker_id)
        .bind(i32::try_from(lease_seconds).map_err(|error| {
            AppError::Validation(format!("invalid engine job lease_seconds: {error}"))
        })?)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to claim engine jobs for worker '{worker_id}': {error}"
            ))
        })?;

        rows.into_iter().map(claimed_job_from_row).collect()
    }

    async fn complete(&self, job_id: JobId, worker_id: &str, lease_token: &str) -> AppResult<()> {
        self.finalize(job_id, worker_id, lease_token, "completed", None)
            .await
    }

    async fn fail(
        &self,
        job_id: JobId,
        worker_id: &str,
        lease_token: &str,
        error_message: &str,
    ) -> AppResult<()> {
        self.finalize(job_id, worker_id, lease_token, "failed", Some(error_message))
            .await
    }
}

impl PostgresEngineJobQueue {
    async fn finalize(
        &self,
        job_id: JobId,
        worker_id: &str,
        lease_token: &str,
        status: &str,
        error_message: Option<&str>,
    ) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE engine_jobs
            SET
                status = $5,
                leased_by = NULL,
                lease_token = NULL,
                lease_expires_at = NULL,
                last_error = $6,
                updated_at = now()
            WHERE id = $1
              AND leased_by = $2
              AND lease_token = $3
              AND status = $4
            "#,
        )
        .bind(job_id.as_uuid())
        .bind(worker_id)
        .bind(lease_token)
        .bind("leased")
        .bind(status)
        .bind(error_message)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to finalize engine job '{job_id}' for worker '{worker_id}': {error}"
            ))
        })?;

        if result.rows_affected() == 0 {
            return Err(AppError::Conflict(format!(
                "engine job '{job_id}' is not leased by worker '{worker_id}' with a matching token"
            )));
        }

        Ok(())
    }
}

fn claimed_job_from_row(row: ClaimedJobRow) -> AppResult<ClaimedEngineJob> {
    let resume_trigger: Option<ResumeTrigger> = row
        .resume_trigger
        .map(serde_json::from_value)
        .transpose()
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to deserialize resume trigger of job '{}': {error}",
                row.id
            ))
        })?;

    Ok(ClaimedEngineJob {
        job_id: JobId::from_uuid(row.id),
        kind: EngineJobKind::parse(row.kind.as_str())?,
        execution_id: ExecutionId::from_uuid(row.execution_id),
        resume_trigger,
        lease_token: row.lease_token,
    })
}
