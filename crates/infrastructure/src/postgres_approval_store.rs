use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use trellis_application::{
    ApprovalListQuery, ApprovalRecord, ApprovalStatus, ApprovalStore, CreateApprovalInput,
};
use trellis_core::{AppError, AppResult, ApprovalId, ExecutionId};

/// PostgreSQL-backed approval repository.
///
/// Status transitions guard on `status = 'pending'`, so concurrent deciders
/// serialize on the row and exactly one transition wins.
#[derive(Clone)]
pub struct PostgresApprovalStore {
    pool: PgPool,
}

impl PostgresApprovalStore {
    /// Creates an approval store with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct ApprovalRow {
    id: uuid::Uuid,
    execution_id: uuid::Uuid,
    step_id: String,
    entity_type: Option<String>,
    entity_id: Option<String>,
    requester_id: Option<String>,
    approver_role: String,
    approver_id: Option<String>,
    status: String,
    reason: String,
    decision_reason: Option<String>,
    requested_at: DateTime<Utc>,
    decided_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
}

const APPROVAL_COLUMNS: &str = r#"
    id,
    execution_id,
    step_id,
    entity_type,
    entity_id,
    requester_id,
    approver_role,
    approver_id,
    status,
    reason,
    decision_reason,
    requested_at,
    decided_at,
    expires_at
"#;

#[async_trait]
impl ApprovalStore for PostgresApprovalStore {
    async fn insert(
        &self,
        input: CreateApprovalInput,
        expires_at: Option<DateTime<Utc>>,
    ) -> AppResult<ApprovalRecord> {
        let row = sqlx::query_as::<_, ApprovalRow>(
            format!(
                r#"
                INSERT INTO approvals (
                    execution_id, step_id, entity_type, entity_id, requester_id,
                    approver_role, reason, expires_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                RETURNING {APPROVAL_COLUMNS}
                "#
            )
            .as_str(),
        )
        .bind(input.execution_id.as_uuid())
        .bind(input.step_id.as_str())
        .bind(input.entity_type.as_deref())
        .bind(input.entity_id.as_deref())
        .bind(input.requester_id.as_deref())
        .bind(input.approver_role.as_str())
        .bind(input.reason.as_str())
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to insert approval for execution '{}': {error}",
                input.execution_id
            ))
        })?;

        approval_from_row(row)
    }

    async fn find(&self, approval_id: ApprovalId) -> AppResult<Option<ApprovalRecord>> {
        let row = sqlx::query_as::<_, ApprovalRow>(
            format!("SELECT {APPROVAL_COLUMNS} FROM approvals WHERE id = $1").as_str(),
        )
        .bind(approval_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to find approval '{approval_id}': {error}"))
        })?;

        row.map(approval_from_row).transpose()
    }

    async fn list(&self, query: ApprovalListQuery) -> AppResult<Vec<ApprovalRecord>> {
        let limit = if query.limit == 0 { 50 } else { query.limit };
        let rows = sqlx::query_as::<_, ApprovalRow>(
            format!(
                r#"
                SELECT {APPROVAL_COLUMNS}
                FROM approvals
                WHERE ($1::TEXT IS NULL OR status = $1)
                  AND ($2::TEXT IS NULL OR approver_role = $2)
                ORDER BY requested_at DESC
                LIMIT $3 OFFSET $4
                "#
            )
            .as_str(),
        )
        .bind(query.status.map(|status| status.as_str()))
        .bind(query.approver_role)
        .bind(i64::try_from(limit).map_err(|error| {
            AppError::Validation(format!("invalid approval list limit: {error}"))
        })?)
        .bind(i64::try_from(query.offset).map_err(|error| {
            AppError::Validation(format!("invalid approval list offset: {error}"))
        })?)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to list approvals: {error}")))?;

        rows.into_iter().map(approval_from_row).collect()
    }

    async fn transition(
        &self,
        approval_id: ApprovalId,
        to: ApprovalStatus,
        approver_id: Option<&str>,
        decision_reason: Option<&str>,
    ) -> AppResult<ApprovalRecord> {
        let row = sqlx::query_as::<_, ApprovalRow>(
            format!(
                r#"
                UPDATE approvals
                SET status = $2, approver_id = $3, decision_reason = $4, decided_at = now()
                WHERE id = $1 AND status = 'pending'
                RETURNING {APPROVAL_COLUMNS}
                "#
            )
            .as_str(),
        )
        .bind(approval_id.as_uuid())
        .bind(to.as_str())
        .bind(approver_id)
        .bind(decision_reason)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to transition approval '{approval_id}': {error}"
            ))
        })?;

        match row {
            Some(row) => approval_from_row(row),
            None => {
                let current = self.find(approval_id).await?;
                match current {
                    Some(approval) => Err(AppError::Conflict(format!(
                        "approval '{approval_id}' is already '{}'",
                        approval.status.as_str()
                    ))),
                    None => Err(AppError::NotFound(format!(
                        "approval '{approval_id}' does not exist"
                    ))),
                }
            }
        }
    }

    async fn list_expirable(&self, now: DateTime<Utc>) -> AppResult<Vec<ApprovalRecord>> {
        let rows = sqlx::query_as::<_, ApprovalRow>(
            format!(
                r#"
                SELECT {APPROVAL_COLUMNS}
                FROM approvals
                WHERE status = 'pending' AND expires_at IS NOT NULL AND expires_at <= $1
                ORDER BY expires_at
                "#
            )
            .as_str(),
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to list expirable approvals: {error}"))
        })?;

        rows.into_iter().map(approval_from_row).collect()
    }

    async fn list_unresumed(&self) -> AppResult<Vec<ApprovalRecord>> {
        let rows = sqlx::query_as::<_, ApprovalRow>(
            r#"
            SELECT
                approvals.id,
                approvals.execution_id,
                approvals.step_id,
                approvals.entity_type,
                approvals.entity_id,
                approvals.requester_id,
                approvals.approver_role,
                approvals.approver_id,
                approvals.status,
                approvals.reason,
                approvals.decision_reason,
                approvals.requested_at,
                approvals.decided_at,
                approvals.expires_at
            FROM approvals
            INNER JOIN executions ON executions.id = approvals.execution_id
            WHERE approvals.status IN ('approved', 'rejected', 'expired')
              AND executions.status IN ('waiting', 'paused')
            ORDER BY approvals.decided_at
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to list unresumed approvals: {error}"))
        })?;

        rows.into_iter().map(approval_from_row).collect()
    }
}

fn approval_from_row(row: ApprovalRow) -> AppResult<ApprovalRecord> {
    Ok(ApprovalRecord {
        id: ApprovalId::from_uuid(row.id),
        execution_id: ExecutionId::from_uuid(row.execution_id),
        step_id: row.step_id,
        entity_type: row.entity_type,
        entity_id: row.entity_id,
        requester_id: row.requester_id,
        approver_role: row.approver_role,
        approver_id: row.approver_id,
        status: ApprovalStatus::parse(row.status.as_str())?,
        reason: row.reason,
        decision_reason: row.decision_reason,
        requested_at: row.requested_at,
        decided_at: row.decided_at,
        expires_at: row.expires_at,
    })
}
