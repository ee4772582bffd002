use axum::Json;
use axum::extract::{Path, Query, State};
use trellis_application::{ApprovalDecision, ApprovalListQuery, ApprovalStatus};
use trellis_core::ApprovalId;

use crate::dto::{ApprovalListRequest, ApprovalResponse, DecideApprovalRequest};
use crate::error::ApiResult;
use crate::state::AppState;

pub async fn list_approvals_handler(
    State(state): State<AppState>,
    Query(query): Query<ApprovalListRequest>,
) -> ApiResult<Json<Vec<ApprovalResponse>>> {
    let status = query
        .status
        .as_deref()
        .map(ApprovalStatus::parse)
        .transpose()?;

    let approvals = state
        .approval_service
        .list(ApprovalListQuery {
            status,
            approver_role: query.approver_role,
            limit: query.limit.unwrap_or(50),
            offset: query.offset.unwrap_or(0),
        })
        .await?
        .into_iter()
        .map(ApprovalResponse::from)
        .collect();

    Ok(Json(approvals))
}

pub async fn get_approval_handler(
    State(state): State<AppState>,
    Path(approval_id): Path<String>,
) -> ApiResult<Json<ApprovalResponse>> {
    let approval_id = ApprovalId::parse(approval_id.as_str())?;
    let approval = state.approval_service.find(approval_id).await?;
    Ok(Json(ApprovalResponse::from(approval)))
}

pub async fn approve_approval_handler(
    State(state): State<AppState>,
    Path(approval_id): Path<String>,
    Json(payload): Json<DecideApprovalRequest>,
) -> ApiResult<Json<ApprovalResponse>> {
    decide(state, approval_id, ApprovalDecision::Approve, payload).await
}

pub async fn reject_approval_handler(
    State(state): State<AppState>,
    Path(approval_id): Path<String>,
    Json(payload): Json<DecideApprovalRequest>,
) -> ApiResult<Json<ApprovalResponse>> {
    decide(state, approval_id, ApprovalDecision::Reject, payload).await
}

async fn decide(
    state: AppState,
    approval_id: String,
    decision: ApprovalDecision,
    payload: DecideApprovalRequest,
) -> ApiResult<Json<ApprovalResponse>> {
    let approval_id = ApprovalId::parse(approval_id.as_str())?;

    let approval = state
        .approval_service
        .decide(
            approval_id,
            decision,
            payload.comment.as_deref(),
            payload.approver_id.as_str(),
        )
        .await?;

    state.drain_inline_jobs().await;

    Ok(Json(ApprovalResponse::from(approval)))
}
