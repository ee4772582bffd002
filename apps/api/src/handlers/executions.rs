use axum::Json;
use axum::extract::{Path, Query, State};
use trellis_application::{ExecutionListQuery, ExecutionStatus};
use trellis_core::ExecutionId;

use crate::dto::{
    CancelExecutionRequest, ExecutionDetailResponse, ExecutionListRequest, ExecutionResponse,
    StepExecutionResponse,
};
use crate::error::ApiResult;
use crate::state::AppState;

pub async fn list_executions_handler(
    State(state): State<AppState>,
    Query(query): Query<ExecutionListRequest>,
) -> ApiResult<Json<Vec<ExecutionResponse>>> {
    let status = query
        .status
        .as_deref()
        .map(ExecutionStatus::parse)
        .transpose()?;

    let executions = state
        .execution_store
        .list(ExecutionListQuery {
            workflow_id: query.workflow_id,
            status,
            limit: query.limit.unwrap_or(50),
            offset: query.offset.unwrap_or(0),
        })
        .await?
        .into_iter()
        .map(ExecutionResponse::from)
        .collect();

    Ok(Json(executions))
}

pub async fn get_execution_handler(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
) -> ApiResult<Json<ExecutionDetailResponse>> {
    let execution_id = ExecutionId::parse(execution_id.as_str())?;
    let (execution, steps) = state.execution_service.find_with_steps(execution_id).await?;

    Ok(Json(ExecutionDetailResponse {
        execution: ExecutionResponse::from(execution),
        steps: steps.into_iter().map(StepExecutionResponse::from).collect(),
    }))
}

pub async fn cancel_execution_handler(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
    Json(payload): Json<CancelExecutionRequest>,
) -> ApiResult<Json<ExecutionResponse>> {
    let execution_id = ExecutionId::parse(execution_id.as_str())?;
    let reason = payload
        .reason
        .unwrap_or_else(|| "cancelled via api".to_owned());

    let cancelled = state
        .execution_service
        .cancel(execution_id, reason.as_str())
        .await?;

    Ok(Json(ExecutionResponse::from(cancelled)))
}
