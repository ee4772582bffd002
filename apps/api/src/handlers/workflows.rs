use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use trellis_application::PublishWorkflowInput;
use trellis_core::AppError;

use crate::dto::{
    DispatchScheduleTickRequest, IngestEventResponse, PublishWorkflowRequest,
    SetWorkflowEnabledRequest, TestWorkflowRequest, TestWorkflowResponse, WorkflowResponse,
};
use crate::error::ApiResult;
use crate::state::AppState;

pub async fn list_workflows_handler(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<WorkflowResponse>>> {
    let workflows = state
        .workflow_store
        .list_latest()
        .await?
        .into_iter()
        .map(WorkflowResponse::from)
        .collect();

    Ok(Json(workflows))
}

pub async fn publish_workflow_handler(
    State(state): State<AppState>,
    Json(payload): Json<PublishWorkflowRequest>,
) -> ApiResult<(StatusCode, Json<WorkflowResponse>)> {
    let workflow = state
        .workflow_store
        .publish(PublishWorkflowInput {
            name: payload
                .name
                .unwrap_or_else(|| payload.workflow_id.clone()),
            workflow_id: payload.workflow_id,
            version: payload.version,
            enabled: payload.enabled.unwrap_or(true),
            tags: payload.tags,
            definition: payload.definition,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(WorkflowResponse::from(workflow))))
}

pub async fn list_workflow_versions_handler(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
) -> ApiResult<Json<Vec<WorkflowResponse>>> {
    let versions = state
        .workflow_store
        .list_versions(workflow_id.as_str())
        .await?;

    if versions.is_empty() {
        return Err(AppError::NotFound(format!(
            "workflow '{workflow_id}' does not exist"
        ))
        .into());
    }

    Ok(Json(versions.into_iter().map(WorkflowResponse::from).collect()))
}

pub async fn set_workflow_enabled_handler(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
    Json(payload): Json<SetWorkflowEnabledRequest>,
) -> ApiResult<StatusCode> {
    state
        .workflow_store
        .set_enabled(
            workflow_id.as_str(),
            payload.version.as_str(),
            payload.enabled,
        )
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn dispatch_schedule_tick_handler(
    State(state): State<AppState>,
    Json(payload): Json<DispatchScheduleTickRequest>,
) -> ApiResult<(StatusCode, Json<IngestEventResponse>)> {
    let routed = state
        .event_router
        .route_schedule_tick(payload.cron.as_str(), payload.payload)
        .await?;

    state.drain_inline_jobs().await;

    Ok((StatusCode::ACCEPTED, Json(IngestEventResponse::from(routed))))
}

pub async fn test_workflow_handler(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
    Json(payload): Json<TestWorkflowRequest>,
) -> ApiResult<(StatusCode, Json<TestWorkflowResponse>)> {
    let execution_id = state
        .event_router
        .inject_test_event(workflow_id.as_str(), payload.payload)
        .await?;

    state.drain_inline_jobs().await;

    Ok((
        StatusCode::ACCEPTED,
        Json(TestWorkflowResponse {
            execution_id: execution_id.to_string(),
        }),
    ))
}
