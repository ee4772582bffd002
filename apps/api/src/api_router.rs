use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{approvals, events, executions, health, workflows};
use crate::state::AppState;

/// Builds the API route tree.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/events", post(events::ingest_event_handler))
        .route(
            "/schedules/dispatch",
            post(workflows::dispatch_schedule_tick_handler),
        )
        .route(
            "/workflows",
            get(workflows::list_workflows_handler).post(workflows::publish_workflow_handler),
        )
        .route(
            "/workflows/{workflow_id}",
            get(workflows::list_workflow_versions_handler),
        )
        .route(
            "/workflows/{workflow_id}/enabled",
            post(workflows::set_workflow_enabled_handler),
        )
        .route(
            "/workflows/{workflow_id}/test",
            post(workflows::test_workflow_handler),
        )
        .route("/approvals", get(approvals::list_approvals_handler))
        .route(
            "/approvals/{approval_id}",
            get(approvals::get_approval_handler),
        )
        .route(
            "/approvals/{approval_id}/approve",
            post(approvals::approve_approval_handler),
        )
        .route(
            "/approvals/{approval_id}/reject",
            post(approvals::reject_approval_handler),
        )
        .route("/executions", get(executions::list_executions_handler))
        .route(
            "/executions/{execution_id}",
            get(executions::get_execution_handler),
        )
        .route(
            "/executions/{execution_id}/cancel",
            post(executions::cancel_execution_handler),
        )
        .route("/health", get(health::health_handler))
        .route("/ready", get(health::ready_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
