use std::sync::Arc;

use sqlx::PgPool;
use trellis_application::{
    ApprovalService, EventRouter, ExecutionMode, ExecutionService, ExecutionStore,
    WorkflowResumer, WorkflowStore,
};

/// Shared state for API handlers.
#[derive(Clone)]
pub struct AppState {
    /// Event-to-workflow router.
    pub event_router: EventRouter,
    /// Approval lifecycle service.
    pub approval_service: ApprovalService,
    /// Execution lifecycle service.
    pub execution_service: ExecutionService,
    /// Resume-job consumer for inline deployments.
    pub resumer: WorkflowResumer,
    /// How freshly created executions are driven.
    pub execution_mode: ExecutionMode,
    /// Worker identity used for inline queue drains.
    pub worker_id: String,
    /// Workflow version repository.
    pub workflow_store: Arc<dyn WorkflowStore>,
    /// Execution repository for listings.
    pub execution_store: Arc<dyn ExecutionStore>,
    /// Postgres pool for health probes.
    pub postgres_pool: PgPool,
    /// Optional Redis client for health probes.
    pub redis_client: Option<redis::Client>,
}

impl AppState {
    /// Processes queued jobs inline when no worker runtime is deployed.
    ///
    /// A no-op in queued mode; failures log inside the drain and never
    /// surface to the API caller.
    pub async fn drain_inline_jobs(&self) {
        if self.execution_mode != ExecutionMode::Inline {
            return;
        }

        if let Err(error) = self.resumer.drain_queue(self.worker_id.as_str(), 16, 30).await {
            tracing::warn!(error = %error, "inline queue drain failed");
        }
    }
}
