use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use trellis_core::{AppResult, ApprovalId, ExecutionId};
use trellis_domain::HttpMethod;

use super::records::ExecutionResult;

/// Port delivering notification messages to recipients.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Hands one message to the notification transport.
    async fn notify(&self, recipients: &[String], message: &str) -> AppResult<()>;
}

/// Port for record CRUD side effects of execute steps.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Creates one record; idempotency key supplied by the caller in `data`.
    async fn create_record(&self, entity: &str, data: Value) -> AppResult<Value>;

    /// Updates one record; missing records are a permanent failure.
    async fn update_record(&self, entity: &str, entity_id: &str, data: Value) -> AppResult<Value>;

    /// Deletes one record; missing records are a permanent failure.
    async fn delete_record(&self, entity: &str, entity_id: &str) -> AppResult<()>;
}

/// Outbound webhook or http_request dispatch payload.
#[derive(Debug, Clone)]
pub struct WebhookRequest {
    /// Target URL.
    pub url: String,
    /// HTTP method.
    pub method: HttpMethod,
    /// Extra request headers.
    pub headers: Map<String, Value>,
    /// JSON request body.
    pub body: Option<Value>,
    /// Stable idempotency key attached to the request.
    pub idempotency_key: String,
    /// Request deadline in seconds.
    pub timeout_seconds: u64,
}

/// Captured response of one webhook dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookResponse {
    /// Upstream HTTP status code.
    pub status: u16,
    /// Response body, parsed as JSON when possible.
    pub body: Value,
}

/// Port sending outbound HTTP requests for webhook actions.
///
/// Implementations map 5xx responses to `Transient`, elapsed deadlines to
/// `Timeout`, and 4xx responses to `Permanent` so the step retry policy can
/// classify the failure.
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    /// Sends one request and captures status plus response body.
    async fn dispatch(&self, request: WebhookRequest) -> AppResult<WebhookResponse>;
}

/// State transition published to lifecycle subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// An execution entered the step loop.
    ExecutionStarted {
        /// Execution identifier.
        execution_id: ExecutionId,
    },
    /// An execution reached `completed`.
    ExecutionCompleted {
        /// Execution identifier.
        execution_id: ExecutionId,
        /// Terminal result when present.
        result: Option<ExecutionResult>,
    },
    /// An execution reached `failed`.
    ExecutionFailed {
        /// Execution identifier.
        execution_id: ExecutionId,
        /// Failure details.
        error: String,
    },
    /// An execution suspended on a wait or approval.
    ExecutionPaused {
        /// Execution identifier.
        execution_id: ExecutionId,
        /// Wait key, `approval:<id>` or `event:<name>`.
        wait_key: String,
    },
    /// A suspended execution re-entered the step loop.
    ExecutionResumed {
        /// Execution identifier.
        execution_id: ExecutionId,
    },
    /// An execution was cancelled.
    ExecutionCancelled {
        /// Execution identifier.
        execution_id: ExecutionId,
        /// Cancellation reason.
        reason: String,
    },
    /// A step attempt started.
    StepStarted {
        /// Execution identifier.
        execution_id: ExecutionId,
        /// Step identifier.
        step_id: String,
    },
    /// A step attempt completed.
    StepCompleted {
        /// Execution identifier.
        execution_id: ExecutionId,
        /// Step identifier.
        step_id: String,
    },
    /// A step attempt failed.
    StepFailed {
        /// Execution identifier.
        execution_id: ExecutionId,
        /// Step identifier.
        step_id: String,
        /// Failure details.
        error: String,
    },
    /// An approval request was opened.
    ApprovalRequested {
        /// Approval identifier.
        approval_id: ApprovalId,
        /// Execution paused on the approval.
        execution_id: ExecutionId,
    },
}

/// One-way sink for lifecycle events.
///
/// Publishing is best-effort; services log sink failures and continue.
#[async_trait]
pub trait LifecycleEventSink: Send + Sync {
    /// Publishes one lifecycle event.
    async fn publish(&self, event: LifecycleEvent) -> AppResult<()>;
}
