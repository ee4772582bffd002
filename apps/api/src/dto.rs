use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use trellis_application::{
    ApprovalRecord, ExecutionRecord, PublishedWorkflow, RoutedEvent, StepExecutionRecord,
};
use trellis_domain::WorkflowDefinition;

/// Event ingress payload.
#[derive(Debug, Deserialize)]
pub struct IngestEventRequest {
    /// Optional client-supplied id for idempotent ingest.
    pub id: Option<uuid::Uuid>,
    /// Event type matched against workflow triggers.
    pub event_type: String,
    /// Originating system; defaults to `api`.
    pub source: Option<String>,
    /// Arbitrary JSON payload.
    #[serde(default)]
    pub payload: Value,
}

/// Event ingress acknowledgement.
#[derive(Debug, Serialize)]
pub struct IngestEventResponse {
    /// Persisted event id.
    pub event_id: String,
    /// True when the event id had been ingested before.
    pub deduplicated: bool,
    /// Executions started by this event.
    pub executions_started: Vec<String>,
    /// Resume jobs enqueued for waiting executions.
    pub resumes_enqueued: usize,
}

impl From<RoutedEvent> for IngestEventResponse {
    fn from(routed: RoutedEvent) -> Self {
        Self {
            event_id: routed.event.id.to_string(),
            deduplicated: routed.deduplicated,
            executions_started: routed
                .executions_started
                .iter()
                .map(ToString::to_string)
                .collect(),
            resumes_enqueued: routed.resumes_enqueued,
        }
    }
}

/// Schedule tick dispatch payload.
#[derive(Debug, Deserialize)]
pub struct DispatchScheduleTickRequest {
    /// Cron expression identifying the schedule.
    pub cron: String,
    /// Tick payload handed to matched workflows.
    #[serde(default)]
    pub payload: Value,
}

/// Workflow publish payload.
#[derive(Debug, Deserialize)]
pub struct PublishWorkflowRequest {
    /// Stable workflow identity.
    pub workflow_id: String,
    /// Version label, unique per workflow identity.
    pub version: String,
    /// User-facing name; defaults to the workflow id.
    pub name: Option<String>,
    /// Whether the version is immediately routable; defaults to true.
    pub enabled: Option<bool>,
    /// Free-form classification tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Trigger and step graph.
    pub definition: WorkflowDefinition,
}

/// Published workflow version.
#[derive(Debug, Serialize)]
pub struct WorkflowResponse {
    /// Stable workflow identity.
    pub workflow_id: String,
    /// Version label.
    pub version: String,
    /// User-facing name.
    pub name: String,
    /// Routability flag.
    pub enabled: bool,
    /// Classification tags.
    pub tags: Vec<String>,
    /// Trigger and step graph.
    pub definition: WorkflowDefinition,
    /// Publish timestamp.
    pub created_at: DateTime<Utc>,
    /// Last enablement change.
    pub updated_at: DateTime<Utc>,
}

impl From<PublishedWorkflow> for WorkflowResponse {
    fn from(workflow: PublishedWorkflow) -> Self {
        Self {
            workflow_id: workflow.workflow_id,
            version: workflow.version,
            name: workflow.name,
            enabled: workflow.enabled,
            tags: workflow.tags,
            definition: workflow.definition,
            created_at: workflow.created_at,
            updated_at: workflow.updated_at,
        }
    }
}

/// Enablement-flag change payload.
#[derive(Debug, Deserialize)]
pub struct SetWorkflowEnabledRequest {
    /// Version to change.
    pub version: String,
    /// New flag value.
    pub enabled: bool,
}

/// Synthetic test event payload.
#[derive(Debug, Deserialize)]
pub struct TestWorkflowRequest {
    /// Trigger payload handed to the execution.
    #[serde(default)]
    pub payload: Value,
}

/// Synthetic test event acknowledgement.
#[derive(Debug, Serialize)]
pub struct TestWorkflowResponse {
    /// Started execution id.
    pub execution_id: String,
}

/// Approval decision payload.
#[derive(Debug, Deserialize)]
pub struct DecideApprovalRequest {
    /// Deciding principal.
    pub approver_id: String,
    /// Optional decision comment.
    pub comment: Option<String>,
}

/// Approval listing filters.
#[derive(Debug, Deserialize)]
pub struct ApprovalListRequest {
    /// Restrict to one status.
    pub status: Option<String>,
    /// Restrict to one approver role.
    pub approver_role: Option<String>,
    /// Page size.
    pub limit: Option<usize>,
    /// Row offset.
    pub offset: Option<usize>,
}

/// Approval request view.
#[derive(Debug, Serialize)]
pub struct ApprovalResponse {
    /// Approval id.
    pub id: String,
    /// Paired execution id.
    pub execution_id: String,
    /// Step that opened the approval.
    pub step_id: String,
    /// Role whose members may decide.
    pub approver_role: String,
    /// Deciding principal once decided.
    pub approver_id: Option<String>,
    /// Request status.
    pub status: String,
    /// Justification recorded at creation.
    pub reason: String,
    /// Comment recorded with the decision.
    pub decision_reason: Option<String>,
    /// Creation timestamp.
    pub requested_at: DateTime<Utc>,
    /// Decision or expiry timestamp.
    pub decided_at: Option<DateTime<Utc>>,
    /// Automatic expiration deadline.
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<ApprovalRecord> for ApprovalResponse {
    fn from(approval: ApprovalRecord) -> Self {
        Self {
            id: approval.id.to_string(),
            execution_id: approval.execution_id.to_string(),
            step_id: approval.step_id,
            approver_role: approval.approver_role,
            approver_id: approval.approver_id,
            status: approval.status.as_str().to_owned(),
            reason: approval.reason,
            decision_reason: approval.decision_reason,
            requested_at: approval.requested_at,
            decided_at: approval.decided_at,
            expires_at: approval.expires_at,
        }
    }
}

/// Execution listing filters.
#[derive(Debug, Deserialize)]
pub struct ExecutionListRequest {
    /// Restrict to one workflow identity.
    pub workflow_id: Option<String>,
    /// Restrict to one status.
    pub status: Option<String>,
    /// Page size.
    pub limit: Option<usize>,
    /// Row offset.
    pub offset: Option<usize>,
}

/// Execution view.
#[derive(Debug, Serialize)]
pub struct ExecutionResponse {
    /// Execution id.
    pub id: String,
    /// Workflow version row the execution runs.
    pub workflow_ref: String,
    /// Triggering event id, when event-triggered.
    pub trigger_event_id: Option<String>,
    /// Lifecycle status.
    pub status: String,
    /// Terminal result when present.
    pub result: Option<String>,
    /// Step the driver is at, or resumes from.
    pub current_step_id: Option<String>,
    /// Evolving context object.
    pub context: Value,
    /// Terminal reason or failure details.
    pub error_message: Option<String>,
    /// Start timestamp.
    pub started_at: DateTime<Utc>,
    /// Terminal transition timestamp.
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<ExecutionRecord> for ExecutionResponse {
    fn from(execution: ExecutionRecord) -> Self {
        Self {
            id: execution.id.to_string(),
            workflow_ref: execution.workflow_ref.to_string(),
            trigger_event_id: execution.trigger_event_id.map(|id| id.to_string()),
            status: execution.status.as_str().to_owned(),
            result: execution.result.map(|result| result.as_str().to_owned()),
            current_step_id: execution.current_step_id,
            context: execution.context,
            error_message: execution.error_message,
            started_at: execution.started_at,
            completed_at: execution.completed_at,
        }
    }
}

/// One step attempt view.
#[derive(Debug, Serialize)]
pub struct StepExecutionResponse {
    /// Step id inside the definition.
    pub step_id: String,
    /// 1-based attempt sequence.
    pub attempt: i32,
    /// Attempt status.
    pub status: String,
    /// Step output when completed.
    pub output: Option<Value>,
    /// Failure details when failed.
    pub error_message: Option<String>,
    /// Attempt start timestamp.
    pub started_at: DateTime<Utc>,
    /// Attempt finish timestamp.
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<StepExecutionRecord> for StepExecutionResponse {
    fn from(step: StepExecutionRecord) -> Self {
        Self {
            step_id: step.step_id,
            attempt: step.attempt,
            status: step.status.as_str().to_owned(),
            output: step.output,
            error_message: step.error_message,
            started_at: step.started_at,
            completed_at: step.completed_at,
        }
    }
}

/// Execution with its step rows.
#[derive(Debug, Serialize)]
pub struct ExecutionDetailResponse {
    /// Execution record.
    #[serde(flatten)]
    pub execution: ExecutionResponse,
    /// Step attempt rows in production order.
    pub steps: Vec<StepExecutionResponse>,
}

/// Cancellation payload.
#[derive(Debug, Deserialize)]
pub struct CancelExecutionRequest {
    /// Recorded cancellation reason.
    pub reason: Option<String>,
}
