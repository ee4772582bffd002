use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use trellis_core::{AppError, AppResult, ApprovalId, EventId, ExecutionId, JobId, WorkflowRef};
use trellis_domain::WorkflowDefinition;

/// One published, immutable workflow version row.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedWorkflow {
    /// Internal primary key of this version row.
    pub id: WorkflowRef,
    /// Stable workflow identity shared across versions.
    pub workflow_id: String,
    /// Version label; the router picks the lexicographically greatest.
    pub version: String,
    /// User-facing workflow name.
    pub name: String,
    /// Whether this version participates in routing.
    pub enabled: bool,
    /// Free-form classification tags.
    pub tags: Vec<String>,
    /// Validated step graph and trigger.
    pub definition: WorkflowDefinition,
    /// Publish timestamp.
    pub created_at: DateTime<Utc>,
    /// Last enablement-flag change.
    pub updated_at: DateTime<Utc>,
}

/// Payload for publishing one workflow version.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishWorkflowInput {
    /// Stable workflow identity.
    pub workflow_id: String,
    /// Version label, unique per workflow identity.
    pub version: String,
    /// User-facing workflow name.
    pub name: String,
    /// Whether the version is immediately routable.
    pub enabled: bool,
    /// Free-form classification tags.
    pub tags: Vec<String>,
    /// Validated definition.
    pub definition: WorkflowDefinition,
}

/// One ingested external event, persisted for audit.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    /// Event identifier; unique, client-suppliable for idempotent ingest.
    pub id: EventId,
    /// Event type matched against workflow triggers.
    pub event_type: String,
    /// Originating system.
    pub source: String,
    /// Arbitrary JSON payload.
    pub payload: Value,
    /// Ingress timestamp.
    pub received_at: DateTime<Utc>,
}

/// Ingress payload for one event.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestEventInput {
    /// Optional client-supplied id; duplicates are accepted only once.
    pub id: Option<EventId>,
    /// Event type.
    pub event_type: String,
    /// Originating system.
    pub source: String,
    /// Arbitrary JSON payload.
    pub payload: Value,
}

/// Lifecycle status of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Created but not yet picked up by a driver.
    Pending,
    /// Actively advancing through the step loop.
    Running,
    /// Durably suspended on a wait record.
    Waiting,
    /// Suspended by a shutting-down driver; resumes on next boot.
    Paused,
    /// Finished the step graph.
    Completed,
    /// Failed a step with retries exhausted.
    Failed,
    /// Terminated by a rejecting decision.
    Blocked,
    /// Cancelled cooperatively.
    Cancelled,
}

impl ExecutionStatus {
    /// Returns stable storage value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Waiting => "waiting",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parses storage value.
    pub fn parse(value: &str) -> AppResult<Self> {
        match value {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "waiting" => Ok(Self::Waiting),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "blocked" => Ok(Self::Blocked),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(AppError::Validation(format!(
                "unknown execution status '{value}'"
            ))),
        }
    }

    /// Returns whether the status is terminal.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Blocked | Self::Cancelled
        )
    }

    /// Returns whether a resume signal may re-enter the step loop.
    #[must_use]
    pub fn is_resumable(&self) -> bool {
        matches!(self, Self::Waiting | Self::Paused)
    }
}

/// Terminal outcome recorded on one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionResult {
    /// The flow reached an allowing decision.
    Allowed,
    /// The flow reached a blocking decision.
    Blocked,
    /// The flow finished its side effects without a scalar decision.
    Executed,
}

impl ExecutionResult {
    /// Returns stable storage value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allowed => "allowed",
            Self::Blocked => "blocked",
            Self::Executed => "executed",
        }
    }

    /// Parses storage value.
    pub fn parse(value: &str) -> AppResult<Self> {
        match value {
            "allowed" => Ok(Self::Allowed),
            "blocked" => Ok(Self::Blocked),
            "executed" => Ok(Self::Executed),
            _ => Err(AppError::Validation(format!(
                "unknown execution result '{value}'"
            ))),
        }
    }
}

/// Persisted execution record.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionRecord {
    /// Execution identifier.
    pub id: ExecutionId,
    /// Workflow version row this execution runs.
    pub workflow_ref: WorkflowRef,
    /// Event that started the execution, when event-triggered.
    pub trigger_event_id: Option<EventId>,
    /// Lifecycle status.
    pub status: ExecutionStatus,
    /// Terminal outcome when present.
    pub result: Option<ExecutionResult>,
    /// Step the driver is at, or resumes from.
    pub current_step_id: Option<String>,
    /// Evolving context object.
    pub context: Value,
    /// Failure details for failed executions.
    pub error_message: Option<String>,
    /// Execution start timestamp.
    pub started_at: DateTime<Utc>,
    /// Terminal transition timestamp.
    pub completed_at: Option<DateTime<Utc>>,
}

/// Creation payload for one execution.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateExecutionInput {
    /// Workflow version row to run.
    pub workflow_ref: WorkflowRef,
    /// Originating event, when event-triggered.
    pub trigger_event_id: Option<EventId>,
    /// Initial status: `Running` inline, `Pending` when queued.
    pub status: ExecutionStatus,
    /// Entry step id.
    pub current_step_id: Option<String>,
    /// Initial context object.
    pub context: Value,
}

/// Execution listing filters.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecutionListQuery {
    /// Restrict to executions of one workflow identity.
    pub workflow_id: Option<String>,
    /// Restrict to one status.
    pub status: Option<ExecutionStatus>,
    /// Page size.
    pub limit: usize,
    /// Row offset.
    pub offset: usize,
}

/// Status of one step-execution attempt row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepExecutionStatus {
    /// Attempt is in flight.
    Running,
    /// Attempt finished and produced an outcome.
    Completed,
    /// Attempt failed.
    Failed,
    /// Attempt suspended the execution on a wait.
    Paused,
}

impl StepExecutionStatus {
    /// Returns stable storage value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Paused => "paused",
        }
    }

    /// Parses storage value.
    pub fn parse(value: &str) -> AppResult<Self> {
        match value {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "paused" => Ok(Self::Paused),
            _ => Err(AppError::Validation(format!(
                "unknown step execution status '{value}'"
            ))),
        }
    }
}

/// Append-only record of one step attempt within an execution.
#[derive(Debug, Clone, PartialEq)]
pub struct StepExecutionRecord {
    /// Owning execution.
    pub execution_id: ExecutionId,
    /// Step id inside the definition.
    pub step_id: String,
    /// 1-based attempt sequence.
    pub attempt: i32,
    /// Attempt status.
    pub status: StepExecutionStatus,
    /// Context snapshot the attempt started from.
    pub input: Value,
    /// Step output when completed.
    pub output: Option<Value>,
    /// Failure details when failed.
    pub error_message: Option<String>,
    /// Attempt start timestamp.
    pub started_at: DateTime<Utc>,
    /// Attempt finish timestamp.
    pub completed_at: Option<DateTime<Utc>>,
}

/// Approval request status; leaves `pending` exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    /// Awaiting a decision.
    Pending,
    /// Approved by a decider.
    Approved,
    /// Rejected by a decider.
    Rejected,
    /// Expired by the expiration sweep.
    Expired,
}

impl ApprovalStatus {
    /// Returns stable storage value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
        }
    }

    /// Parses storage value.
    pub fn parse(value: &str) -> AppResult<Self> {
        match value {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "expired" => Ok(Self::Expired),
            _ => Err(AppError::Validation(format!(
                "unknown approval status '{value}'"
            ))),
        }
    }

    /// Returns whether the status is terminal.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Persisted approval request.
#[derive(Debug, Clone, PartialEq)]
pub struct ApprovalRecord {
    /// Approval identifier.
    pub id: ApprovalId,
    /// Execution paused on this approval.
    pub execution_id: ExecutionId,
    /// Step that opened the approval.
    pub step_id: String,
    /// Optional business entity the approval concerns.
    pub entity_type: Option<String>,
    /// Optional business entity identifier.
    pub entity_id: Option<String>,
    /// Optional requesting principal.
    pub requester_id: Option<String>,
    /// Role whose members may decide.
    pub approver_role: String,
    /// Deciding principal once decided.
    pub approver_id: Option<String>,
    /// Request status.
    pub status: ApprovalStatus,
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

/// Creation payload for one approval request.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateApprovalInput {
    /// Execution to pause.
    pub execution_id: ExecutionId,
    /// Step opening the approval.
    pub step_id: String,
    /// Role whose members may decide.
    pub approver_role: String,
    /// Justification shown to approvers.
    pub reason: String,
    /// Optional time-to-live in seconds.
    pub ttl_seconds: Option<u64>,
    /// Optional business entity the approval concerns.
    pub entity_type: Option<String>,
    /// Optional business entity identifier.
    pub entity_id: Option<String>,
    /// Optional requesting principal.
    pub requester_id: Option<String>,
}

/// Approval listing filters.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ApprovalListQuery {
    /// Restrict to one status.
    pub status: Option<ApprovalStatus>,
    /// Restrict to one approver role.
    pub approver_role: Option<String>,
    /// Page size.
    pub limit: usize,
    /// Row offset.
    pub offset: usize,
}

/// Kind of external signal a wait record is blocked on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitKind {
    /// Waiting for a named event.
    Event,
    /// Waiting for an approval decision.
    Approval,
}

impl WaitKind {
    /// Returns stable storage value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Event => "event",
            Self::Approval => "approval",
        }
    }

    /// Parses storage value.
    pub fn parse(value: &str) -> AppResult<Self> {
        match value {
            "event" => Ok(Self::Event),
            "approval" => Ok(Self::Approval),
            _ => Err(AppError::Validation(format!("unknown wait kind '{value}'"))),
        }
    }
}

/// Durable marker that one step is blocked awaiting an external signal.
#[derive(Debug, Clone, PartialEq)]
pub struct WaitRecord {
    /// Suspended execution.
    pub execution_id: ExecutionId,
    /// Step the execution is suspended on.
    pub step_id: String,
    /// Signal kind.
    pub wait_kind: WaitKind,
    /// Event name for event waits.
    pub event_name: Option<String>,
    /// Approval id for approval waits.
    pub approval_id: Option<ApprovalId>,
    /// Deadline after which the timeout successor is taken.
    pub timeout_at: Option<DateTime<Utc>>,
    /// Successor taken on timeout.
    pub on_timeout_step_id: Option<String>,
}

/// Kind of durable engine job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineJobKind {
    /// Drive a pending execution from its entry step.
    Start,
    /// Re-enter a suspended execution with a resume signal.
    Resume,
}

impl EngineJobKind {
    /// Returns stable storage value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Resume => "resume",
        }
    }

    /// Parses storage value.
    pub fn parse(value: &str) -> AppResult<Self> {
        match value {
            "start" => Ok(Self::Start),
            "resume" => Ok(Self::Resume),
            _ => Err(AppError::Validation(format!(
                "unknown engine job kind '{value}'"
            ))),
        }
    }
}

/// External signal a resume job carries back into a suspended execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResumeTrigger {
    /// An approval request left `pending`.
    Approval {
        /// Decided or expired approval.
        approval_id: ApprovalId,
    },
    /// An awaited event arrived.
    EventMatched {
        /// Matched event name.
        event_name: String,
        /// Payload of the matched event.
        payload: Value,
    },
    /// A wait record passed its deadline.
    WaitTimeout,
}

/// One claimed engine job, fenced by a lease token.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimedEngineJob {
    /// Job identifier.
    pub job_id: JobId,
    /// Job kind.
    pub kind: EngineJobKind,
    /// Execution the job drives.
    pub execution_id: ExecutionId,
    /// Resume signal for resume jobs.
    pub resume_trigger: Option<ResumeTrigger>,
    /// Lease token used for fenced completion.
    pub lease_token: String,
}

#[cfg(test)]
mod tests {
    use super::{ApprovalStatus, ExecutionStatus, StepExecutionStatus};

    #[test]
    fn execution_status_round_trips_through_storage_form() {
        for status in [
            ExecutionStatus::Pending,
            ExecutionStatus::Running,
            ExecutionStatus::Waiting,
            ExecutionStatus::Paused,
            ExecutionStatus::Completed,
            ExecutionStatus::Failed,
            ExecutionStatus::Blocked,
            ExecutionStatus::Cancelled,
        ] {
            assert_eq!(ExecutionStatus::parse(status.as_str()).ok(), Some(status));
        }

        assert!(ExecutionStatus::parse("bogus").is_err());
    }

    #[test]
    fn terminal_and_resumable_statuses_are_disjoint() {
        for status in [ExecutionStatus::Waiting, ExecutionStatus::Paused] {
            assert!(status.is_resumable());
            assert!(!status.is_terminal());
        }

        assert!(ExecutionStatus::Blocked.is_terminal());
        assert!(!ExecutionStatus::Running.is_resumable());
    }

    #[test]
    fn approval_status_pending_is_the_only_non_terminal() {
        assert!(!ApprovalStatus::Pending.is_terminal());
        assert!(ApprovalStatus::Approved.is_terminal());
        assert!(ApprovalStatus::Rejected.is_terminal());
        assert!(ApprovalStatus::Expired.is_terminal());
    }

    #[test]
    fn step_execution_status_parses_storage_values() {
        assert_eq!(
            StepExecutionStatus::parse("paused").ok(),
            Some(StepExecutionStatus::Paused)
        );
        assert!(StepExecutionStatus::parse("unknown").is_err());
    }
}
