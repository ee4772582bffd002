use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use trellis_core::{AppResult, ApprovalId, EventId, ExecutionId, JobId, WorkflowRef};

use super::records::{
    ApprovalListQuery, ApprovalRecord, ApprovalStatus, ClaimedEngineJob, CreateApprovalInput,
    CreateExecutionInput, EventRecord, ExecutionListQuery, ExecutionRecord, ExecutionResult,
    ExecutionStatus, IngestEventInput, PublishWorkflowInput, PublishedWorkflow, ResumeTrigger,
    StepExecutionRecord, StepExecutionStatus, WaitRecord,
};

/// Repository port for published workflow versions.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Publishes one immutable workflow version.
    ///
    /// A duplicate `(workflow_id, version)` pair is a conflict.
    async fn publish(&self, input: PublishWorkflowInput) -> AppResult<PublishedWorkflow>;

    /// Returns one version row by internal key.
    async fn find_by_ref(&self, workflow_ref: WorkflowRef) -> AppResult<Option<PublishedWorkflow>>;

    /// Lists every version of one workflow identity, newest version first.
    async fn list_versions(&self, workflow_id: &str) -> AppResult<Vec<PublishedWorkflow>>;

    /// Lists the latest version of every workflow identity.
    async fn list_latest(&self) -> AppResult<Vec<PublishedWorkflow>>;

    /// Flips the enabled flag on one version.
    async fn set_enabled(&self, workflow_id: &str, version: &str, enabled: bool) -> AppResult<()>;

    /// Lists every enabled version whose trigger matches the given key.
    ///
    /// Version selection per workflow identity is the router's concern.
    async fn list_enabled_for_trigger(
        &self,
        trigger_type: &str,
        match_key: &str,
    ) -> AppResult<Vec<PublishedWorkflow>>;
}

/// Repository port for ingested events.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Persists one event.
    ///
    /// Returns the stored record and whether this call inserted it; a
    /// duplicate id returns the existing row with `false`.
    async fn insert(&self, input: IngestEventInput) -> AppResult<(EventRecord, bool)>;

    /// Returns one event by id.
    async fn find(&self, event_id: EventId) -> AppResult<Option<EventRecord>>;
}

/// Repository port for executions, step attempts, and wait records.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Creates one execution row.
    async fn create(&self, input: CreateExecutionInput) -> AppResult<ExecutionRecord>;

    /// Returns one execution by id.
    async fn find(&self, execution_id: ExecutionId) -> AppResult<Option<ExecutionRecord>>;

    /// Lists executions with optional filters, newest first.
    async fn list(&self, query: ExecutionListQuery) -> AppResult<Vec<ExecutionRecord>>;

    /// Marks one execution running at the given step.
    async fn mark_running(
        &self,
        execution_id: ExecutionId,
        current_step_id: Option<&str>,
        context: &Value,
    ) -> AppResult<()>;

    /// Advances the current step pointer and persists the evolved context.
    async fn advance_step(
        &self,
        execution_id: ExecutionId,
        current_step_id: &str,
        context: &Value,
    ) -> AppResult<()>;

    /// Atomically suspends one execution and persists its wait record.
    ///
    /// The status flip and the wait record commit together, so a matching
    /// event never observes one without the other.
    async fn suspend(
        &self,
        execution_id: ExecutionId,
        status: ExecutionStatus,
        context: &Value,
        wait: WaitRecord,
    ) -> AppResult<()>;

    /// Persists the evolved context without moving the step pointer.
    async fn save_context(&self, execution_id: ExecutionId, context: &Value) -> AppResult<()>;

    /// Marks one running execution paused at its current step.
    ///
    /// Used by a shutting-down driver so the next boot resumes from
    /// persisted state. A no-op when the execution is no longer running.
    async fn pause(&self, execution_id: ExecutionId) -> AppResult<()>;

    /// Records a terminal transition.
    ///
    /// Transitions on an already-terminal execution are a conflict.
    async fn complete(
        &self,
        execution_id: ExecutionId,
        status: ExecutionStatus,
        result: Option<ExecutionResult>,
        error_message: Option<&str>,
    ) -> AppResult<ExecutionRecord>;

    /// Appends one step attempt row in `running` state.
    async fn start_step(
        &self,
        execution_id: ExecutionId,
        step_id: &str,
        attempt: i32,
        input: &Value,
    ) -> AppResult<()>;

    /// Finalizes one step attempt row.
    async fn finish_step(
        &self,
        execution_id: ExecutionId,
        step_id: &str,
        attempt: i32,
        status: StepExecutionStatus,
        output: Option<&Value>,
        error_message: Option<&str>,
    ) -> AppResult<()>;

    /// Lists step attempt rows in the order they were produced.
    async fn list_step_executions(
        &self,
        execution_id: ExecutionId,
    ) -> AppResult<Vec<StepExecutionRecord>>;

    /// Consumes the open wait record of one execution.
    ///
    /// Returns false when no open record exists, making resume idempotent.
    async fn consume_wait(&self, execution_id: ExecutionId) -> AppResult<bool>;

    /// Returns the open wait record of one execution.
    async fn find_open_wait(&self, execution_id: ExecutionId) -> AppResult<Option<WaitRecord>>;

    /// Lists open event waits matching one event name.
    async fn list_open_waits_for_event(&self, event_name: &str) -> AppResult<Vec<WaitRecord>>;

    /// Lists open waits whose deadline has passed.
    async fn list_expired_waits(&self, now: DateTime<Utc>) -> AppResult<Vec<WaitRecord>>;
}

/// Repository port for approval requests.
#[async_trait]
pub trait ApprovalStore: Send + Sync {
    /// Inserts one pending approval.
    async fn insert(
        &self,
        input: CreateApprovalInput,
        expires_at: Option<DateTime<Utc>>,
    ) -> AppResult<ApprovalRecord>;

    /// Returns one approval by id.
    async fn find(&self, approval_id: ApprovalId) -> AppResult<Option<ApprovalRecord>>;

    /// Lists approvals with optional filters, newest first.
    async fn list(&self, query: ApprovalListQuery) -> AppResult<Vec<ApprovalRecord>>;

    /// Compare-and-set transition out of `pending`.
    ///
    /// Exactly one concurrent transition wins; the rest observe a conflict.
    async fn transition(
        &self,
        approval_id: ApprovalId,
        to: ApprovalStatus,
        approver_id: Option<&str>,
        decision_reason: Option<&str>,
    ) -> AppResult<ApprovalRecord>;

    /// Lists pending approvals whose deadline has passed.
    async fn list_expirable(&self, now: DateTime<Utc>) -> AppResult<Vec<ApprovalRecord>>;

    /// Lists decided approvals whose execution is still suspended.
    ///
    /// Feeds the crash-recovery resume sweep.
    async fn list_unresumed(&self) -> AppResult<Vec<ApprovalRecord>>;
}

/// Durable queue port for start and resume jobs.
#[async_trait]
pub trait EngineJobQueue: Send + Sync {
    /// Enqueues a job that drives one pending execution.
    async fn enqueue_start(&self, execution_id: ExecutionId) -> AppResult<()>;

    /// Enqueues a job that re-enters one suspended execution.
    async fn enqueue_resume(
        &self,
        execution_id: ExecutionId,
        trigger: &ResumeTrigger,
    ) -> AppResult<()>;

    /// Claims pending jobs for one worker with a bounded lease.
    async fn claim(
        &self,
        worker_id: &str,
        limit: usize,
        lease_seconds: u32,
    ) -> AppResult<Vec<ClaimedEngineJob>>;

    /// Marks one leased job completed; fenced by the lease token.
    async fn complete(&self, job_id: JobId, worker_id: &str, lease_token: &str) -> AppResult<()>;

    /// Marks one leased job failed; fenced by the lease token.
    async fn fail(
        &self,
        job_id: JobId,
        worker_id: &str,
        lease_token: &str,
        error_message: &str,
    ) -> AppResult<()>;
}
