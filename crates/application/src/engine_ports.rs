mod effects;
mod lease;
mod records;
mod repository;

pub use effects::{
    LifecycleEvent, LifecycleEventSink, Notifier, RecordStore, WebhookRequest, WebhookResponse,
    WebhookTransport,
};
pub use lease::{ExecutionLease, ExecutionLeaseCoordinator};
pub use records::{
    ApprovalListQuery, ApprovalRecord, ApprovalStatus, ClaimedEngineJob, CreateApprovalInput,
    CreateExecutionInput, EngineJobKind, EventRecord, ExecutionListQuery, ExecutionRecord,
    ExecutionResult, ExecutionStatus, IngestEventInput, PublishWorkflowInput, PublishedWorkflow,
    ResumeTrigger, StepExecutionRecord, StepExecutionStatus, WaitKind, WaitRecord,
};
pub use repository::{ApprovalStore, EngineJobQueue, EventStore, ExecutionStore, WorkflowStore};
