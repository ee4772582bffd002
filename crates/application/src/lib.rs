//! Engine services and ports: routing, execution, approvals, resumption.

#![forbid(unsafe_code)]

/// Approval request lifecycle service.
pub mod approval_service;
/// Ports and runtime records shared by engine services and adapters.
pub mod engine_ports;
/// Event-to-workflow routing.
pub mod event_router;
/// Execution lifecycle and the step loop.
pub mod execution_service;
/// Resume-job consumption and sweeps.
pub mod resumer;
/// Process-wide engine runtime state.
pub mod runtime;

pub use approval_service::{ApprovalDecision, ApprovalService};
pub use engine_ports::{
    ApprovalListQuery, ApprovalRecord, ApprovalStatus, ApprovalStore, ClaimedEngineJob,
    CreateApprovalInput, CreateExecutionInput, EngineJobKind, EngineJobQueue, EventRecord,
    EventStore, ExecutionLease, ExecutionLeaseCoordinator, ExecutionListQuery, ExecutionRecord,
    ExecutionResult, ExecutionStatus, ExecutionStore, IngestEventInput, LifecycleEvent,
    LifecycleEventSink, Notifier, PublishWorkflowInput, PublishedWorkflow, RecordStore,
    ResumeTrigger, StepExecutionRecord, StepExecutionStatus, WaitKind, WaitRecord, WebhookRequest,
    WebhookResponse, WebhookTransport, WorkflowStore,
};
pub use event_router::{EventRouter, RoutedEvent};
pub use execution_service::{
    ExecutionMode, ExecutionService, ExecutionServiceDeps, PendingWait, ResumeDirective,
    ResumeTarget, StepOutcome, StepTermination,
};
pub use resumer::{JobOutcome, WorkflowResumer};
pub use runtime::EngineRuntime;
