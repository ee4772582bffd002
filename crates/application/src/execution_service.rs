use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{info, warn};
use trellis_core::{AppError, AppResult, ExecutionId};
use trellis_domain::{RetryKind, Step, StepKind};

use crate::approval_service::ApprovalService;
use crate::engine_ports::{
    CreateExecutionInput, EngineJobQueue, EventRecord, ExecutionLease, ExecutionLeaseCoordinator,
    ExecutionRecord, ExecutionResult, ExecutionStatus, ExecutionStore, LifecycleEvent,
    LifecycleEventSink, Notifier, PublishedWorkflow, RecordStore, StepExecutionRecord,
    StepExecutionStatus, WaitRecord, WebhookTransport, WorkflowStore,
};
use crate::runtime::EngineRuntime;

mod actions;
mod context;
mod parallel;
mod steps;

pub use steps::{PendingWait, StepOutcome, StepTermination};

/// How freshly created executions are driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Drive the step loop in the calling task.
    Inline,
    /// Enqueue a start job and let a worker drive the loop.
    Queued,
}

/// Where a resume signal sends a suspended execution.
#[derive(Debug, Clone, PartialEq)]
pub enum ResumeTarget {
    /// Continue the step loop from the given step.
    Step(String),
    /// Terminate without running further steps.
    Terminal {
        /// Terminal execution status.
        status: ExecutionStatus,
        /// Terminal result when applicable.
        result: Option<ExecutionResult>,
        /// Reason recorded on the execution.
        reason: Option<String>,
    },
}

/// Resolved resume instruction computed by the resumer.
#[derive(Debug, Clone, PartialEq)]
pub struct ResumeDirective {
    /// Context key the payload is merged under (`approval` or `event`).
    pub context_key: String,
    /// Resume payload merged into the execution context.
    pub payload: Value,
    /// Continuation target.
    pub target: ResumeTarget,
}

/// Owns execution lifecycles: creates them, drives the step loop, and
/// persists every state transition so a restart resumes deterministically.
#[derive(Clone)]
pub struct ExecutionService {
    workflow_store: Arc<dyn WorkflowStore>,
    execution_store: Arc<dyn ExecutionStore>,
    job_queue: Arc<dyn EngineJobQueue>,
    approval_service: ApprovalService,
    notifier: Arc<dyn Notifier>,
    record_store: Arc<dyn RecordStore>,
    webhook_transport: Arc<dyn WebhookTransport>,
    event_sink: Arc<dyn LifecycleEventSink>,
    lease_coordinator: Option<Arc<dyn ExecutionLeaseCoordinator>>,
    runtime: Arc<EngineRuntime>,
    mode: ExecutionMode,
    shutdown: Option<watch::Receiver<bool>>,
}

/// Dependency bundle for constructing an [`ExecutionService`].
pub struct ExecutionServiceDeps {
    /// Published workflow repository.
    pub workflow_store: Arc<dyn WorkflowStore>,
    /// Execution, step, and wait repository.
    pub execution_store: Arc<dyn ExecutionStore>,
    /// Durable start/resume job queue.
    pub job_queue: Arc<dyn EngineJobQueue>,
    /// Approval subsystem.
    pub approval_service: ApprovalService,
    /// Notification transport.
    pub notifier: Arc<dyn Notifier>,
    /// Record CRUD collaborator.
    pub record_store: Arc<dyn RecordStore>,
    /// Outbound HTTP transport.
    pub webhook_transport: Arc<dyn WebhookTransport>,
    /// Lifecycle event sink.
    pub event_sink: Arc<dyn LifecycleEventSink>,
    /// Process-wide runtime state.
    pub runtime: Arc<EngineRuntime>,
}

impl ExecutionService {
    /// Creates an execution service driving executions in the given mode.
    #[must_use]
    pub fn new(deps: ExecutionServiceDeps, mode: ExecutionMode) -> Self {
        Self {
            workflow_store: deps.workflow_store,
            execution_store: deps.execution_store,
            job_queue: deps.job_queue,
            approval_service: deps.approval_service,
            notifier: deps.notifier,
            record_store: deps.record_store,
            webhook_transport: deps.webhook_transport,
            event_sink: deps.event_sink,
            lease_coordinator: None,
            runtime: deps.runtime,
            mode,
            shutdown: None,
        }
    }

    /// Adds distributed per-execution lease coordination.
    #[must_use]
    pub fn with_lease_coordinator(
        mut self,
        lease_coordinator: Arc<dyn ExecutionLeaseCoordinator>,
    ) -> Self {
        self.lease_coordinator = Some(lease_coordinator);
        self
    }

    /// Adds a shutdown signal observed at step-loop safe points.
    ///
    /// When the signal flips, in-flight executions persist `paused` on
    /// their current step instead of advancing, so the next boot resumes
    /// them from stored state.
    #[must_use]
    pub fn with_shutdown_signal(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Starts one execution of a workflow.
    ///
    /// Persists the execution and, depending on the mode, drives the step
    /// loop inline or enqueues a start job for the worker pool.
    pub async fn start(
        &self,
        workflow: &PublishedWorkflow,
        event: Option<&EventRecord>,
        trigger_payload: Value,
    ) -> AppResult<ExecutionRecord> {
        let entry_step_id = workflow
            .definition
            .entry_step()
            .map(|step| step.id.clone())
            .ok_or_else(|| {
                AppError::Validation(format!(
                    "workflow '{}' version '{}' has no entry step",
                    workflow.workflow_id, workflow.version
                ))
            })?;

        let initial_status = match self.mode {
            ExecutionMode::Inline => ExecutionStatus::Running,
            ExecutionMode::Queued => ExecutionStatus::Pending,
        };

        let execution = self
            .execution_store
            .create(CreateExecutionInput {
                workflow_ref: workflow.id,
                trigger_event_id: event.map(|event| event.id),
                status: initial_status,
                current_step_id: Some(entry_step_id),
                context: context::initial_context(trigger_payload, event),
            })
            .await?;

        info!(
            execution_id = %execution.id,
            workflow_id = %workflow.workflow_id,
            version = %workflow.version,
            mode = ?self.mode,
            "execution created"
        );

        match self.mode {
            ExecutionMode::Inline => {
                self.emit(LifecycleEvent::ExecutionStarted {
                    execution_id: execution.id,
                })
                .await;
                self.drive(workflow, execution.id).await
            }
            ExecutionMode::Queued => {
                self.job_queue.enqueue_start(execution.id).await?;
                Ok(execution)
            }
        }
    }

    /// Drives one claimed start job.
    ///
    /// Idempotent for terminal executions. `waiting` executions are left
    /// to their resume signal; `paused` ones were interrupted by a
    /// shutdown and are driven forward from their current step.
    pub async fn run_start_job(&self, execution_id: ExecutionId) -> AppResult<ExecutionRecord> {
        let execution = self.load(execution_id).await?;

        if execution.status.is_terminal() || execution.status == ExecutionStatus::Waiting {
            return Ok(execution);
        }

        let workflow = self.load_workflow(&execution).await?;
        self.execution_store
            .mark_running(
                execution.id,
                execution.current_step_id.as_deref(),
                &execution.context,
            )
            .await?;
        self.emit(LifecycleEvent::ExecutionStarted {
            execution_id: execution.id,
        })
        .await;

        self.drive(&workflow, execution.id).await
    }

    /// Re-enters a suspended execution with a resolved resume directive.
    ///
    /// A no-op when the execution has already advanced past the wait, so
    /// duplicate resume jobs are harmless.
    pub async fn resume(
        &self,
        execution_id: ExecutionId,
        directive: ResumeDirective,
    ) -> AppResult<ExecutionRecord> {
        let execution = self.load(execution_id).await?;

        if !execution.status.is_resumable() {
            info!(
                execution_id = %execution_id,
                status = execution.status.as_str(),
                "resume skipped: execution is not suspended"
            );
            return Ok(execution);
        }

        // The wait record is consumed exactly once; a lost race here means
        // another resume already took the execution forward.
        if !self.execution_store.consume_wait(execution_id).await? {
            // A paused execution with no open wait was interrupted by a
            // shutdown after its wait had been consumed; drive it forward
            // from its current step instead of dropping the job.
            if execution.status == ExecutionStatus::Paused {
                let workflow = self.load_workflow(&execution).await?;
                self.execution_store
                    .mark_running(
                        execution_id,
                        execution.current_step_id.as_deref(),
                        &execution.context,
                    )
                    .await?;
                self.emit(LifecycleEvent::ExecutionResumed { execution_id }).await;
                return self.drive(&workflow, execution_id).await;
            }

            return self.load(execution_id).await;
        }

        let workflow = self.load_workflow(&execution).await?;
        let context = context::merge_resume_payload(
            &execution.context,
            directive.context_key.as_str(),
            directive.payload,
        );

        match directive.target {
            ResumeTarget::Terminal {
                status,
                result,
                reason,
            } => {
                self.execution_store
                    .save_context(execution_id, &context)
                    .await?;
                self.finish(execution_id, status, result, reason.as_deref())
                    .await
            }
            ResumeTarget::Step(step_id) => {
                if workflow.definition.find_step(step_id.as_str()).is_none() {
                    let message = format!(
                        "resume target step '{step_id}' does not exist in workflow '{}'",
                        workflow.workflow_id
                    );
                    return self
                        .finish(
                            execution_id,
                            ExecutionStatus::Failed,
                            None,
                            Some(message.as_str()),
                        )
                        .await;
                }

                self.execution_store
                    .advance_step(execution_id, step_id.as_str(), &context)
                    .await?;
                self.execution_store
                    .mark_running(execution_id, Some(step_id.as_str()), &context)
                    .await?;
                self.emit(LifecycleEvent::ExecutionResumed {
                    execution_id,
                })
                .await;

                self.drive(&workflow, execution_id).await
            }
        }
    }

    /// Cancels one execution.
    ///
    /// The in-flight driver observes the terminal status at its next safe
    /// point and stops; dispatched side effects are not compensated.
    pub async fn cancel(
        &self,
        execution_id: ExecutionId,
        reason: &str,
    ) -> AppResult<ExecutionRecord> {
        let cancelled = self
            .execution_store
            .complete(
                execution_id,
                ExecutionStatus::Cancelled,
                None,
                Some(reason),
            )
            .await?;

        self.emit(LifecycleEvent::ExecutionCancelled {
            execution_id,
            reason: reason.to_owned(),
        })
        .await;

        Ok(cancelled)
    }

    /// Returns one execution with its step rows.
    pub async fn find_with_steps(
        &self,
        execution_id: ExecutionId,
    ) -> AppResult<(ExecutionRecord, Vec<StepExecutionRecord>)> {
        let execution = self.load(execution_id).await?;
        let steps = self.execution_store.list_step_executions(execution_id).await?;
        Ok((execution, steps))
    }

    /// Step loop: interprets steps until the execution suspends or ends.
    async fn drive(
        &self,
        workflow: &PublishedWorkflow,
        execution_id: ExecutionId,
    ) -> AppResult<ExecutionRecord> {
        let lease = self.acquire_lease(execution_id).await?;
        let outcome = self.drive_under_lease(workflow, execution_id).await;
        self.release_lease(lease).await;
        outcome
    }

    async fn drive_under_lease(
        &self,
        workflow: &PublishedWorkflow,
        execution_id: ExecutionId,
    ) -> AppResult<ExecutionRecord> {
        let mut last_result: Option<ExecutionResult> = None;

        loop {
            let execution = self.load(execution_id).await?;

            // Safe point: a concurrent cancel terminates the loop here.
            if execution.status.is_terminal() {
                return Ok(execution);
            }

            // Shutdown safe point: persist `paused` on the current step so
            // the next boot's reclaimed job resumes from stored state.
            if self.shutdown_requested() {
                self.execution_store.pause(execution_id).await?;
                self.emit(LifecycleEvent::ExecutionPaused {
                    execution_id,
                    wait_key: "shutdown".to_owned(),
                })
                .await;

                return self.load(execution_id).await;
            }

            let Some(step_id) = execution.current_step_id.clone() else {
                return self
                    .finish(
                        execution_id,
                        ExecutionStatus::Completed,
                        last_result.or(Some(ExecutionResult::Executed)),
                        None,
                    )
                    .await;
            };

            let Some(step) = workflow.definition.find_step(step_id.as_str()) else {
                let message = format!(
                    "current step '{step_id}' does not exist in workflow '{}'",
                    workflow.workflow_id
                );
                return self
                    .finish(
                        execution_id,
                        ExecutionStatus::Failed,
                        None,
                        Some(message.as_str()),
                    )
                    .await;
            };

            let outcome = self
                .run_step_with_retry(&execution, step, last_result)
                .await;

            match outcome {
                Ok(StepOutcome::Advance {
                    next_step_id,
                    output,
                }) => {
                    let context =
                        context::record_step_output(&execution.context, step.id.as_str(), output);
                    self.execution_store
                        .advance_step(execution_id, next_step_id.as_str(), &context)
                        .await?;
                }
                Ok(StepOutcome::Terminal(StepTermination {
                    status,
                    result,
                    reason,
                    output,
                })) => {
                    let context =
                        context::record_step_output(&execution.context, step.id.as_str(), output);
                    self.execution_store
                        .save_context(execution_id, &context)
                        .await?;
                    return self
                        .finish(execution_id, status, result.or(last_result), reason.as_deref())
                        .await;
                }
                Ok(StepOutcome::Suspend {
                    wait,
                    wait_key,
                    output,
                }) => {
                    let context =
                        context::record_step_output(&execution.context, step.id.as_str(), output);
                    self.execution_store
                        .suspend(
                            execution_id,
                            ExecutionStatus::Waiting,
                            &context,
                            WaitRecord {
                                execution_id,
                                step_id: step.id.clone(),
                                wait_kind: wait.kind,
                                event_name: wait.event_name,
                                approval_id: wait.approval_id,
                                timeout_at: wait.timeout_at,
                                on_timeout_step_id: wait.on_timeout_step_id,
                            },
                        )
                        .await?;
                    self.emit(LifecycleEvent::ExecutionPaused {
                        execution_id,
                        wait_key,
                    })
                    .await;

                    return self.load(execution_id).await;
                }
                Err(error) => {
                    let message = error.to_string();
                    return self
                        .finish(
                            execution_id,
                            ExecutionStatus::Failed,
                            None,
                            Some(message.as_str()),
                        )
                        .await;
                }
            }

            // Condition branches and execute steps update the running
            // result only through their terminal outcomes; scalar allow
            // and block decisions always terminate above.
            if let StepKind::Execute { .. } = step.kind {
                last_result = Some(ExecutionResult::Executed);
            }
        }
    }

    /// Runs one step, appending one attempt row per try.
    async fn run_step_with_retry(
        &self,
        execution: &ExecutionRecord,
        step: &Step,
        last_result: Option<ExecutionResult>,
    ) -> AppResult<StepOutcome> {
        let mut attempt: u16 = 0;
        loop {
            attempt += 1;
            let attempt_number = i32::from(attempt);

            self.execution_store
                .start_step(execution.id, step.id.as_str(), attempt_number, &execution.context)
                .await?;
            if attempt == 1 {
                self.emit(LifecycleEvent::StepStarted {
                    execution_id: execution.id,
                    step_id: step.id.clone(),
                })
                .await;
            }

            match self.interpret_step(execution, step, last_result).await {
                Ok(outcome) => {
                    let (status, output) = match &outcome {
                        StepOutcome::Suspend { output, .. } => {
                            (StepExecutionStatus::Paused, output.clone())
                        }
                        StepOutcome::Advance { output, .. } => {
                            (StepExecutionStatus::Completed, output.clone())
                        }
                        StepOutcome::Terminal(termination) => {
                            (StepExecutionStatus::Completed, termination.output.clone())
                        }
                    };

                    self.execution_store
                        .finish_step(
                            execution.id,
                            step.id.as_str(),
                            attempt_number,
                            status,
                            output.as_ref(),
                            None,
                        )
                        .await?;
                    self.emit(LifecycleEvent::StepCompleted {
                        execution_id: execution.id,
                        step_id: step.id.clone(),
                    })
                    .await;

                    return Ok(outcome);
                }
                Err(error) => {
                    let message = error.to_string();
                    self.execution_store
                        .finish_step(
                            execution.id,
                            step.id.as_str(),
                            attempt_number,
                            StepExecutionStatus::Failed,
                            None,
                            Some(message.as_str()),
                        )
                        .await?;
                    self.emit(LifecycleEvent::StepFailed {
                        execution_id: execution.id,
                        step_id: step.id.clone(),
                        error: message.clone(),
                    })
                    .await;

                    let retry = step
                        .retry
                        .as_ref()
                        .is_some_and(|policy| policy.permits_any(retry_kinds(&error), attempt));

                    if !retry {
                        return Err(error);
                    }

                    let delay_ms = step
                        .retry
                        .as_ref()
                        .map(|policy| policy.backoff.delay_ms(attempt))
                        .unwrap_or(0);
                    warn!(
                        execution_id = %execution.id,
                        step_id = %step.id,
                        attempt,
                        delay_ms,
                        error = %message,
                        "step attempt failed; retrying after backoff"
                    );
                    tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                }
            }
        }
    }

    async fn finish(
        &self,
        execution_id: ExecutionId,
        status: ExecutionStatus,
        result: Option<ExecutionResult>,
        reason: Option<&str>,
    ) -> AppResult<ExecutionRecord> {
        let completed = self
            .execution_store
            .complete(execution_id, status, result, reason)
            .await?;

        let event = match status {
            ExecutionStatus::Failed => LifecycleEvent::ExecutionFailed {
                execution_id,
                error: reason.unwrap_or("execution failed").to_owned(),
            },
            ExecutionStatus::Cancelled => LifecycleEvent::ExecutionCancelled {
                execution_id,
                reason: reason.unwrap_or("cancelled").to_owned(),
            },
            _ => LifecycleEvent::ExecutionCompleted {
                execution_id,
                result,
            },
        };
        self.emit(event).await;

        info!(
            execution_id = %execution_id,
            status = status.as_str(),
            result = ?result.map(|result| result.as_str()),
            "execution finished"
        );

        Ok(completed)
    }

    async fn load(&self, execution_id: ExecutionId) -> AppResult<ExecutionRecord> {
        self.execution_store
            .find(execution_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("execution '{execution_id}' does not exist"))
            })
    }

    async fn load_workflow(&self, execution: &ExecutionRecord) -> AppResult<PublishedWorkflow> {
        self.workflow_store
            .find_by_ref(execution.workflow_ref)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "workflow row '{}' for execution '{}' does not exist",
                    execution.workflow_ref, execution.id
                ))
            })
    }

    async fn acquire_lease(
        &self,
        execution_id: ExecutionId,
    ) -> AppResult<Option<ExecutionLease>> {
        let Some(coordinator) = &self.lease_coordinator else {
            return Ok(None);
        };

        let lease = coordinator
            .try_acquire(
                execution_id,
                self.runtime.worker_id(),
                self.runtime.lease_seconds(),
            )
            .await?;

        lease.map(Some).ok_or_else(|| {
            AppError::Conflict(format!(
                "execution '{execution_id}' is leased by another worker"
            ))
        })
    }

    async fn release_lease(&self, lease: Option<ExecutionLease>) {
        let (Some(coordinator), Some(lease)) = (&self.lease_coordinator, lease) else {
            return;
        };

        if let Err(error) = coordinator.release(&lease).await {
            warn!(
                execution_id = %lease.execution_id,
                error = %error,
                "failed to release execution lease"
            );
        }
    }

    async fn emit(&self, event: LifecycleEvent) {
        if let Err(error) = self.event_sink.publish(event).await {
            warn!(error = %error, "failed to publish lifecycle event");
        }
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .is_some_and(|receiver| *receiver.borrow())
    }
}

/// Maps an error to the retry kinds it counts as.
///
/// Timeouts are a transient subkind; webhook 5xx responses surface as
/// `Transient` and therefore satisfy both `transient` and `http_5xx`.
fn retry_kinds(error: &AppError) -> &'static [RetryKind] {
    match error {
        AppError::Timeout(_) => &[RetryKind::Timeout, RetryKind::Transient],
        AppError::Transient(_) => &[RetryKind::Transient, RetryKind::Http5xx],
        _ => &[],
    }
}

#[cfg(test)]
mod tests;
