use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};
use trellis_core::{AppError, AppResult, ExecutionId};
use trellis_domain::Step;

use crate::engine_ports::{
    ApprovalRecord, ApprovalStatus, ApprovalStore, ClaimedEngineJob, EngineJobKind,
    EngineJobQueue, ExecutionResult, ExecutionStatus, ExecutionStore, ResumeTrigger, WaitKind,
    WorkflowStore,
};
use crate::execution_service::{ExecutionService, ResumeDirective, ResumeTarget};

/// Result of processing one claimed engine job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// The job finished and may be finalized on the queue.
    Finished,
    /// A shutdown paused the driven execution mid-flight; the job must
    /// stay leased so the next boot reclaims it after lease expiry.
    Deferred,
}

/// Reattaches external signals to suspended executions and drives them
/// forward.
///
/// Every job is idempotent: an execution that already advanced past its
/// wait turns the job into a no-op.
#[derive(Clone)]
pub struct WorkflowResumer {
    execution_store: Arc<dyn ExecutionStore>,
    approval_store: Arc<dyn ApprovalStore>,
    workflow_store: Arc<dyn WorkflowStore>,
    job_queue: Arc<dyn EngineJobQueue>,
    execution_service: ExecutionService,
}

impl WorkflowResumer {
    /// Creates a resumer.
    #[must_use]
    pub fn new(
        execution_store: Arc<dyn ExecutionStore>,
        approval_store: Arc<dyn ApprovalStore>,
        workflow_store: Arc<dyn WorkflowStore>,
        job_queue: Arc<dyn EngineJobQueue>,
        execution_service: ExecutionService,
    ) -> Self {
        Self {
            execution_store,
            approval_store,
            workflow_store,
            job_queue,
            execution_service,
        }
    }

    /// Processes one claimed engine job.
    pub async fn process_job(&self, job: &ClaimedEngineJob) -> AppResult<JobOutcome> {
        match job.kind {
            EngineJobKind::Start => {
                let execution = self
                    .execution_service
                    .run_start_job(job.execution_id)
                    .await?;
                Ok(outcome_for(execution.status))
            }
            EngineJobKind::Resume => {
                let trigger = job.resume_trigger.as_ref().ok_or_else(|| {
                    AppError::Validation(format!(
                        "resume job '{}' is missing its resume trigger",
                        job.job_id
                    ))
                })?;
                self.process_resume(job.execution_id, trigger).await
            }
        }
    }

    /// Resumes one suspended execution from an external signal.
    pub async fn process_resume(
        &self,
        execution_id: ExecutionId,
        trigger: &ResumeTrigger,
    ) -> AppResult<JobOutcome> {
        let Some(execution) = self.execution_store.find(execution_id).await? else {
            warn!(%execution_id, "resume job references a missing execution");
            return Ok(JobOutcome::Finished);
        };

        if !execution.status.is_resumable() {
            info!(
                %execution_id,
                status = execution.status.as_str(),
                "resume job is a no-op: execution already advanced"
            );
            return Ok(JobOutcome::Finished);
        }

        let workflow = self
            .workflow_store
            .find_by_ref(execution.workflow_ref)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "workflow row '{}' for execution '{execution_id}' does not exist",
                    execution.workflow_ref
                ))
            })?;

        let paused_step = execution
            .current_step_id
            .as_deref()
            .and_then(|step_id| workflow.definition.find_step(step_id));

        let directive = match trigger {
            ResumeTrigger::Approval { approval_id } => {
                let Some(approval) = self.approval_store.find(*approval_id).await? else {
                    warn!(%execution_id, %approval_id, "resume job references a missing approval");
                    return Ok(JobOutcome::Finished);
                };

                match self.approval_directive(&approval, paused_step) {
                    Some(directive) => directive,
                    None => return Ok(JobOutcome::Finished),
                }
            }
            ResumeTrigger::EventMatched {
                event_name,
                payload,
            } => ResumeDirective {
                context_key: "event".to_owned(),
                payload: json!({ "name": event_name, "payload": payload }),
                target: match paused_step.and_then(|step| step.next.clone()) {
                    Some(next) => ResumeTarget::Step(next),
                    None => ResumeTarget::Terminal {
                        status: ExecutionStatus::Completed,
                        result: Some(ExecutionResult::Executed),
                        reason: None,
                    },
                },
            },
            ResumeTrigger::WaitTimeout => {
                // The wait record carries the durable timeout successor;
                // the step definition is only the fallback.
                let on_timeout = self
                    .execution_store
                    .find_open_wait(execution_id)
                    .await?
                    .and_then(|wait| wait.on_timeout_step_id)
                    .or_else(|| paused_step.and_then(|step| step.on_timeout.clone()));

                ResumeDirective {
                    context_key: "event".to_owned(),
                    payload: json!({ "timed_out": true }),
                    target: match on_timeout {
                        Some(next) => ResumeTarget::Step(next),
                        None => ResumeTarget::Terminal {
                            status: ExecutionStatus::Failed,
                            result: None,
                            reason: Some("wait timed out".to_owned()),
                        },
                    },
                }
            }
        };

        let execution = self.execution_service.resume(execution_id, directive).await?;
        Ok(outcome_for(execution.status))
    }

    /// Replays resume jobs for decided approvals whose execution is still
    /// suspended, covering crashes between decision and enqueue.
    pub async fn sweep_unresumed_approvals(&self) -> AppResult<usize> {
        let stranded = self.approval_store.list_unresumed().await?;
        let mut replayed = 0_usize;

        for approval in stranded {
            let trigger = ResumeTrigger::Approval {
                approval_id: approval.id,
            };

            match self
                .job_queue
                .enqueue_resume(approval.execution_id, &trigger)
                .await
            {
                Ok(()) => replayed += 1,
                Err(error) => {
                    warn!(
                        approval_id = %approval.id,
                        execution_id = %approval.execution_id,
                        error = %error,
                        "failed to replay resume for decided approval"
                    );
                }
            }
        }

        Ok(replayed)
    }

    /// Enqueues timeout resumes for event waits past their deadline.
    ///
    /// Approval waits are excluded: the expiration sweep owns those.
    pub async fn sweep_wait_timeouts(&self) -> AppResult<usize> {
        let expired = self.execution_store.list_expired_waits(Utc::now()).await?;
        let mut enqueued = 0_usize;

        for wait in expired {
            if wait.wait_kind != WaitKind::Event {
                continue;
            }

            match self
                .job_queue
                .enqueue_resume(wait.execution_id, &ResumeTrigger::WaitTimeout)
                .await
            {
                Ok(()) => enqueued += 1,
                Err(error) => {
                    warn!(
                        execution_id = %wait.execution_id,
                        error = %error,
                        "failed to enqueue wait-timeout resume"
                    );
                }
            }
        }

        Ok(enqueued)
    }

    /// Claims and processes queued jobs until the queue is empty.
    ///
    /// Inline deployments without a dedicated worker call this after
    /// enqueueing work; queued deployments leave the queue to the worker
    /// claim loop.
    pub async fn drain_queue(
        &self,
        worker_id: &str,
        claim_limit: usize,
        lease_seconds: u32,
    ) -> AppResult<usize> {
        let mut processed = 0_usize;

        loop {
            let claimed = self
                .job_queue
                .claim(worker_id, claim_limit, lease_seconds)
                .await?;
            if claimed.is_empty() {
                return Ok(processed);
            }

            for job in claimed {
                match self.process_job(&job).await {
                    Ok(JobOutcome::Finished) => {
                        self.job_queue
                            .complete(job.job_id, worker_id, job.lease_token.as_str())
                            .await?;
                    }
                    Ok(JobOutcome::Deferred) => {
                        info!(
                            job_id = %job.job_id,
                            execution_id = %job.execution_id,
                            "engine job deferred by shutdown; left leased for next boot"
                        );
                    }
                    Err(error) => {
                        warn!(
                            job_id = %job.job_id,
                            execution_id = %job.execution_id,
                            error = %error,
                            "queued engine job failed during drain"
                        );
                        self.job_queue
                            .fail(
                                job.job_id,
                                worker_id,
                                job.lease_token.as_str(),
                                error.to_string().as_str(),
                            )
                            .await?;
                    }
                }

                processed += 1;
            }
        }
    }

    /// Computes where an approval signal sends the paused execution.
    ///
    /// `None` means the job fired prematurely (approval still pending).
    fn approval_directive(
        &self,
        approval: &ApprovalRecord,
        paused_step: Option<&Step>,
    ) -> Option<ResumeDirective> {
        let payload = json!({
            "approval_id": approval.id,
            "status": approval.status.as_str(),
            "approver_id": approval.approver_id,
            "decision_reason": approval.decision_reason,
        });

        let target = match approval.status {
            ApprovalStatus::Pending => return None,
            ApprovalStatus::Approved => match paused_step.and_then(|step| step.next.clone()) {
                Some(next) => ResumeTarget::Step(next),
                None => ResumeTarget::Terminal {
                    status: ExecutionStatus::Completed,
                    result: Some(ExecutionResult::Allowed),
                    reason: None,
                },
            },
            ApprovalStatus::Rejected => ResumeTarget::Terminal {
                status: ExecutionStatus::Blocked,
                result: Some(ExecutionResult::Blocked),
                reason: approval
                    .decision_reason
                    .clone()
                    .or_else(|| Some("approval rejected".to_owned())),
            },
            ApprovalStatus::Expired => match paused_step.and_then(|step| step.on_timeout.clone()) {
                Some(next) => ResumeTarget::Step(next),
                None => ResumeTarget::Terminal {
                    status: ExecutionStatus::Failed,
                    result: None,
                    reason: Some("approval expired".to_owned()),
                },
            },
        };

        Some(ResumeDirective {
            context_key: "approval".to_owned(),
            payload,
            target,
        })
    }
}

fn outcome_for(status: ExecutionStatus) -> JobOutcome {
    if status == ExecutionStatus::Paused {
        JobOutcome::Deferred
    } else {
        JobOutcome::Finished
    }
}
