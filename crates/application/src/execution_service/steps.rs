use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use trellis_core::ApprovalId;
use trellis_domain::StepDecision;

use super::*;
use crate::engine_ports::{ApprovalRecord, CreateApprovalInput, WaitKind};

/// Terminal outcome of one step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepTermination {
    /// Terminal execution status.
    pub status: ExecutionStatus,
    /// Terminal result when the step decided one.
    pub result: Option<ExecutionResult>,
    /// Reason recorded on the execution.
    pub reason: Option<String>,
    /// Step output recorded before terminating.
    pub output: Option<Value>,
}

/// Wait the execution suspends on, persisted as a wait record.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingWait {
    /// Signal kind.
    pub kind: WaitKind,
    /// Event name for event waits.
    pub event_name: Option<String>,
    /// Approval id for approval waits.
    pub approval_id: Option<ApprovalId>,
    /// Deadline after which the timeout successor is taken.
    pub timeout_at: Option<DateTime<Utc>>,
    /// Successor taken on timeout.
    pub on_timeout_step_id: Option<String>,
}

/// Result of interpreting one step within a running execution.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// Continue the loop at the given step.
    Advance {
        /// Successor step id.
        next_step_id: String,
        /// Step output recorded under `steps.<id>`.
        output: Option<Value>,
    },
    /// Terminate the execution.
    Terminal(StepTermination),
    /// Suspend the execution on an external signal.
    Suspend {
        /// Wait to persist.
        wait: PendingWait,
        /// Wait key published with the pause event.
        wait_key: String,
        /// Step output recorded under `steps.<id>`.
        output: Option<Value>,
    },
}

impl ExecutionService {
    /// Maps one step and the current context to a step outcome.
    pub(super) async fn interpret_step(
        &self,
        execution: &ExecutionRecord,
        step: &Step,
        last_result: Option<ExecutionResult>,
    ) -> AppResult<StepOutcome> {
        match &step.kind {
            StepKind::Condition { condition } => {
                let matched = condition.evaluate(&execution.context);
                let output = Some(json!({ "matched": matched }));

                let successor = if matched { &step.on_true } else { &step.on_false };
                match successor {
                    Some(next_step_id) => Ok(StepOutcome::Advance {
                        next_step_id: next_step_id.clone(),
                        output,
                    }),
                    // An omitted true-successor permits; an omitted
                    // false-successor ends with whatever was decided so far.
                    None if matched => Ok(StepOutcome::Terminal(StepTermination {
                        status: ExecutionStatus::Completed,
                        result: Some(ExecutionResult::Allowed),
                        reason: None,
                        output,
                    })),
                    None => Ok(StepOutcome::Terminal(StepTermination {
                        status: ExecutionStatus::Completed,
                        result: last_result,
                        reason: None,
                        output,
                    })),
                }
            }
            StepKind::Action { action } => self.interpret_decision(execution, step, action).await,
            StepKind::Execute { actions } => {
                let (output, approval) = self
                    .run_execute_actions(execution, step, actions.as_slice())
                    .await?;

                if let Some(approval) = approval {
                    return Ok(suspend_on_approval(step, &approval, Some(output)));
                }

                match &step.next {
                    Some(next_step_id) => Ok(StepOutcome::Advance {
                        next_step_id: next_step_id.clone(),
                        output: Some(output),
                    }),
                    None => Ok(StepOutcome::Terminal(StepTermination {
                        status: ExecutionStatus::Completed,
                        result: Some(ExecutionResult::Executed),
                        reason: None,
                        output: Some(output),
                    })),
                }
            }
            StepKind::Parallel { branches, strategy } => {
                let output = self
                    .run_parallel(execution, branches.as_slice(), *strategy)
                    .await?;

                match &step.next {
                    Some(next_step_id) => Ok(StepOutcome::Advance {
                        next_step_id: next_step_id.clone(),
                        output: Some(output),
                    }),
                    None => Ok(StepOutcome::Terminal(StepTermination {
                        status: ExecutionStatus::Completed,
                        result: Some(ExecutionResult::Executed),
                        reason: None,
                        output: Some(output),
                    })),
                }
            }
            StepKind::Wait {
                event,
                timeout_seconds,
            } => {
                let timeout_at = timeout_seconds
                    .and_then(|seconds| i64::try_from(seconds).ok())
                    .map(|seconds| Utc::now() + Duration::seconds(seconds));

                Ok(StepOutcome::Suspend {
                    wait: PendingWait {
                        kind: WaitKind::Event,
                        event_name: Some(event.clone()),
                        approval_id: None,
                        timeout_at,
                        on_timeout_step_id: step.on_timeout.clone(),
                    },
                    wait_key: format!("event:{event}"),
                    output: None,
                })
            }
        }
    }

    async fn interpret_decision(
        &self,
        execution: &ExecutionRecord,
        step: &Step,
        decision: &StepDecision,
    ) -> AppResult<StepOutcome> {
        match decision {
            StepDecision::Allow => Ok(StepOutcome::Terminal(StepTermination {
                status: ExecutionStatus::Completed,
                result: Some(ExecutionResult::Allowed),
                reason: None,
                output: Some(json!({ "decision": "allow" })),
            })),
            StepDecision::Block { reason } => Ok(StepOutcome::Terminal(StepTermination {
                status: ExecutionStatus::Completed,
                result: Some(ExecutionResult::Blocked),
                reason: reason.clone(),
                output: Some(json!({ "decision": "block", "reason": reason })),
            })),
            StepDecision::RequireApproval {
                approver_role,
                reason,
                ttl_seconds,
            } => {
                // Approval creation is never retried: any failure here
                // fails the step regardless of its retry policy.
                let approval = self
                    .approval_service
                    .create(CreateApprovalInput {
                        execution_id: execution.id,
                        step_id: step.id.clone(),
                        approver_role: approver_role.clone(),
                        reason: reason.clone(),
                        ttl_seconds: *ttl_seconds,
                        entity_type: None,
                        entity_id: None,
                        requester_id: None,
                    })
                    .await
                    .map_err(|error| {
                        AppError::Permanent(format!("approval creation failed: {error}"))
                    })?;

                Ok(suspend_on_approval(
                    step,
                    &approval,
                    Some(json!({ "approval_id": approval.id })),
                ))
            }
            StepDecision::Wait { event } => Ok(StepOutcome::Suspend {
                wait: PendingWait {
                    kind: WaitKind::Event,
                    event_name: Some(event.clone()),
                    approval_id: None,
                    timeout_at: None,
                    on_timeout_step_id: step.on_timeout.clone(),
                },
                wait_key: format!("event:{event}"),
                output: None,
            }),
        }
    }
}

fn suspend_on_approval(
    step: &Step,
    approval: &ApprovalRecord,
    output: Option<Value>,
) -> StepOutcome {
    StepOutcome::Suspend {
        wait: PendingWait {
            kind: WaitKind::Approval,
            event_name: None,
            approval_id: Some(approval.id),
            timeout_at: approval.expires_at,
            on_timeout_step_id: step.on_timeout.clone(),
        },
        wait_key: format!("approval:{}", approval.id),
        output,
    }
}
