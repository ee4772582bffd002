use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::pin::Pin;

use serde_json::json;
use tokio::task::JoinSet;
use tracing::warn;
use trellis_domain::{ParallelStrategy, StepDecision};

use super::*;

type BranchResult = (String, AppResult<Value>);

impl ExecutionService {
    /// Fans out one coordinator-owned task per branch and aggregates the
    /// outcomes under the step's strategy.
    ///
    /// Concurrency is bounded by the process-wide branch semaphore. The
    /// collected output map is ordered by branch step id so repeated runs
    /// produce identical step output.
    pub(super) async fn run_parallel(
        &self,
        execution: &ExecutionRecord,
        branches: &[Step],
        strategy: ParallelStrategy,
    ) -> AppResult<Value> {
        let mut in_flight: JoinSet<BranchResult> = JoinSet::new();

        for branch in branches {
            let service = self.clone();
            let execution = execution.clone();
            let branch = branch.clone();
            let permits = self.runtime.parallel_permits();

            in_flight.spawn(async move {
                let branch_id = branch.id.clone();
                let _permit = match permits.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return (
                            branch_id,
                            Err(AppError::Cancelled(
                                "parallel branch semaphore closed during shutdown".to_owned(),
                            )),
                        );
                    }
                };

                let result = service.run_recorded_branch(&execution, &branch).await;
                (branch_id, result)
            });
        }

        match strategy {
            ParallelStrategy::AllMustPass => {
                let results = drain(&mut in_flight, execution).await;
                if let Some((branch_id, error)) = results
                    .iter()
                    .find_map(|(id, result)| result.as_ref().err().map(|error| (id, error)))
                {
                    // Preserve the failure class so the step retry policy
                    // can still classify transient branch failures.
                    return Err(with_context(
                        error,
                        format!("parallel branch '{branch_id}' failed"),
                    ));
                }

                let outputs: BTreeMap<String, Value> = results
                    .into_iter()
                    .filter_map(|(id, result)| result.ok().map(|output| (id, output)))
                    .collect();
                to_json(outputs)
            }
            ParallelStrategy::AnyCanPass => {
                let mut failures: BTreeMap<String, String> = BTreeMap::new();
                let mut winner: Option<(String, Value)> = None;

                while let Some(joined) = in_flight.join_next().await {
                    match flatten(joined) {
                        (branch_id, Ok(output)) => {
                            winner = Some((branch_id, output));
                            break;
                        }
                        (branch_id, Err(error)) => {
                            failures.insert(branch_id, error.to_string());
                        }
                    }
                }

                let Some((winner_id, output)) = winner else {
                    return Err(AppError::Permanent(format!(
                        "every parallel branch failed: {}",
                        failures
                            .iter()
                            .map(|(id, error)| format!("{id}: {error}"))
                            .collect::<Vec<_>>()
                            .join("; ")
                    )));
                };

                // Best-effort peer cancellation: losing branches may
                // already have committed side effects.
                in_flight.abort_all();

                let mut settled: BTreeSet<String> = failures.into_keys().collect();
                settled.insert(winner_id.clone());
                while let Some(joined) = in_flight.join_next().await {
                    // A task that beat the abort finalized its own row.
                    if let Ok((branch_id, _)) = joined {
                        settled.insert(branch_id);
                    }
                }

                for branch in branches {
                    if settled.contains(branch.id.as_str()) {
                        continue;
                    }

                    // The aborted task never finalized its row; the row may
                    // also not exist when the branch never started.
                    let _ = self
                        .execution_store
                        .finish_step(
                            execution.id,
                            branch.id.as_str(),
                            1,
                            StepExecutionStatus::Failed,
                            None,
                            Some("aborted after a peer branch succeeded"),
                        )
                        .await;
                }

                to_json(BTreeMap::from([(winner_id, output)]))
            }
            ParallelStrategy::BestEffort => {
                let results = drain(&mut in_flight, execution).await;
                let outputs: BTreeMap<String, Value> = results
                    .into_iter()
                    .map(|(id, result)| {
                        let entry = match result {
                            Ok(output) => json!({ "status": "completed", "output": output }),
                            Err(error) => {
                                json!({ "status": "failed", "error": error.to_string() })
                            }
                        };
                        (id, entry)
                    })
                    .collect();
                to_json(outputs)
            }
        }
    }

    /// Runs one branch with its own step-execution rows, so child outcomes
    /// stay visible even when the aggregate discards them.
    async fn run_recorded_branch(
        &self,
        execution: &ExecutionRecord,
        branch: &Step,
    ) -> AppResult<Value> {
        self.execution_store
            .start_step(execution.id, branch.id.as_str(), 1, &execution.context)
            .await?;

        match self.run_branch(execution, branch).await {
            Ok(output) => {
                self.execution_store
                    .finish_step(
                        execution.id,
                        branch.id.as_str(),
                        1,
                        StepExecutionStatus::Completed,
                        Some(&output),
                        None,
                    )
                    .await?;
                Ok(output)
            }
            Err(error) => {
                let message = error.to_string();
                self.execution_store
                    .finish_step(
                        execution.id,
                        branch.id.as_str(),
                        1,
                        StepExecutionStatus::Failed,
                        None,
                        Some(message.as_str()),
                    )
                    .await?;
                Err(error)
            }
        }
    }

    /// Interprets one inline branch step.
    ///
    /// Wait-family steps are unrepresentable here: the validator rejects
    /// them inside parallel steps at publish time.
    fn run_branch<'a>(
        &'a self,
        execution: &'a ExecutionRecord,
        branch: &'a Step,
    ) -> Pin<Box<dyn Future<Output = AppResult<Value>> + Send + 'a>> {
        Box::pin(async move {
            match &branch.kind {
                StepKind::Condition { condition } => {
                    Ok(json!({ "matched": condition.evaluate(&execution.context) }))
                }
                StepKind::Action { action } => match action {
                    StepDecision::Allow => Ok(json!({ "decision": "allow" })),
                    StepDecision::Block { reason } => {
                        Ok(json!({ "decision": "block", "reason": reason }))
                    }
                    other => Err(AppError::Internal(format!(
                        "decision '{}' cannot run inside a parallel step",
                        other.decision_type()
                    ))),
                },
                StepKind::Execute { actions } => self
                    .run_execute_actions(execution, branch, actions.as_slice())
                    .await
                    .map(|(output, _)| output),
                StepKind::Parallel { branches, strategy } => {
                    self.run_parallel(execution, branches.as_slice(), *strategy)
                        .await
                }
                StepKind::Wait { .. } => Err(AppError::Internal(format!(
                    "wait step '{}' cannot run inside a parallel step",
                    branch.id
                ))),
            }
        })
    }
}

async fn drain(in_flight: &mut JoinSet<BranchResult>, execution: &ExecutionRecord) -> Vec<BranchResult> {
    let mut results = Vec::new();
    while let Some(joined) = in_flight.join_next().await {
        let (branch_id, result) = flatten(joined);
        if let Err(error) = &result {
            warn!(
                execution_id = %execution.id,
                branch_id = %branch_id,
                error = %error,
                "parallel branch failed"
            );
        }
        results.push((branch_id, result));
    }

    results.sort_by(|(left, _), (right, _)| left.cmp(right));
    results
}

/// Contains branch panics: a join error becomes a failed branch result
/// instead of killing the driving worker.
fn flatten(joined: Result<BranchResult, tokio::task::JoinError>) -> BranchResult {
    match joined {
        Ok(result) => result,
        Err(error) => (
            String::from("<join>"),
            Err(AppError::Internal(format!(
                "parallel branch task aborted: {error}"
            ))),
        ),
    }
}

fn to_json(outputs: BTreeMap<String, Value>) -> AppResult<Value> {
    serde_json::to_value(outputs).map_err(|error| {
        AppError::Internal(format!("failed to serialize parallel step output: {error}"))
    })
}

/// Rebuilds an error with extra context while keeping its category.
fn with_context(error: &AppError, context: String) -> AppError {
    let message = format!("{context}: {error}");
    match error {
        AppError::Transient(_) => AppError::Transient(message),
        AppError::Timeout(_) => AppError::Timeout(message),
        AppError::Cancelled(_) => AppError::Cancelled(message),
        _ => AppError::Permanent(message),
    }
}
