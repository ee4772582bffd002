use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};
use trellis_core::{AppError, AppResult, ExecutionId};

use crate::engine_ports::{
    EngineJobQueue, EventRecord, EventStore, ExecutionStore, IngestEventInput, PublishedWorkflow,
    ResumeTrigger, WorkflowStore,
};
use crate::execution_service::ExecutionService;

/// Routing outcome for one ingested event.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedEvent {
    /// The persisted event row.
    pub event: EventRecord,
    /// True when the event id had already been ingested; duplicates are
    /// accepted only once and never routed twice.
    pub deduplicated: bool,
    /// Executions started for matching workflows.
    pub executions_started: Vec<ExecutionId>,
    /// Resume jobs enqueued for matching event waits.
    pub resumes_enqueued: usize,
}

/// Matches ingested events to enabled workflows and suspended executions.
#[derive(Clone)]
pub struct EventRouter {
    event_store: Arc<dyn EventStore>,
    workflow_store: Arc<dyn WorkflowStore>,
    execution_store: Arc<dyn ExecutionStore>,
    job_queue: Arc<dyn EngineJobQueue>,
    execution_service: ExecutionService,
}

impl EventRouter {
    /// Creates an event router.
    #[must_use]
    pub fn new(
        event_store: Arc<dyn EventStore>,
        workflow_store: Arc<dyn WorkflowStore>,
        execution_store: Arc<dyn ExecutionStore>,
        job_queue: Arc<dyn EngineJobQueue>,
        execution_service: ExecutionService,
    ) -> Self {
        Self {
            event_store,
            workflow_store,
            execution_store,
            job_queue,
            execution_service,
        }
    }

    /// Persists one event and routes it.
    ///
    /// Launches one execution per matching workflow identity, using the
    /// highest enabled version (lexicographically greatest on a tie), then
    /// enqueues resume jobs for executions waiting on this event name.
    /// Starts are independent: one failing start does not affect siblings.
    pub async fn route(&self, input: IngestEventInput) -> AppResult<RoutedEvent> {
        let (event, inserted) = self.event_store.insert(input).await?;

        if !inserted {
            info!(event_id = %event.id, "duplicate event id ignored");
            return Ok(RoutedEvent {
                event,
                deduplicated: true,
                executions_started: Vec::new(),
                resumes_enqueued: 0,
            });
        }

        let executions_started = self.start_matching_workflows("event", &event).await?;
        let resumes_enqueued = self.resume_matching_waits(&event).await?;

        info!(
            event_id = %event.id,
            event_type = %event.event_type,
            started = executions_started.len(),
            resumed = resumes_enqueued,
            "event routed"
        );

        Ok(RoutedEvent {
            event,
            deduplicated: false,
            executions_started,
            resumes_enqueued,
        })
    }

    /// Routes one schedule tick as an event equivalent keyed by the cron
    /// expression.
    pub async fn route_schedule_tick(
        &self,
        cron: &str,
        payload: Value,
    ) -> AppResult<RoutedEvent> {
        let (event, _) = self
            .event_store
            .insert(IngestEventInput {
                id: None,
                event_type: cron.to_owned(),
                source: "scheduler".to_owned(),
                payload,
            })
            .await?;

        let executions_started = self.start_matching_workflows("schedule", &event).await?;

        Ok(RoutedEvent {
            event,
            deduplicated: false,
            executions_started,
            resumes_enqueued: 0,
        })
    }

    /// Injects a synthetic event against one workflow for testing.
    ///
    /// Bypasses trigger matching: the highest enabled version of the
    /// workflow is started directly with the given payload.
    pub async fn inject_test_event(
        &self,
        workflow_id: &str,
        payload: Value,
    ) -> AppResult<ExecutionId> {
        let versions = self.workflow_store.list_versions(workflow_id).await?;
        let workflow = versions
            .into_iter()
            .filter(|workflow| workflow.enabled)
            .max_by(|left, right| left.version.cmp(&right.version))
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "workflow '{workflow_id}' has no enabled version"
                ))
            })?;

        let (event, _) = self
            .event_store
            .insert(IngestEventInput {
                id: None,
                event_type: workflow
                    .definition
                    .trigger()
                    .match_key()
                    .unwrap_or("manual.test")
                    .to_owned(),
                source: "test-injection".to_owned(),
                payload: payload.clone(),
            })
            .await?;

        let execution = self
            .execution_service
            .start(&workflow, Some(&event), payload)
            .await?;
        Ok(execution.id)
    }

    async fn start_matching_workflows(
        &self,
        trigger_type: &str,
        event: &EventRecord,
    ) -> AppResult<Vec<ExecutionId>> {
        let candidates = self
            .workflow_store
            .list_enabled_for_trigger(trigger_type, event.event_type.as_str())
            .await?;

        let mut executions_started = Vec::new();
        for workflow in select_highest_versions(candidates) {
            let skipped_by_filter = workflow
                .definition
                .trigger()
                .filter()
                .is_some_and(|filter| !filter.evaluate(&event.payload));
            if skipped_by_filter {
                continue;
            }

            match self
                .execution_service
                .start(&workflow, Some(event), event.payload.clone())
                .await
            {
                Ok(execution) => executions_started.push(execution.id),
                Err(error) => {
                    warn!(
                        event_id = %event.id,
                        workflow_id = %workflow.workflow_id,
                        version = %workflow.version,
                        error = %error,
                        "failed to start execution for matched workflow"
                    );
                }
            }
        }

        Ok(executions_started)
    }

    async fn resume_matching_waits(&self, event: &EventRecord) -> AppResult<usize> {
        let waits = self
            .execution_store
            .list_open_waits_for_event(event.event_type.as_str())
            .await?;

        let mut resumes_enqueued = 0_usize;
        for wait in waits {
            let trigger = ResumeTrigger::EventMatched {
                event_name: event.event_type.clone(),
                payload: event.payload.clone(),
            };

            match self.job_queue.enqueue_resume(wait.execution_id, &trigger).await {
                Ok(()) => resumes_enqueued += 1,
                Err(error) => {
                    warn!(
                        event_id = %event.id,
                        execution_id = %wait.execution_id,
                        error = %error,
                        "failed to enqueue resume for matched event wait"
                    );
                }
            }
        }

        Ok(resumes_enqueued)
    }
}

/// Keeps the lexicographically greatest version per workflow identity.
fn select_highest_versions(candidates: Vec<PublishedWorkflow>) -> Vec<PublishedWorkflow> {
    let mut selected: BTreeMap<String, PublishedWorkflow> = BTreeMap::new();
    for workflow in candidates {
        let replace = selected
            .get(workflow.workflow_id.as_str())
            .is_none_or(|existing| existing.version < workflow.version);

        if replace {
            selected.insert(workflow.workflow_id.clone(), workflow);
        }
    }

    selected.into_values().collect()
}
