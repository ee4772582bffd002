use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use tokio::sync::Mutex;

use trellis_core::{AppError, AppResult, ApprovalId, EventId, ExecutionId, JobId, WorkflowRef};
use trellis_domain::WorkflowDefinition;

use crate::approval_service::{ApprovalDecision, ApprovalService};
use crate::engine_ports::{
    ApprovalListQuery, ApprovalRecord, ApprovalStatus, ApprovalStore, ClaimedEngineJob,
    CreateApprovalInput, CreateExecutionInput, EngineJobKind, EngineJobQueue, EventRecord,
    EventStore, ExecutionListQuery, ExecutionRecord, ExecutionResult, ExecutionStatus,
    ExecutionStore, IngestEventInput, LifecycleEvent, LifecycleEventSink, Notifier,
    PublishedWorkflow, RecordStore, ResumeTrigger, StepExecutionRecord, StepExecutionStatus,
    WaitRecord, WebhookRequest, WebhookResponse, WebhookTransport, WorkflowStore,
};
use crate::event_router::EventRouter;
use crate::resumer::WorkflowResumer;
use crate::runtime::EngineRuntime;

use super::{ExecutionMode, ExecutionService, ExecutionServiceDeps};

#[derive(Default)]
struct FakeWorkflowStore {
    workflows: Mutex<Vec<PublishedWorkflow>>,
}

#[async_trait]
impl WorkflowStore for FakeWorkflowStore {
    async fn publish(
        &self,
        input: crate::engine_ports::PublishWorkflowInput,
    ) -> AppResult<PublishedWorkflow> {
        let mut workflows = self.workflows.lock().await;
        if workflows
            .iter()
            .any(|existing| existing.workflow_id == input.workflow_id && existing.version == input.version)
        {
            return Err(AppError::Conflict(format!(
                "workflow '{}' version '{}' already exists",
                input.workflow_id, input.version
            )));
        }

        let workflow = PublishedWorkflow {
            id: WorkflowRef::new(),
            workflow_id: input.workflow_id,
            version: input.version,
            name: input.name,
            enabled: input.enabled,
            tags: input.tags,
            definition: input.definition,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        workflows.push(workflow.clone());
        Ok(workflow)
    }

    async fn find_by_ref(&self, workflow_ref: WorkflowRef) -> AppResult<Option<PublishedWorkflow>> {
        Ok(self
            .workflows
            .lock()
            .await
            .iter()
            .find(|workflow| workflow.id == workflow_ref)
            .cloned())
    }

    async fn list_versions(&self, workflow_id: &str) -> AppResult<Vec<PublishedWorkflow>> {
        let mut versions: Vec<PublishedWorkflow> = self
            .workflows
            .lock()
            .await
            .iter()
            .filter(|workflow| workflow.workflow_id == workflow_id)
            .cloned()
            .collect();
        versions.sort_by(|left, right| right.version.cmp(&left.version));
        Ok(versions)
    }

    async fn list_latest(&self) -> AppResult<Vec<PublishedWorkflow>> {
        Ok(self.workflows.lock().await.clone())
    }

    async fn set_enabled(&self, workflow_id: &str, version: &str, enabled: bool) -> AppResult<()> {
        let mut workflows = self.workflows.lock().await;
        let workflow = workflows
            .iter_mut()
            .find(|workflow| workflow.workflow_id == workflow_id && workflow.version == version)
            .ok_or_else(|| AppError::NotFound(format!("workflow '{workflow_id}'")))?;
        workflow.enabled = enabled;
        Ok(())
    }

    async fn list_enabled_for_trigger(
        &self,
        trigger_type: &str,
        match_key: &str,
    ) -> AppResult<Vec<PublishedWorkflow>> {
        Ok(self
            .workflows
            .lock()
            .await
            .iter()
            .filter(|workflow| {
                workflow.enabled
                    && workflow.definition.trigger().trigger_type() == trigger_type
                    && workflow.definition.trigger().match_key() == Some(match_key)
            })
            .cloned()
            .collect())
    }
}

#[derive(Default)]
struct FakeEventStore {
    events: Mutex<HashMap<EventId, EventRecord>>,
}

#[async_trait]
impl EventStore for FakeEventStore {
    async fn insert(&self, input: IngestEventInput) -> AppResult<(EventRecord, bool)> {
        let mut events = self.events.lock().await;
        let event_id = input.id.unwrap_or_default();

        if let Some(existing) = events.get(&event_id) {
            return Ok((existing.clone(), false));
        }

        let event = EventRecord {
            id: event_id,
            event_type: input.event_type,
            source: input.source,
            payload: input.payload,
            received_at: Utc::now(),
        };
        events.insert(event_id, event.clone());
        Ok((event, true))
    }

    async fn find(&self, event_id: EventId) -> AppResult<Option<EventRecord>> {
        Ok(self.events.lock().await.get(&event_id).cloned())
    }
}

#[derive(Default)]
struct ExecutionState {
    executions: HashMap<ExecutionId, ExecutionRecord>,
    steps: Vec<StepExecutionRecord>,
    waits: Vec<(WaitRecord, bool)>,
}

#[derive(Default)]
struct FakeExecutionStore {
    state: Mutex<ExecutionState>,
}

#[async_trait]
impl ExecutionStore for FakeExecutionStore {
    async fn create(&self, input: CreateExecutionInput) -> AppResult<ExecutionRecord> {
        let execution = ExecutionRecord {
            id: ExecutionId::new(),
            workflow_ref: input.workflow_ref,
            trigger_event_id: input.trigger_event_id,
            status: input.status,
            result: None,
            current_step_id: input.current_step_id,
            context: input.context,
            error_message: None,
            started_at: Utc::now(),
            completed_at: None,
        };

        self.state
            .lock()
            .await
            .executions
            .insert(execution.id, execution.clone());
        Ok(execution)
    }

    async fn find(&self, execution_id: ExecutionId) -> AppResult<Option<ExecutionRecord>> {
        Ok(self.state.lock().await.executions.get(&execution_id).cloned())
    }

    async fn list(&self, query: ExecutionListQuery) -> AppResult<Vec<ExecutionRecord>> {
        Ok(self
            .state
            .lock()
            .await
            .executions
            .values()
            .filter(|execution| {
                query
                    .status
                    .is_none_or(|status| execution.status == status)
            })
            .cloned()
            .collect())
    }

    async fn mark_running(
        &self,
        execution_id: ExecutionId,
        current_step_id: Option<&str>,
        context: &Value,
    ) -> AppResult<()> {
        self.mutate(execution_id, |execution| {
            execution.status = ExecutionStatus::Running;
            execution.current_step_id = current_step_id.map(ToOwned::to_owned);
            execution.context = context.clone();
        })
        .await
    }

    async fn advance_step(
        &self,
        execution_id: ExecutionId,
        current_step_id: &str,
        context: &Value,
    ) -> AppResult<()> {
        self.mutate(execution_id, |execution| {
            execution.current_step_id = Some(current_step_id.to_owned());
            execution.context = context.clone();
        })
        .await
    }

    async fn suspend(
        &self,
        execution_id: ExecutionId,
        status: ExecutionStatus,
        context: &Value,
        wait: WaitRecord,
    ) -> AppResult<()> {
        let mut state = self.state.lock().await;
        let execution = state
            .executions
            .get_mut(&execution_id)
            .ok_or_else(|| AppError::NotFound(format!("execution '{execution_id}'")))?;
        execution.status = status;
        execution.context = context.clone();
        state.waits.push((wait, false));
        Ok(())
    }

    async fn save_context(&self, execution_id: ExecutionId, context: &Value) -> AppResult<()> {
        self.mutate(execution_id, |execution| {
            execution.context = context.clone();
        })
        .await
    }

    async fn pause(&self, execution_id: ExecutionId) -> AppResult<()> {
        self.mutate(execution_id, |execution| {
            if execution.status == ExecutionStatus::Running {
                execution.status = ExecutionStatus::Paused;
            }
        })
        .await
    }

    async fn complete(
        &self,
        execution_id: ExecutionId,
        status: ExecutionStatus,
        result: Option<ExecutionResult>,
        error_message: Option<&str>,
    ) -> AppResult<ExecutionRecord> {
        let mut state = self.state.lock().await;
        let execution = state
            .executions
            .get_mut(&execution_id)
            .ok_or_else(|| AppError::NotFound(format!("execution '{execution_id}'")))?;

        if execution.status.is_terminal() {
            return Err(AppError::Conflict(format!(
                "execution '{execution_id}' is already terminal"
            )));
        }

        execution.status = status;
        execution.result = result;
        execution.error_message = error_message.map(ToOwned::to_owned);
        execution.completed_at = Some(Utc::now());
        Ok(execution.clone())
    }

    async fn start_step(
        &self,
        execution_id: ExecutionId,
        step_id: &str,
        attempt: i32,
        input: &Value,
    ) -> AppResult<()> {
        self.state.lock().await.steps.push(StepExecutionRecord {
            execution_id,
            step_id: step_id.to_owned(),
            attempt,
            status: StepExecutionStatus::Running,
            input: input.clone(),
            output: None,
            error_message: None,
            started_at: Utc::now(),
            completed_at: None,
        });
        Ok(())
    }

    async fn finish_step(
        &self,
        execution_id: ExecutionId,
        step_id: &str,
        attempt: i32,
        status: StepExecutionStatus,
        output: Option<&Value>,
        error_message: Option<&str>,
    ) -> AppResult<()> {
        let mut state = self.state.lock().await;
        let row = state
            .steps
            .iter_mut()
            .rev()
            .find(|row| {
                row.execution_id == execution_id && row.step_id == step_id && row.attempt == attempt
            })
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "step row '{step_id}' attempt {attempt} for execution '{execution_id}'"
                ))
            })?;

        row.status = status;
        row.output = output.cloned();
        row.error_message = error_message.map(ToOwned::to_owned);
        row.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn list_step_executions(
        &self,
        execution_id: ExecutionId,
    ) -> AppResult<Vec<StepExecutionRecord>> {
        Ok(self
            .state
            .lock()
            .await
            .steps
            .iter()
            .filter(|row| row.execution_id == execution_id)
            .cloned()
            .collect())
    }

    async fn consume_wait(&self, execution_id: ExecutionId) -> AppResult<bool> {
        let mut state = self.state.lock().await;
        match state
            .waits
            .iter_mut()
            .find(|(wait, consumed)| !consumed && wait.execution_id == execution_id)
        {
            Some((_, consumed)) => {
                *consumed = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn find_open_wait(&self, execution_id: ExecutionId) -> AppResult<Option<WaitRecord>> {
        Ok(self
            .state
            .lock()
            .await
            .waits
            .iter()
            .find(|(wait, consumed)| !consumed && wait.execution_id == execution_id)
            .map(|(wait, _)| wait.clone()))
    }

    async fn list_open_waits_for_event(&self, event_name: &str) -> AppResult<Vec<WaitRecord>> {
        Ok(self
            .state
            .lock()
            .await
            .waits
            .iter()
            .filter(|(wait, consumed)| {
                !consumed && wait.event_name.as_deref() == Some(event_name)
            })
            .map(|(wait, _)| wait.clone())
            .collect())
    }

    async fn list_expired_waits(&self, now: DateTime<Utc>) -> AppResult<Vec<WaitRecord>> {
        Ok(self
            .state
            .lock()
            .await
            .waits
            .iter()
            .filter(|(wait, consumed)| {
                !consumed && wait.timeout_at.is_some_and(|deadline| deadline <= now)
            })
            .map(|(wait, _)| wait.clone())
            .collect())
    }
}

impl FakeExecutionStore {
    async fn mutate(
        &self,
        execution_id: ExecutionId,
        apply: impl FnOnce(&mut ExecutionRecord) + Send,
    ) -> AppResult<()> {
        let mut state = self.state.lock().await;
        let execution = state
            .executions
            .get_mut(&execution_id)
            .ok_or_else(|| AppError::NotFound(format!("execution '{execution_id}'")))?;
        apply(execution);
        Ok(())
    }
}

struct FakeApprovalStore {
    approvals: Mutex<HashMap<ApprovalId, ApprovalRecord>>,
    execution_store: Arc<FakeExecutionStore>,
}

#[async_trait]
impl ApprovalStore for FakeApprovalStore {
    async fn insert(
        &self,
        input: CreateApprovalInput,
        expires_at: Option<DateTime<Utc>>,
    ) -> AppResult<ApprovalRecord> {
        let approval = ApprovalRecord {
            id: ApprovalId::new(),
            execution_id: input.execution_id,
            step_id: input.step_id,
            entity_type: input.entity_type,
            entity_id: input.entity_id,
            requester_id: input.requester_id,
            approver_role: input.approver_role,
            approver_id: None,
            status: ApprovalStatus::Pending,
            reason: input.reason,
            decision_reason: None,
            requested_at: Utc::now(),
            decided_at: None,
            expires_at,
        };

        self.approvals
            .lock()
            .await
            .insert(approval.id, approval.clone());
        Ok(approval)
    }

    async fn find(&self, approval_id: ApprovalId) -> AppResult<Option<ApprovalRecord>> {
        Ok(self.approvals.lock().await.get(&approval_id).cloned())
    }

    async fn list(&self, query: ApprovalListQuery) -> AppResult<Vec<ApprovalRecord>> {
        Ok(self
            .approvals
            .lock()
            .await
            .values()
            .filter(|approval| {
                query.status.is_none_or(|status| approval.status == status)
                    && query
                        .approver_role
                        .as_deref()
                        .is_none_or(|role| approval.approver_role == role)
            })
            .cloned()
            .collect())
    }

    async fn transition(
        &self,
        approval_id: ApprovalId,
        to: ApprovalStatus,
        approver_id: Option<&str>,
        decision_reason: Option<&str>,
    ) -> AppResult<ApprovalRecord> {
        let mut approvals = self.approvals.lock().await;
        let approval = approvals
            .get_mut(&approval_id)
            .ok_or_else(|| AppError::NotFound(format!("approval '{approval_id}'")))?;

        if approval.status != ApprovalStatus::Pending {
            return Err(AppError::Conflict(format!(
                "approval '{approval_id}' is already '{}'",
                approval.status.as_str()
            )));
        }

        approval.status = to;
        approval.approver_id = approver_id.map(ToOwned::to_owned);
        approval.decision_reason = decision_reason.map(ToOwned::to_owned);
        approval.decided_at = Some(Utc::now());
        Ok(approval.clone())
    }

    async fn list_expirable(&self, now: DateTime<Utc>) -> AppResult<Vec<ApprovalRecord>> {
        Ok(self
            .approvals
            .lock()
            .await
            .values()
            .filter(|approval| {
                approval.status == ApprovalStatus::Pending
                    && approval.expires_at.is_some_and(|deadline| deadline <= now)
            })
            .cloned()
            .collect())
    }

    async fn list_unresumed(&self) -> AppResult<Vec<ApprovalRecord>> {
        let executions = self.execution_store.state.lock().await;
        Ok(self
            .approvals
            .lock()
            .await
            .values()
            .filter(|approval| {
                approval.status.is_terminal()
                    && executions
                        .executions
                        .get(&approval.execution_id)
                        .is_some_and(|execution| execution.status.is_resumable())
            })
            .cloned()
            .collect())
    }
}

struct QueuedJob {
    job_id: JobId,
    kind: EngineJobKind,
    execution_id: ExecutionId,
    resume_trigger: Option<ResumeTrigger>,
    leased: bool,
    done: bool,
}

#[derive(Default)]
struct FakeJobQueue {
    jobs: Mutex<Vec<QueuedJob>>,
}

#[async_trait]
impl EngineJobQueue for FakeJobQueue {
    async fn enqueue_start(&self, execution_id: ExecutionId) -> AppResult<()> {
        self.jobs.lock().await.push(QueuedJob {
            job_id: JobId::new(),
            kind: EngineJobKind::Start,
            execution_id,
            resume_trigger: None,
            leased: false,
            done: false,
        });
        Ok(())
    }

    async fn enqueue_resume(
        &self,
        execution_id: ExecutionId,
        trigger: &ResumeTrigger,
    ) -> AppResult<()> {
        self.jobs.lock().await.push(QueuedJob {
            job_id: JobId::new(),
            kind: EngineJobKind::Resume,
            execution_id,
            resume_trigger: Some(trigger.clone()),
            leased: false,
            done: false,
        });
        Ok(())
    }

    async fn claim(
        &self,
        _worker_id: &str,
        limit: usize,
        _lease_seconds: u32,
    ) -> AppResult<Vec<ClaimedEngineJob>> {
        let mut jobs = self.jobs.lock().await;
        let mut claimed = Vec::new();

        for job in jobs.iter_mut() {
            if claimed.len() >= limit {
                break;
            }

            if !job.leased && !job.done {
                job.leased = true;
                claimed.push(ClaimedEngineJob {
                    job_id: job.job_id,
                    kind: job.kind,
                    execution_id: job.execution_id,
                    resume_trigger: job.resume_trigger.clone(),
                    lease_token: "lease".to_owned(),
                });
            }
        }

        Ok(claimed)
    }

    async fn complete(&self, job_id: JobId, _worker_id: &str, _lease_token: &str) -> AppResult<()> {
        self.finish(job_id).await
    }

    async fn fail(
        &self,
        job_id: JobId,
        _worker_id: &str,
        _lease_token: &str,
        _error_message: &str,
    ) -> AppResult<()> {
        self.finish(job_id).await
    }
}

impl FakeJobQueue {
    async fn finish(&self, job_id: JobId) -> AppResult<()> {
        let mut jobs = self.jobs.lock().await;
        if let Some(job) = jobs.iter_mut().find(|job| job.job_id == job_id) {
            job.done = true;
        }
        Ok(())
    }
}

#[derive(Default)]
struct FakeNotifier {
    messages: Mutex<Vec<(Vec<String>, String)>>,
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn notify(&self, recipients: &[String], message: &str) -> AppResult<()> {
        self.messages
            .lock()
            .await
            .push((recipients.to_vec(), message.to_owned()));
        Ok(())
    }
}

#[derive(Default)]
struct FakeRecordStore {
    records: Mutex<HashMap<(String, String), Value>>,
    next_id: Mutex<u64>,
}

#[async_trait]
impl RecordStore for FakeRecordStore {
    async fn create_record(&self, entity: &str, data: Value) -> AppResult<Value> {
        let mut next_id = self.next_id.lock().await;
        *next_id += 1;
        let record_id = format!("rec-{next_id}");

        let mut record = data.as_object().cloned().unwrap_or_default();
        record.insert("id".to_owned(), json!(record_id));
        let record = Value::Object(record);

        self.records
            .lock()
            .await
            .insert((entity.to_owned(), record_id), record.clone());
        Ok(record)
    }

    async fn update_record(&self, entity: &str, entity_id: &str, data: Value) -> AppResult<Value> {
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(&(entity.to_owned(), entity_id.to_owned()))
            .ok_or_else(|| {
                AppError::Permanent(format!("record '{entity}/{entity_id}' does not exist"))
            })?;

        if let (Some(target), Some(changes)) = (record.as_object_mut(), data.as_object()) {
            for (key, value) in changes {
                target.insert(key.clone(), value.clone());
            }
        }

        Ok(record.clone())
    }

    async fn delete_record(&self, entity: &str, entity_id: &str) -> AppResult<()> {
        self.records
            .lock()
            .await
            .remove(&(entity.to_owned(), entity_id.to_owned()))
            .map(|_| ())
            .ok_or_else(|| {
                AppError::Permanent(format!("record '{entity}/{entity_id}' does not exist"))
            })
    }
}

#[derive(Default)]
struct FakeWebhookTransport {
    responses: Mutex<Vec<AppResult<WebhookResponse>>>,
    requests: Mutex<Vec<WebhookRequest>>,
    delay_ms: Mutex<u64>,
}

#[async_trait]
impl WebhookTransport for FakeWebhookTransport {
    async fn dispatch(&self, request: WebhookRequest) -> AppResult<WebhookResponse> {
        self.requests.lock().await.push(request);

        let delay_ms = *self.delay_ms.lock().await;
        if delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
        }

        let mut responses = self.responses.lock().await;
        if responses.is_empty() {
            return Ok(WebhookResponse {
                status: 200,
                body: json!({}),
            });
        }

        responses.remove(0)
    }
}

#[derive(Default)]
struct FakeEventSink {
    events: Mutex<Vec<LifecycleEvent>>,
}

#[async_trait]
impl LifecycleEventSink for FakeEventSink {
    async fn publish(&self, event: LifecycleEvent) -> AppResult<()> {
        self.events.lock().await.push(event);
        Ok(())
    }
}

struct Harness {
    workflow_store: Arc<FakeWorkflowStore>,
    execution_store: Arc<FakeExecutionStore>,
    approval_store: Arc<FakeApprovalStore>,
    job_queue: Arc<FakeJobQueue>,
    notifier: Arc<FakeNotifier>,
    webhook: Arc<FakeWebhookTransport>,
    sink: Arc<FakeEventSink>,
    approval_service: ApprovalService,
    execution_service: ExecutionService,
    router: EventRouter,
    resumer: WorkflowResumer,
}

fn harness() -> Harness {
    build_harness(None)
}

fn harness_with_shutdown(shutdown: tokio::sync::watch::Receiver<bool>) -> Harness {
    build_harness(Some(shutdown))
}

fn build_harness(shutdown: Option<tokio::sync::watch::Receiver<bool>>) -> Harness {
    let workflow_store = Arc::new(FakeWorkflowStore::default());
    let event_store = Arc::new(FakeEventStore::default());
    let execution_store = Arc::new(FakeExecutionStore::default());
    let approval_store = Arc::new(FakeApprovalStore {
        approvals: Mutex::new(HashMap::new()),
        execution_store: Arc::clone(&execution_store),
    });
    let job_queue = Arc::new(FakeJobQueue::default());
    let notifier = Arc::new(FakeNotifier::default());
    let record_store = Arc::new(FakeRecordStore::default());
    let webhook = Arc::new(FakeWebhookTransport::default());
    let sink = Arc::new(FakeEventSink::default());
    let runtime = Arc::new(EngineRuntime::new("test-worker", 4));

    let approval_service = ApprovalService::new(
        Arc::clone(&approval_store) as Arc<dyn ApprovalStore>,
        Arc::clone(&job_queue) as Arc<dyn EngineJobQueue>,
        Arc::clone(&notifier) as Arc<dyn Notifier>,
        Arc::clone(&sink) as Arc<dyn LifecycleEventSink>,
    );

    let mut execution_service = ExecutionService::new(
        ExecutionServiceDeps {
            workflow_store: Arc::clone(&workflow_store) as Arc<dyn WorkflowStore>,
            execution_store: Arc::clone(&execution_store) as Arc<dyn ExecutionStore>,
            job_queue: Arc::clone(&job_queue) as Arc<dyn EngineJobQueue>,
            approval_service: approval_service.clone(),
            notifier: Arc::clone(&notifier) as Arc<dyn Notifier>,
            record_store: Arc::clone(&record_store) as Arc<dyn RecordStore>,
            webhook_transport: Arc::clone(&webhook) as Arc<dyn WebhookTransport>,
            event_sink: Arc::clone(&sink) as Arc<dyn LifecycleEventSink>,
            runtime,
        },
        ExecutionMode::Inline,
    );
    if let Some(shutdown) = shutdown {
        execution_service = execution_service.with_shutdown_signal(shutdown);
    }

    let router = EventRouter::new(
        Arc::clone(&event_store) as Arc<dyn EventStore>,
        Arc::clone(&workflow_store) as Arc<dyn WorkflowStore>,
        Arc::clone(&execution_store) as Arc<dyn ExecutionStore>,
        Arc::clone(&job_queue) as Arc<dyn EngineJobQueue>,
        execution_service.clone(),
    );

    let resumer = WorkflowResumer::new(
        Arc::clone(&execution_store) as Arc<dyn ExecutionStore>,
        Arc::clone(&approval_store) as Arc<dyn ApprovalStore>,
        Arc::clone(&workflow_store) as Arc<dyn WorkflowStore>,
        Arc::clone(&job_queue) as Arc<dyn EngineJobQueue>,
        execution_service.clone(),
    );

    Harness {
        workflow_store,
        execution_store,
        approval_store,
        job_queue,
        notifier,
        webhook,
        sink,
        approval_service,
        execution_service,
        router,
        resumer,
    }
}

async fn publish(
    harness: &Harness,
    workflow_id: &str,
    version: &str,
    enabled: bool,
    definition: Value,
) -> PublishedWorkflow {
    let definition: WorkflowDefinition = serde_json::from_value(definition).unwrap();
    harness
        .workflow_store
        .publish(crate::engine_ports::PublishWorkflowInput {
            workflow_id: workflow_id.to_owned(),
            version: version.to_owned(),
            name: workflow_id.to_owned(),
            enabled,
            tags: Vec::new(),
            definition,
        })
        .await
        .unwrap()
}

async fn route_event(harness: &Harness, event_type: &str, payload: Value) -> crate::RoutedEvent {
    harness
        .router
        .route(IngestEventInput {
            id: None,
            event_type: event_type.to_owned(),
            source: "test".to_owned(),
            payload,
        })
        .await
        .unwrap()
}

/// Claims and processes queued jobs until the queue drains.
async fn drain_jobs(harness: &Harness) {
    harness
        .resumer
        .drain_queue("test-worker", 16, 30)
        .await
        .unwrap();
}

async fn single_execution(harness: &Harness) -> ExecutionRecord {
    let executions = harness
        .execution_store
        .list(ExecutionListQuery::default())
        .await
        .unwrap();
    assert_eq!(executions.len(), 1, "expected exactly one execution");
    executions.into_iter().next().unwrap()
}

fn allow_workflow(event: &str) -> Value {
    json!({
        "trigger": {"type": "event", "event": event},
        "steps": [
            {"id": "decide", "type": "action", "action": {"type": "allow"}},
        ],
    })
}

#[tokio::test]
async fn simple_allow_completes_with_one_step_row() {
    let harness = harness();
    publish(&harness, "orders", "1.0.0", true, allow_workflow("order.created")).await;

    let routed = route_event(&harness, "order.created", json!({})).await;
    assert_eq!(routed.executions_started.len(), 1);

    let execution = single_execution(&harness).await;
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.result, Some(ExecutionResult::Allowed));

    let steps = harness
        .execution_store
        .list_step_executions(execution.id)
        .await
        .unwrap();
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].status, StepExecutionStatus::Completed);
}

#[tokio::test]
async fn condition_branch_selects_allow_or_block() {
    let definition = json!({
        "trigger": {"type": "event", "event": "order.created"},
        "steps": [
            {
                "id": "gate",
                "type": "condition",
                "condition": {"field": "trigger.order.total", "operator": "gt", "value": 1000},
                "on_true": "high",
                "on_false": "low",
            },
            {"id": "high", "type": "action", "action": {"type": "allow"}},
            {"id": "low", "type": "action", "action": {"type": "block", "reason": "cheap"}},
        ],
    });

    let harness1 = harness();
    publish(&harness1, "orders", "1.0.0", true, definition.clone()).await;
    route_event(&harness1, "order.created", json!({"order": {"total": 1500}})).await;

    let execution = single_execution(&harness1).await;
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.result, Some(ExecutionResult::Allowed));

    let harness2 = harness();
    publish(&harness2, "orders", "1.0.0", true, definition).await;
    route_event(&harness2, "order.created", json!({"order": {"total": 10}})).await;

    let execution = single_execution(&harness2).await;
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.result, Some(ExecutionResult::Blocked));
    assert_eq!(execution.error_message.as_deref(), Some("cheap"));
}

#[tokio::test]
async fn approval_happy_path_resumes_to_completion() {
    let definition = json!({
        "trigger": {"type": "event", "event": "order.created"},
        "steps": [
            {
                "id": "review",
                "type": "execute",
                "actions": [
                    {"type": "create_approval_request", "approver_role": "manager", "reason": "high-value"},
                ],
                "next": "ship",
            },
            {"id": "ship", "type": "action", "action": {"type": "allow"}},
        ],
    });

    let harness = harness();
    publish(&harness, "orders", "1.0.0", true, definition).await;
    route_event(&harness, "order.created", json!({"order": {"total": 9000}})).await;

    let execution = single_execution(&harness).await;
    assert_eq!(execution.status, ExecutionStatus::Waiting);

    let approvals = harness
        .approval_service
        .list(ApprovalListQuery::default())
        .await
        .unwrap();
    assert_eq!(approvals.len(), 1);
    assert_eq!(approvals[0].status, ApprovalStatus::Pending);
    assert_eq!(harness.notifier.messages.lock().await.len(), 1);

    harness
        .approval_service
        .decide(
            approvals[0].id,
            ApprovalDecision::Approve,
            Some("looks fine"),
            "mgr-1",
        )
        .await
        .unwrap();
    drain_jobs(&harness).await;

    let execution = single_execution(&harness).await;
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.result, Some(ExecutionResult::Allowed));
    assert_eq!(execution.context["approval"]["status"], json!("approved"));
}

#[tokio::test]
async fn approval_expiry_takes_the_timeout_successor() {
    let definition = json!({
        "trigger": {"type": "event", "event": "order.created"},
        "steps": [
            {
                "id": "review",
                "type": "execute",
                "actions": [
                    {
                        "type": "create_approval_request",
                        "approver_role": "manager",
                        "reason": "high-value",
                        "ttl_seconds": 0,
                    },
                ],
                "next": "ship",
                "on_timeout": "cancel",
            },
            {"id": "ship", "type": "action", "action": {"type": "allow"}},
            {"id": "cancel", "type": "action", "action": {"type": "block", "reason": "expired"}},
        ],
    });

    let harness = harness();
    publish(&harness, "orders", "1.0.0", true, definition).await;
    route_event(&harness, "order.created", json!({})).await;

    let expired = harness.approval_service.expire_due().await.unwrap();
    assert_eq!(expired, 1);
    drain_jobs(&harness).await;

    let execution = single_execution(&harness).await;
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.result, Some(ExecutionResult::Blocked));
    assert_eq!(execution.error_message.as_deref(), Some("expired"));
}

#[tokio::test]
async fn rejected_approval_blocks_the_execution() {
    let definition = json!({
        "trigger": {"type": "event", "event": "order.created"},
        "steps": [
            {
                "id": "review",
                "type": "action",
                "action": {"type": "require_approval", "approver_role": "manager", "reason": "check"},
                "next": "ship",
            },
            {"id": "ship", "type": "action", "action": {"type": "allow"}},
        ],
    });

    let harness = harness();
    publish(&harness, "orders", "1.0.0", true, definition).await;
    route_event(&harness, "order.created", json!({})).await;

    let approvals = harness
        .approval_service
        .list(ApprovalListQuery::default())
        .await
        .unwrap();
    harness
        .approval_service
        .decide(
            approvals[0].id,
            ApprovalDecision::Reject,
            Some("too risky"),
            "mgr-1",
        )
        .await
        .unwrap();
    drain_jobs(&harness).await;

    let execution = single_execution(&harness).await;
    assert_eq!(execution.status, ExecutionStatus::Blocked);
    assert_eq!(execution.result, Some(ExecutionResult::Blocked));
    assert_eq!(execution.error_message.as_deref(), Some("too risky"));
}

#[tokio::test]
async fn deciding_twice_is_a_conflict() {
    let definition = json!({
        "trigger": {"type": "event", "event": "order.created"},
        "steps": [
            {
                "id": "review",
                "type": "action",
                "action": {"type": "require_approval", "approver_role": "manager", "reason": "check"},
            },
        ],
    });

    let harness = harness();
    publish(&harness, "orders", "1.0.0", true, definition).await;
    route_event(&harness, "order.created", json!({})).await;

    let approvals = harness
        .approval_service
        .list(ApprovalListQuery::default())
        .await
        .unwrap();
    harness
        .approval_service
        .decide(approvals[0].id, ApprovalDecision::Approve, None, "mgr-1")
        .await
        .unwrap();

    let second = harness
        .approval_service
        .decide(approvals[0].id, ApprovalDecision::Reject, None, "mgr-2")
        .await;
    assert!(matches!(second, Err(AppError::Conflict(_))));
}

#[tokio::test]
async fn parallel_all_must_pass_fails_with_surviving_child_rows() {
    let definition = json!({
        "trigger": {"type": "event", "event": "order.created"},
        "steps": [
            {
                "id": "fanout",
                "type": "parallel",
                "strategy": "all_must_pass",
                "branches": [
                    {"id": "a_log", "type": "execute", "actions": [{"type": "log", "message": "left"}]},
                    {"id": "b_call", "type": "execute", "actions": [{"type": "webhook", "url": "https://api.example.com/hook"}]},
                    {"id": "c_log", "type": "execute", "actions": [{"type": "log", "message": "right"}]},
                ],
            },
        ],
    });

    let harness = harness();
    harness
        .webhook
        .responses
        .lock()
        .await
        .push(Err(AppError::Permanent(
            "upstream returned status 422".to_owned(),
        )));
    publish(&harness, "orders", "1.0.0", true, definition).await;
    route_event(&harness, "order.created", json!({})).await;

    let execution = single_execution(&harness).await;
    assert_eq!(execution.status, ExecutionStatus::Failed);

    let steps = harness
        .execution_store
        .list_step_executions(execution.id)
        .await
        .unwrap();
    let completed_children: Vec<&str> = steps
        .iter()
        .filter(|row| row.status == StepExecutionStatus::Completed)
        .map(|row| row.step_id.as_str())
        .collect();
    assert!(completed_children.contains(&"a_log"));
    assert!(completed_children.contains(&"c_log"));
    assert!(
        steps
            .iter()
            .any(|row| row.step_id == "b_call" && row.status == StepExecutionStatus::Failed)
    );
    assert!(
        steps
            .iter()
            .any(|row| row.step_id == "fanout" && row.status == StepExecutionStatus::Failed)
    );
}

#[tokio::test]
async fn parallel_best_effort_records_failures_and_succeeds() {
    let definition = json!({
        "trigger": {"type": "event", "event": "order.created"},
        "steps": [
            {
                "id": "fanout",
                "type": "parallel",
                "strategy": "best_effort",
                "branches": [
                    {"id": "a_log", "type": "execute", "actions": [{"type": "log", "message": "left"}]},
                    {"id": "b_call", "type": "execute", "actions": [{"type": "webhook", "url": "https://api.example.com/hook"}]},
                ],
            },
        ],
    });

    let harness = harness();
    harness
        .webhook
        .responses
        .lock()
        .await
        .push(Err(AppError::Permanent(
            "upstream returned status 410".to_owned(),
        )));
    publish(&harness, "orders", "1.0.0", true, definition).await;
    route_event(&harness, "order.created", json!({})).await;

    let execution = single_execution(&harness).await;
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.result, Some(ExecutionResult::Executed));

    let output = &execution.context["steps"]["fanout"];
    assert_eq!(output["a_log"]["status"], json!("completed"));
    assert_eq!(output["b_call"]["status"], json!("failed"));
}

#[tokio::test]
async fn parallel_any_can_pass_completes_on_first_success() {
    let definition = json!({
        "trigger": {"type": "event", "event": "order.created"},
        "steps": [
            {
                "id": "fanout",
                "type": "parallel",
                "strategy": "any_can_pass",
                "branches": [
                    {"id": "a_slow", "type": "execute", "actions": [{"type": "webhook", "url": "https://slow.example.com/hook"}]},
                    {"id": "b_fast", "type": "execute", "actions": [{"type": "log", "message": "quick"}]},
                ],
            },
        ],
    });

    let harness = harness();
    // The slow branch never answers within the test; the winner must not
    // wait for it and the abort must not leave its row running.
    *harness.webhook.delay_ms.lock().await = 10_000;
    publish(&harness, "orders", "1.0.0", true, definition).await;
    route_event(&harness, "order.created", json!({})).await;

    let execution = single_execution(&harness).await;
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.result, Some(ExecutionResult::Executed));

    let output = &execution.context["steps"]["fanout"];
    assert!(output.get("b_fast").is_some());
    assert!(output.get("a_slow").is_none());

    let steps = harness
        .execution_store
        .list_step_executions(execution.id)
        .await
        .unwrap();
    assert!(
        steps
            .iter()
            .any(|row| row.step_id == "b_fast" && row.status == StepExecutionStatus::Completed)
    );
    assert!(
        steps
            .iter()
            .any(|row| row.step_id == "fanout" && row.status == StepExecutionStatus::Completed)
    );

    let slow = steps
        .iter()
        .find(|row| row.step_id == "a_slow")
        .expect("aborted branch keeps its step row");
    assert_eq!(slow.status, StepExecutionStatus::Failed);
    assert!(
        slow.error_message
            .as_deref()
            .is_some_and(|message| message.contains("aborted"))
    );
}

#[tokio::test]
async fn shutdown_pauses_in_flight_executions_for_next_boot() {
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let harness = harness_with_shutdown(shutdown_rx);
    publish(&harness, "orders", "1.0.0", true, allow_workflow("order.created")).await;

    shutdown_tx.send(true).unwrap();
    route_event(&harness, "order.created", json!({})).await;

    let execution = single_execution(&harness).await;
    assert_eq!(execution.status, ExecutionStatus::Paused);
    assert_eq!(execution.current_step_id.as_deref(), Some("decide"));
    assert!(
        harness
            .execution_store
            .list_step_executions(execution.id)
            .await
            .unwrap()
            .is_empty()
    );

    // Next boot: the reclaimed start job drives the paused execution from
    // its persisted step.
    shutdown_tx.send(false).unwrap();
    harness
        .execution_service
        .run_start_job(execution.id)
        .await
        .unwrap();

    let execution = single_execution(&harness).await;
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.result, Some(ExecutionResult::Allowed));
}

#[tokio::test]
async fn event_wait_resumes_from_persisted_state() {
    let definition = json!({
        "trigger": {"type": "event", "event": "shipment.requested"},
        "steps": [
            {"id": "hold", "type": "wait", "event": "carrier.confirmed", "next": "done"},
            {"id": "done", "type": "action", "action": {"type": "allow"}},
        ],
    });

    let harness = harness();
    publish(&harness, "shipments", "1.0.0", true, definition).await;
    route_event(&harness, "shipment.requested", json!({})).await;

    let execution = single_execution(&harness).await;
    assert_eq!(execution.status, ExecutionStatus::Waiting);

    let routed = route_event(&harness, "carrier.confirmed", json!({"eta": "tomorrow"})).await;
    assert_eq!(routed.resumes_enqueued, 1);
    drain_jobs(&harness).await;

    let execution = single_execution(&harness).await;
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.result, Some(ExecutionResult::Allowed));
    assert_eq!(execution.context["event"]["payload"]["eta"], json!("tomorrow"));
}

#[tokio::test]
async fn transient_webhook_failures_retry_until_success() {
    let definition = json!({
        "trigger": {"type": "event", "event": "order.created"},
        "steps": [
            {
                "id": "notify_erp",
                "type": "execute",
                "actions": [{"type": "webhook", "url": "https://erp.example.com/orders"}],
                "retry": {"max_attempts": 3, "backoff": "fixed:1"},
            },
        ],
    });

    let harness = harness();
    {
        let mut responses = harness.webhook.responses.lock().await;
        responses.push(Err(AppError::Transient("connection reset".to_owned())));
        responses.push(Err(AppError::Transient("connection reset".to_owned())));
        responses.push(Ok(WebhookResponse {
            status: 200,
            body: json!({"ok": true}),
        }));
    }
    publish(&harness, "orders", "1.0.0", true, definition).await;
    route_event(&harness, "order.created", json!({})).await;

    let execution = single_execution(&harness).await;
    assert_eq!(execution.status, ExecutionStatus::Completed);

    let steps = harness
        .execution_store
        .list_step_executions(execution.id)
        .await
        .unwrap();
    assert_eq!(steps.len(), 3);
    assert_eq!(steps[0].status, StepExecutionStatus::Failed);
    assert_eq!(steps[1].status, StepExecutionStatus::Failed);
    assert_eq!(steps[2].status, StepExecutionStatus::Completed);
}

#[tokio::test]
async fn permanent_webhook_failure_is_not_retried() {
    let definition = json!({
        "trigger": {"type": "event", "event": "order.created"},
        "steps": [
            {
                "id": "notify_erp",
                "type": "execute",
                "actions": [{"type": "webhook", "url": "https://erp.example.com/orders"}],
                "retry": {"max_attempts": 3, "backoff": "fixed:1"},
            },
        ],
    });

    let harness = harness();
    harness
        .webhook
        .responses
        .lock()
        .await
        .push(Err(AppError::Permanent(
            "upstream returned status 400".to_owned(),
        )));
    publish(&harness, "orders", "1.0.0", true, definition).await;
    route_event(&harness, "order.created", json!({})).await;

    let execution = single_execution(&harness).await;
    assert_eq!(execution.status, ExecutionStatus::Failed);

    let steps = harness
        .execution_store
        .list_step_executions(execution.id)
        .await
        .unwrap();
    assert_eq!(steps.len(), 1);
}

#[tokio::test]
async fn router_starts_only_the_highest_enabled_version() {
    let harness = harness();
    publish(&harness, "orders", "1.0.0", true, allow_workflow("order.created")).await;
    publish(&harness, "orders", "1.2.0", true, allow_workflow("order.created")).await;
    publish(&harness, "orders", "2.0.0", false, allow_workflow("order.created")).await;

    let routed = route_event(&harness, "order.created", json!({})).await;
    assert_eq!(routed.executions_started.len(), 1);

    let execution = single_execution(&harness).await;
    let workflow = harness
        .workflow_store
        .find_by_ref(execution.workflow_ref)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(workflow.version, "1.2.0");
}

#[tokio::test]
async fn duplicate_event_ids_route_once() {
    let harness = harness();
    publish(&harness, "orders", "1.0.0", true, allow_workflow("order.created")).await;

    let event_id = EventId::new();
    let input = IngestEventInput {
        id: Some(event_id),
        event_type: "order.created".to_owned(),
        source: "test".to_owned(),
        payload: json!({}),
    };

    let first = harness.router.route(input.clone()).await.unwrap();
    let second = harness.router.route(input).await.unwrap();

    assert!(!first.deduplicated);
    assert!(second.deduplicated);
    assert!(second.executions_started.is_empty());

    let executions = harness
        .execution_store
        .list(ExecutionListQuery::default())
        .await
        .unwrap();
    assert_eq!(executions.len(), 1);
}

#[tokio::test]
async fn trigger_filter_skips_non_matching_events() {
    let definition = json!({
        "trigger": {
            "type": "event",
            "event": "order.created",
            "filter": {"field": "region", "operator": "eq", "value": "eu"},
        },
        "steps": [
            {"id": "decide", "type": "action", "action": {"type": "allow"}},
        ],
    });

    let harness = harness();
    publish(&harness, "orders", "1.0.0", true, definition).await;

    let skipped = route_event(&harness, "order.created", json!({"region": "us"})).await;
    assert!(skipped.executions_started.is_empty());

    let matched = route_event(&harness, "order.created", json!({"region": "eu"})).await;
    assert_eq!(matched.executions_started.len(), 1);
}

#[tokio::test]
async fn interpolation_renders_context_paths_into_notifications() {
    let definition = json!({
        "trigger": {"type": "event", "event": "order.created"},
        "steps": [
            {
                "id": "tell_ops",
                "type": "execute",
                "actions": [
                    {
                        "type": "notify",
                        "recipients": ["ops@example.com"],
                        "message": "order ${trigger.order.id} total ${trigger.order.total}${trigger.missing}",
                    },
                ],
            },
        ],
    });

    let harness = harness();
    publish(&harness, "orders", "1.0.0", true, definition).await;
    route_event(
        &harness,
        "order.created",
        json!({"order": {"id": "ord-7", "total": 250}}),
    )
    .await;

    let messages = harness.notifier.messages.lock().await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].1, "order ord-7 total 250");
}

#[tokio::test]
async fn cancelled_executions_ignore_later_resume_jobs() {
    let definition = json!({
        "trigger": {"type": "event", "event": "shipment.requested"},
        "steps": [
            {"id": "hold", "type": "wait", "event": "carrier.confirmed", "next": "done"},
            {"id": "done", "type": "action", "action": {"type": "allow"}},
        ],
    });

    let harness = harness();
    publish(&harness, "shipments", "1.0.0", true, definition).await;
    route_event(&harness, "shipment.requested", json!({})).await;

    let execution = single_execution(&harness).await;
    harness
        .execution_service
        .cancel(execution.id, "operator request")
        .await
        .unwrap();

    route_event(&harness, "carrier.confirmed", json!({})).await;
    drain_jobs(&harness).await;

    let execution = single_execution(&harness).await;
    assert_eq!(execution.status, ExecutionStatus::Cancelled);
    assert!(
        harness
            .sink
            .events
            .lock()
            .await
            .iter()
            .any(|event| matches!(event, LifecycleEvent::ExecutionCancelled { .. }))
    );
}

#[tokio::test]
async fn resume_sweep_replays_decided_but_unresumed_approvals() {
    let definition = json!({
        "trigger": {"type": "event", "event": "order.created"},
        "steps": [
            {
                "id": "review",
                "type": "action",
                "action": {"type": "require_approval", "approver_role": "manager", "reason": "check"},
                "next": "ship",
            },
            {"id": "ship", "type": "action", "action": {"type": "allow"}},
        ],
    });

    let harness = harness();
    publish(&harness, "orders", "1.0.0", true, definition).await;
    route_event(&harness, "order.created", json!({})).await;

    // Simulate a crash after the decision was recorded but before its
    // resume job survived: decide directly against the store.
    let approvals = harness
        .approval_store
        .list(ApprovalListQuery::default())
        .await
        .unwrap();
    harness
        .approval_store
        .transition(approvals[0].id, ApprovalStatus::Approved, Some("mgr"), None)
        .await
        .unwrap();

    let replayed = harness.resumer.sweep_unresumed_approvals().await.unwrap();
    assert_eq!(replayed, 1);
    drain_jobs(&harness).await;

    let execution = single_execution(&harness).await;
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.result, Some(ExecutionResult::Allowed));
}

#[tokio::test]
async fn wait_timeout_sweep_takes_the_timeout_successor() {
    let definition = json!({
        "trigger": {"type": "event", "event": "shipment.requested"},
        "steps": [
            {
                "id": "hold",
                "type": "wait",
                "event": "carrier.confirmed",
                "timeout_seconds": 0,
                "next": "done",
                "on_timeout": "escalate",
            },
            {"id": "done", "type": "action", "action": {"type": "allow"}},
            {"id": "escalate", "type": "action", "action": {"type": "block", "reason": "no carrier"}},
        ],
    });

    let harness = harness();
    publish(&harness, "shipments", "1.0.0", true, definition).await;
    route_event(&harness, "shipment.requested", json!({})).await;

    let enqueued = harness.resumer.sweep_wait_timeouts().await.unwrap();
    assert_eq!(enqueued, 1);
    drain_jobs(&harness).await;

    let execution = single_execution(&harness).await;
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.result, Some(ExecutionResult::Blocked));
    assert_eq!(execution.error_message.as_deref(), Some("no carrier"));
}

#[tokio::test]
async fn step_outputs_are_recorded_and_visible_downstream() {
    let definition = json!({
        "trigger": {"type": "event", "event": "order.created"},
        "steps": [
            {
                "id": "persist",
                "type": "execute",
                "actions": [{"type": "create_record", "entity": "audit", "data": {"order": "${trigger.order_id}"}}],
                "next": "tell",
            },
            {
                "id": "tell",
                "type": "execute",
                "actions": [{"type": "notify", "recipients": ["ops@example.com"], "message": "stored ${steps.persist.0.id}"}],
            },
        ],
    });

    let harness = harness();
    publish(&harness, "orders", "1.0.0", true, definition).await;
    route_event(&harness, "order.created", json!({"order_id": "ord-9"})).await;

    let execution = single_execution(&harness).await;
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.result, Some(ExecutionResult::Executed));

    let messages = harness.notifier.messages.lock().await;
    assert_eq!(messages[0].1, "stored rec-1");
}
