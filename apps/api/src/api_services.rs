use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use trellis_application::{
    ApprovalService, ApprovalStore, EngineJobQueue, EngineRuntime, EventRouter, EventStore,
    ExecutionService, ExecutionServiceDeps, ExecutionStore, LifecycleEventSink, Notifier,
    RecordStore, WebhookTransport, WorkflowResumer, WorkflowStore,
};
use trellis_core::{AppError, AppResult};
use trellis_infrastructure::{
    ConsoleNotifier, HttpWebhookTransport, NoopEventSink, PostgresApprovalStore,
    PostgresEngineJobQueue, PostgresEventStore, PostgresExecutionStore, PostgresRecordStore,
    PostgresWorkflowStore, RedisEventSink, RedisExecutionLeaseCoordinator,
};

use crate::api_config::ApiConfig;
use crate::state::AppState;

/// Connects the Postgres pool and applies embedded migrations.
pub async fn connect_and_migrate(database_url: &str) -> AppResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .map_err(|error| AppError::Internal(format!("failed to connect to database: {error}")))?;

    sqlx::migrate!("../../crates/infrastructure/migrations")
        .run(&pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to run migrations: {error}")))?;

    Ok(pool)
}

/// Wires repositories, services, and the router into the handler state.
pub fn build_app_state(pool: PgPool, config: &ApiConfig) -> AppResult<AppState> {
    let workflow_store: Arc<dyn WorkflowStore> = Arc::new(PostgresWorkflowStore::new(pool.clone()));
    let event_store: Arc<dyn EventStore> = Arc::new(PostgresEventStore::new(pool.clone()));
    let execution_store: Arc<dyn ExecutionStore> =
        Arc::new(PostgresExecutionStore::new(pool.clone()));
    let approval_store: Arc<dyn ApprovalStore> = Arc::new(PostgresApprovalStore::new(pool.clone()));
    let job_queue: Arc<dyn EngineJobQueue> = Arc::new(PostgresEngineJobQueue::new(pool.clone()));
    let record_store: Arc<dyn RecordStore> = Arc::new(PostgresRecordStore::new(pool.clone()));
    let notifier: Arc<dyn Notifier> = Arc::new(ConsoleNotifier::new());
    let webhook_transport: Arc<dyn WebhookTransport> = Arc::new(HttpWebhookTransport::new(
        reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|error| AppError::Internal(format!("failed to build HTTP client: {error}")))?,
    ));

    let redis_client = config
        .redis_url
        .as_deref()
        .map(redis::Client::open)
        .transpose()
        .map_err(|error| AppError::Validation(format!("invalid REDIS_URL: {error}")))?;

    let event_sink: Arc<dyn LifecycleEventSink> = match &redis_client {
        Some(client) => Arc::new(RedisEventSink::new(client.clone(), "workflow.events")),
        None => Arc::new(NoopEventSink::new()),
    };

    let runtime = Arc::new(EngineRuntime::new(
        format!("api-{}", std::process::id()),
        config.parallel_branch_limit,
    ));

    let approval_service = ApprovalService::new(
        Arc::clone(&approval_store),
        Arc::clone(&job_queue),
        Arc::clone(&notifier),
        Arc::clone(&event_sink),
    )
    .with_approver_addresses(config.approver_addresses.clone());

    let mut execution_service = ExecutionService::new(
        ExecutionServiceDeps {
            workflow_store: Arc::clone(&workflow_store),
            execution_store: Arc::clone(&execution_store),
            job_queue: Arc::clone(&job_queue),
            approval_service: approval_service.clone(),
            notifier,
            record_store,
            webhook_transport,
            event_sink,
            runtime,
        },
        config.execution_mode,
    );

    if let Some(client) = &redis_client {
        execution_service = execution_service.with_lease_coordinator(Arc::new(
            RedisExecutionLeaseCoordinator::new(client.clone(), "exec:lease"),
        ));
    }

    let resumer = WorkflowResumer::new(
        Arc::clone(&execution_store),
        Arc::clone(&approval_store),
        Arc::clone(&workflow_store),
        Arc::clone(&job_queue),
        execution_service.clone(),
    );

    let event_router = EventRouter::new(
        event_store,
        Arc::clone(&workflow_store),
        Arc::clone(&execution_store),
        Arc::clone(&job_queue),
        execution_service.clone(),
    );

    Ok(AppState {
        event_router,
        approval_service,
        execution_service,
        resumer,
        execution_mode: config.execution_mode,
        worker_id: format!("api-{}", std::process::id()),
        workflow_store,
        execution_store,
        postgres_pool: pool,
        redis_client,
    })
}
