//! Trellis engine worker runtime.
//!
//! Claims start and resume jobs from the durable queue, drives executions
//! under per-execution leases, and runs the periodic approval-expiration
//! and resume sweeps.

#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use trellis_application::{
    ApprovalService, ApprovalStore, ClaimedEngineJob, EngineJobQueue, EngineRuntime,
    ExecutionMode, ExecutionService, ExecutionServiceDeps, ExecutionStore, JobOutcome,
    LifecycleEventSink, Notifier, RecordStore, WebhookTransport, WorkflowResumer, WorkflowStore,
};
use trellis_core::{AppError, AppResult};
use trellis_infrastructure::{
    ConsoleNotifier, HttpWebhookTransport, NoopEventSink, PostgresApprovalStore,
    PostgresEngineJobQueue, PostgresExecutionStore, PostgresRecordStore, PostgresWorkflowStore,
    RedisEventSink, RedisExecutionLeaseCoordinator, SmtpNotifier, SmtpNotifierConfig,
};

#[derive(Debug, Clone)]
struct WorkerConfig {
    database_url: String,
    redis_url: Option<String>,
    worker_id: String,
    claim_limit: usize,
    max_concurrency: usize,
    lease_seconds: u32,
    poll_interval_ms: u64,
    drain_timeout_seconds: u64,
    parallel_branch_limit: usize,
    approval_sweep_interval_seconds: u64,
    resume_sweep_interval_seconds: u64,
}

struct Engine {
    job_queue: Arc<dyn EngineJobQueue>,
    approval_service: ApprovalService,
    resumer: WorkflowResumer,
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = WorkerConfig::load()?;
    let pool = connect_pool(config.database_url.as_str()).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let engine = build_engine(pool, &config, shutdown_rx.clone())?;

    info!(
        worker_id = %config.worker_id,
        claim_limit = config.claim_limit,
        max_concurrency = config.max_concurrency,
        lease_seconds = config.lease_seconds,
        poll_interval_ms = config.poll_interval_ms,
        approval_sweep_interval_seconds = config.approval_sweep_interval_seconds,
        resume_sweep_interval_seconds = config.resume_sweep_interval_seconds,
        "trellis-worker started"
    );

    let approval_sweep = tokio::spawn(run_approval_sweep(
        engine.approval_service.clone(),
        config.approval_sweep_interval_seconds,
        shutdown_rx.clone(),
    ));
    let resume_sweep = tokio::spawn(run_resume_sweep(
        engine.resumer.clone(),
        config.resume_sweep_interval_seconds,
        shutdown_rx.clone(),
    ));

    let claim_loop = run_claim_loop(&engine, &config, shutdown_rx);
    tokio::pin!(claim_loop);
    let drain = Duration::from_secs(config.drain_timeout_seconds);

    tokio::select! {
        result = &mut claim_loop => {
            if let Err(error) = result {
                warn!(error = %error, "worker claim loop stopped with an error");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received; pausing in-flight executions");
            let _ = shutdown_tx.send(true);

            // The claim loop keeps owning its in-flight jobs: their step
            // loops observe the signal, persist `paused` on the current
            // step, and report the jobs as deferred before the loop exits.
            if tokio::time::timeout(drain, &mut claim_loop).await.is_err() {
                warn!(
                    drain_timeout_seconds = config.drain_timeout_seconds,
                    "drain timeout elapsed before in-flight jobs paused; relying on lease expiry"
                );
            }
        }
    }

    let _ = shutdown_tx.send(true);
    if tokio::time::timeout(drain, async {
        let _ = approval_sweep.await;
        let _ = resume_sweep.await;
    })
    .await
    .is_err()
    {
        warn!(
            drain_timeout_seconds = config.drain_timeout_seconds,
            "drain timeout elapsed before background sweeps stopped"
        );
    }

    info!("trellis-worker stopped");
    Ok(())
}

async fn run_claim_loop(
    engine: &Engine,
    config: &WorkerConfig,
    mut shutdown: watch::Receiver<bool>,
) -> AppResult<()> {
    loop {
        if *shutdown.borrow() {
            return Ok(());
        }

        let claimed = match engine
            .job_queue
            .claim(
                config.worker_id.as_str(),
                config.claim_limit,
                config.lease_seconds,
            )
            .await
        {
            Ok(claimed) => claimed,
            Err(error) => {
                warn!(
                    worker_id = %config.worker_id,
                    error = %error,
                    "failed to claim engine jobs"
                );
                Vec::new()
            }
        };

        if claimed.is_empty() {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(config.poll_interval_ms)) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return Ok(());
                    }
                }
            }
            continue;
        }

        info!(
            worker_id = %config.worker_id,
            claimed_count = claimed.len(),
            "claimed engine jobs"
        );

        execute_claimed_jobs(engine, config, claimed).await;
    }
}

async fn execute_claimed_jobs(engine: &Engine, config: &WorkerConfig, jobs: Vec<ClaimedEngineJob>) {
    let mut in_flight: JoinSet<(ClaimedEngineJob, AppResult<JobOutcome>)> = JoinSet::new();
    let mut remaining = jobs.into_iter();
    let max_concurrency = config.max_concurrency.max(1);

    loop {
        while in_flight.len() < max_concurrency {
            let Some(job) = remaining.next() else {
                break;
            };

            let resumer = engine.resumer.clone();
            in_flight.spawn(async move {
                let result = resumer.process_job(&job).await;
                (job, result)
            });
        }

        let Some(joined) = in_flight.join_next().await else {
            return;
        };

        match joined {
            Ok((job, result)) => {
                let finalize = match &result {
                    Ok(JobOutcome::Finished) => {
                        engine
                            .job_queue
                            .complete(job.job_id, config.worker_id.as_str(), job.lease_token.as_str())
                            .await
                    }
                    // A paused execution keeps its job leased; the lease
                    // expires and the next boot reclaims it.
                    Ok(JobOutcome::Deferred) => {
                        info!(
                            worker_id = %config.worker_id,
                            job_id = %job.job_id,
                            execution_id = %job.execution_id,
                            "engine job deferred by shutdown; left leased for next boot"
                        );
                        Ok(())
                    }
                    Err(error) => {
                        warn!(
                            worker_id = %config.worker_id,
                            job_id = %job.job_id,
                            execution_id = %job.execution_id,
                            error = %error,
                            "engine job failed"
                        );
                        engine
                            .job_queue
                            .fail(
                                job.job_id,
                                config.worker_id.as_str(),
                                job.lease_token.as_str(),
                                error.to_string().as_str(),
                            )
                            .await
                    }
                };

                if let Err(error) = finalize {
                    warn!(
                        worker_id = %config.worker_id,
                        job_id = %job.job_id,
                        error = %error,
                        "failed to finalize engine job"
                    );
                }
            }
            // A panicking job must not take the worker down with it.
            Err(error) => {
                warn!(
                    worker_id = %config.worker_id,
                    error = %error,
                    "engine job task join failed"
                );
            }
        }
    }
}

async fn run_approval_sweep(
    approval_service: ApprovalService,
    interval_seconds: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_seconds.max(1)));

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
            }
            _ = ticker.tick() => {
                match approval_service.expire_due().await {
                    Ok(0) => {}
                    Ok(expired) => info!(expired, "approval expiration sweep finished"),
                    Err(error) => warn!(error = %error, "approval expiration sweep failed"),
                }
            }
        }
    }
}

async fn run_resume_sweep(
    resumer: WorkflowResumer,
    interval_seconds: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_seconds.max(1)));

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
            }
            _ = ticker.tick() => {
                match resumer.sweep_unresumed_approvals().await {
                    Ok(0) => {}
                    Ok(replayed) => info!(replayed, "replayed stranded approval resumes"),
                    Err(error) => warn!(error = %error, "approval resume sweep failed"),
                }

                match resumer.sweep_wait_timeouts().await {
                    Ok(0) => {}
                    Ok(enqueued) => info!(enqueued, "enqueued wait-timeout resumes"),
                    Err(error) => warn!(error = %error, "wait-timeout sweep failed"),
                }
            }
        }
    }
}

fn build_engine(
    pool: PgPool,
    config: &WorkerConfig,
    shutdown: watch::Receiver<bool>,
) -> AppResult<Engine> {
    let workflow_store: Arc<dyn WorkflowStore> = Arc::new(PostgresWorkflowStore::new(pool.clone()));
    let execution_store: Arc<dyn ExecutionStore> =
        Arc::new(PostgresExecutionStore::new(pool.clone()));
    let approval_store: Arc<dyn ApprovalStore> = Arc::new(PostgresApprovalStore::new(pool.clone()));
    let job_queue: Arc<dyn EngineJobQueue> = Arc::new(PostgresEngineJobQueue::new(pool.clone()));
    let record_store: Arc<dyn RecordStore> = Arc::new(PostgresRecordStore::new(pool));
    let notifier = build_notifier();
    let webhook_transport: Arc<dyn WebhookTransport> = Arc::new(HttpWebhookTransport::new(
        reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|error| {
                AppError::Internal(format!("failed to build HTTP client: {error}"))
            })?,
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

    let runtime = Arc::new(
        EngineRuntime::new(config.worker_id.clone(), config.parallel_branch_limit)
            .with_lease_seconds(config.lease_seconds),
    );

    let approval_service = ApprovalService::new(
        Arc::clone(&approval_store),
        Arc::clone(&job_queue),
        Arc::clone(&notifier),
        Arc::clone(&event_sink),
    )
    .with_approver_addresses(approver_addresses_from_env());

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
        ExecutionMode::Queued,
    )
    .with_shutdown_signal(shutdown);

    if let Some(client) = redis_client {
        execution_service = execution_service.with_lease_coordinator(Arc::new(
            RedisExecutionLeaseCoordinator::new(client, "exec:lease"),
        ));
    }

    let resumer = WorkflowResumer::new(
        execution_store,
        approval_store,
        workflow_store,
        Arc::clone(&job_queue),
        execution_service,
    );

    Ok(Engine {
        job_queue,
        approval_service,
        resumer,
    })
}

fn build_notifier() -> Arc<dyn Notifier> {
    let provider = env::var("NOTIFY_PROVIDER")
        .unwrap_or_else(|_| "console".to_owned())
        .to_lowercase();

    if provider == "smtp" {
        let host = env::var("SMTP_HOST").ok();
        let port = env::var("SMTP_PORT")
            .ok()
            .and_then(|value| value.parse::<u16>().ok());
        let username = env::var("SMTP_USERNAME").ok();
        let password = env::var("SMTP_PASSWORD").ok();
        let from_address = env::var("SMTP_FROM_ADDRESS").ok();

        if let (Some(host), Some(port), Some(username), Some(password), Some(from_address)) =
            (host, port, username, password, from_address)
        {
            return Arc::new(SmtpNotifier::new(SmtpNotifierConfig {
                host,
                port,
                username,
                password,
                from_address,
                subject: env::var("SMTP_SUBJECT")
                    .unwrap_or_else(|_| "Trellis workflow notification".to_owned()),
            }));
        }

        warn!(
            "NOTIFY_PROVIDER=smtp but SMTP_* environment variables are incomplete; falling back to console"
        );
    }

    Arc::new(ConsoleNotifier::new())
}

/// Parses `APPROVER_ADDRESSES` as `role=address` pairs separated by commas.
fn approver_addresses_from_env() -> HashMap<String, String> {
    env::var("APPROVER_ADDRESSES")
        .ok()
        .map(|raw| {
            raw.split(',')
                .filter_map(|pair| {
                    let (role, address) = pair.split_once('=')?;
                    let role = role.trim();
                    let address = address.trim();
                    (!role.is_empty() && !address.is_empty())
                        .then(|| (role.to_owned(), address.to_owned()))
                })
                .collect()
        })
        .unwrap_or_default()
}

async fn connect_pool(database_url: &str) -> AppResult<PgPool> {
    PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .map_err(|error| AppError::Internal(format!("failed to connect to database: {error}")))
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

impl WorkerConfig {
    fn load() -> AppResult<Self> {
        let database_url = required_env("DATABASE_URL")?;
        let redis_url = env::var("REDIS_URL")
            .ok()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty());
        let worker_id = env::var("WORKER_ID")
            .ok()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| format!("worker-{}", std::process::id()));
        let claim_limit = parse_env_usize("WORKER_CLAIM_LIMIT", 10)?;
        let max_concurrency = parse_env_usize("WORKER_MAX_CONCURRENCY", 4)?;
        let lease_seconds = parse_env_u32("WORKER_LEASE_SECONDS", 30)?;
        let poll_interval_ms = parse_env_u64("WORKER_POLL_INTERVAL_MS", 1500)?;
        let drain_timeout_seconds = parse_env_u64("WORKER_DRAIN_TIMEOUT_SECONDS", 20)?;
        let parallel_branch_limit = parse_env_usize("WORKER_PARALLEL_BRANCH_LIMIT", 16)?;
        let approval_sweep_interval_seconds =
            parse_env_u64("APPROVAL_SWEEP_INTERVAL_SECONDS", 300)?;
        let resume_sweep_interval_seconds = parse_env_u64("RESUME_SWEEP_INTERVAL_SECONDS", 60)?;

        if claim_limit == 0 {
            return Err(AppError::Validation(
                "WORKER_CLAIM_LIMIT must be greater than zero".to_owned(),
            ));
        }

        if max_concurrency == 0 {
            return Err(AppError::Validation(
                "WORKER_MAX_CONCURRENCY must be greater than zero".to_owned(),
            ));
        }

        if lease_seconds == 0 {
            return Err(AppError::Validation(
                "WORKER_LEASE_SECONDS must be greater than zero".to_owned(),
            ));
        }

        if poll_interval_ms == 0 {
            return Err(AppError::Validation(
                "WORKER_POLL_INTERVAL_MS must be greater than zero".to_owned(),
            ));
        }

        Ok(Self {
            database_url,
            redis_url,
            worker_id,
            claim_limit,
            max_concurrency,
            lease_seconds,
            poll_interval_ms,
            drain_timeout_seconds,
            parallel_branch_limit,
            approval_sweep_interval_seconds,
            resume_sweep_interval_seconds,
        })
    }
}

fn required_env(name: &str) -> AppResult<String> {
    env::var(name).map_err(|_| AppError::Validation(format!("{name} is required")))
}

fn parse_env_usize(name: &str, default: usize) -> AppResult<usize> {
    match env::var(name) {
        Ok(value) => value.parse::<usize>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}

fn parse_env_u32(name: &str, default: u32) -> AppResult<u32> {
    match env::var(name) {
        Ok(value) => value.parse::<u32>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}

fn parse_env_u64(name: &str, default: u64) -> AppResult<u64> {
    match env::var(name) {
        Ok(value) => value.parse::<u64>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}
