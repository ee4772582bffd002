//! Adapters binding the engine ports to Postgres, Redis, HTTP, and SMTP.

#![forbid(unsafe_code)]

/// Console notification transport for local development.
pub mod console_notifier;
/// No-op lifecycle sink.
pub mod noop_event_sink;
/// Outbound HTTP transport for webhook actions.
pub mod http_webhook_transport;
/// Postgres approval repository.
pub mod postgres_approval_store;
/// Postgres durable job queue.
pub mod postgres_engine_job_queue;
/// Postgres event repository.
pub mod postgres_event_store;
/// Postgres execution, step, and wait repository.
pub mod postgres_execution_store;
/// Postgres record collaborator.
pub mod postgres_record_store;
/// Postgres workflow version repository.
pub mod postgres_workflow_store;
/// Redis lifecycle event fanout.
pub mod redis_event_sink;
/// Redis per-execution lease coordination.
pub mod redis_execution_lease;
/// SMTP notification transport.
pub mod smtp_notifier;

pub use console_notifier::ConsoleNotifier;
pub use http_webhook_transport::HttpWebhookTransport;
pub use noop_event_sink::NoopEventSink;
pub use postgres_approval_store::PostgresApprovalStore;
pub use postgres_engine_job_queue::PostgresEngineJobQueue;
pub use postgres_event_store::PostgresEventStore;
pub use postgres_execution_store::PostgresExecutionStore;
pub use postgres_record_store::PostgresRecordStore;
pub use postgres_workflow_store::PostgresWorkflowStore;
pub use redis_event_sink::RedisEventSink;
pub use redis_execution_lease::RedisExecutionLeaseCoordinator;
pub use smtp_notifier::{SmtpNotifier, SmtpNotifierConfig};
