//! Redis-backed per-execution lease coordination.

use async_trait::async_trait;
use redis::{AsyncCommands, Script};
use trellis_application::{ExecutionLease, ExecutionLeaseCoordinator};
use trellis_core::{AppError, AppResult, ExecutionId};

const RELEASE_LEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
else
  return 0
end
"#;

const RENEW_LEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('EXPIRE', KEYS[1], ARGV[2])
else
  return 0
end
"#;

/// Redis implementation of per-execution lease coordination.
///
/// Keys follow `exec:lease:<execution_id>` with a TTL equal to the lease
/// duration, so a crashed holder frees its executions automatically.
#[derive(Clone)]
pub struct RedisExecutionLeaseCoordinator {
    client: redis::Client,
    key_prefix: String,
}

impl RedisExecutionLeaseCoordinator {
    /// Creates one coordinator adapter.
    #[must_use]
    pub fn new(client: redis::Client, key_prefix: impl Into<String>) -> Self {
        Self {
            client,
            key_prefix: key_prefix.into(),
        }
    }

    fn key_for(&self, execution_id: ExecutionId) -> String {
        format!("{}:{execution_id}", self.key_prefix)
    }
}

#[async_trait]
impl ExecutionLeaseCoordinator for RedisExecutionLeaseCoordinator {
    async fn try_acquire(
        &self,
        execution_id: ExecutionId,
        holder_id: &str,
        lease_seconds: u32,
    ) -> AppResult<Option<ExecutionLease>> {
        if holder_id.trim().is_empty() {
            return Err(AppError::Validation(
                "execution lease holder_id must not be empty".to_owned(),
            ));
        }

        if lease_seconds == 0 {
            return Err(AppError::Validation(
                "execution lease_seconds must be greater than zero".to_owned(),
            ));
        }

        let key = self.key_for(execution_id);
        let token = format!("{holder_id}:{}", uuid::Uuid::new_v4());

        let mut connection = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|error| AppError::Transient(format!("failed to connect to redis: {error}")))?;

        let acquired: bool = connection
            .set_nx(key.as_str(), token.as_str())
            .await
            .map_err(|error| {
                AppError::Transient(format!("failed to acquire execution lease: {error}"))
            })?;

        if !acquired {
            return Ok(None);
        }

        connection
            .expire::<_, ()>(key.as_str(), i64::from(lease_seconds))
            .await
            .map_err(|error| {
                AppError::Transient(format!("failed to set execution lease ttl: {error}"))
            })?;

        Ok(Some(ExecutionLease {
            execution_id,
            token,
            holder_id: holder_id.to_owned(),
        }))
    }

    async fn release(&self, lease: &ExecutionLease) -> AppResult<()> {
        let key = self.key_for(lease.execution_id);
        let script = Script::new(RELEASE_LEASE_SCRIPT);

        let mut connection = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|error| AppError::Transient(format!("failed to connect to redis: {error}")))?;

        script
            .key(key)
            .arg(lease.token.as_str())
            .invoke_async::<i32>(&mut connection)
            .await
            .map_err(|error| {
                AppError::Transient(format!("failed to release execution lease: {error}"))
            })?;

        Ok(())
    }

    async fn renew(&self, lease: &ExecutionLease, lease_seconds: u32) -> AppResult<bool> {
        if lease_seconds == 0 {
            return Err(AppError::Validation(
                "execution lease_seconds must be greater than zero".to_owned(),
            ));
        }

        let key = self.key_for(lease.execution_id);
        let script = Script::new(RENEW_LEASE_SCRIPT);

        let mut connection = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|error| AppError::Transient(format!("failed to connect to redis: {error}")))?;

        let renewed = script
            .key(key)
            .arg(lease.token.as_str())
            .arg(i64::from(lease_seconds))
            .invoke_async::<i32>(&mut connection)
            .await
            .map_err(|error| {
                AppError::Transient(format!("failed to renew execution lease: {error}"))
            })?;

        Ok(renewed > 0)
    }
}
