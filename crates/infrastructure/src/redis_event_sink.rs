//! Redis pub/sub fanout for lifecycle events.

use async_trait::async_trait;
use redis::AsyncCommands;
use trellis_application::{LifecycleEvent, LifecycleEventSink};
use trellis_core::{AppError, AppResult};

/// Publishes lifecycle events on a Redis channel for WebSocket fanout and
/// other subscribers.
#[derive(Clone)]
pub struct RedisEventSink {
    client: redis::Client,
    channel: String,
}

impl RedisEventSink {
    /// Creates one sink publishing on the given channel.
    #[must_use]
    pub fn new(client: redis::Client, channel: impl Into<String>) -> Self {
        Self {
            client,
            channel: channel.into(),
        }
    }
}

#[async_trait]
impl LifecycleEventSink for RedisEventSink {
    async fn publish(&self, event: LifecycleEvent) -> AppResult<()> {
        let payload = serde_json::to_string(&event).map_err(|error| {
            AppError::Internal(format!("failed to serialize lifecycle event: {error}"))
        })?;

        let mut connection = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|error| AppError::Transient(format!("failed to connect to redis: {error}")))?;

        connection
            .publish::<_, _, ()>(self.channel.as_str(), payload)
            .await
            .map_err(|error| {
                AppError::Transient(format!("failed to publish lifecycle event: {error}"))
            })?;

        Ok(())
    }
}
