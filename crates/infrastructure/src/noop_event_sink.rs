//! No-op lifecycle sink for deployments without Redis fanout.

use async_trait::async_trait;
use trellis_application::{LifecycleEvent, LifecycleEventSink};
use trellis_core::AppResult;

/// Discards lifecycle events.
#[derive(Clone)]
pub struct NoopEventSink;

impl NoopEventSink {
    /// Creates a new no-op sink.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Default for NoopEventSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LifecycleEventSink for NoopEventSink {
    async fn publish(&self, _event: LifecycleEvent) -> AppResult<()> {
        Ok(())
    }
}
