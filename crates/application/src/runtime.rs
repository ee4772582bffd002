use std::sync::Arc;

use tokio::sync::Semaphore;

/// Default bound on concurrently running parallel-step branches.
pub const DEFAULT_PARALLEL_BRANCH_LIMIT: usize = 16;

/// Default per-execution lease duration.
pub const DEFAULT_EXECUTION_LEASE_SECONDS: u32 = 30;

/// Process-wide engine state shared by every component.
///
/// Holds the parallel-branch semaphore, the worker identity, and the lease
/// clock so no component reaches for hidden singletons.
#[derive(Debug)]
pub struct EngineRuntime {
    worker_id: String,
    parallel_permits: Arc<Semaphore>,
    lease_seconds: u32,
}

impl EngineRuntime {
    /// Creates the runtime for one process.
    #[must_use]
    pub fn new(worker_id: impl Into<String>, parallel_branch_limit: usize) -> Self {
        Self {
            worker_id: worker_id.into(),
            parallel_permits: Arc::new(Semaphore::new(parallel_branch_limit.max(1))),
            lease_seconds: DEFAULT_EXECUTION_LEASE_SECONDS,
        }
    }

    /// Overrides the per-execution lease duration.
    #[must_use]
    pub fn with_lease_seconds(mut self, lease_seconds: u32) -> Self {
        self.lease_seconds = lease_seconds.max(1);
        self
    }

    /// Returns this process's worker identity.
    #[must_use]
    pub fn worker_id(&self) -> &str {
        self.worker_id.as_str()
    }

    /// Returns the process-wide parallel-branch semaphore.
    #[must_use]
    pub fn parallel_permits(&self) -> Arc<Semaphore> {
        Arc::clone(&self.parallel_permits)
    }

    /// Returns the per-execution lease duration in seconds.
    #[must_use]
    pub fn lease_seconds(&self) -> u32 {
        self.lease_seconds
    }
}

impl Default for EngineRuntime {
    fn default() -> Self {
        Self::new(
            format!("worker-{}", std::process::id()),
            DEFAULT_PARALLEL_BRANCH_LIMIT,
        )
    }
}
