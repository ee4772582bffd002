use async_trait::async_trait;
use trellis_core::{AppResult, ExecutionId};

/// One per-execution lease claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionLease {
    /// Execution the lease grants exclusive mutation rights over.
    pub execution_id: ExecutionId,
    /// Lease token used for safe release.
    pub token: String,
    /// Lease holder identity.
    pub holder_id: String,
}

/// Distributed coordination port granting single-writer executions.
#[async_trait]
pub trait ExecutionLeaseCoordinator: Send + Sync {
    /// Attempts to acquire the lease for one execution.
    async fn try_acquire(
        &self,
        execution_id: ExecutionId,
        holder_id: &str,
        lease_seconds: u32,
    ) -> AppResult<Option<ExecutionLease>>;

    /// Releases one lease using token compare-and-delete semantics.
    async fn release(&self, lease: &ExecutionLease) -> AppResult<()>;

    /// Renews one existing lease and returns false when ownership changed.
    async fn renew(&self, lease: &ExecutionLease, lease_seconds: u32) -> AppResult<bool>;
}
