use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{info, warn};
use trellis_core::{AppError, AppResult, ApprovalId};

use crate::engine_ports::{
    ApprovalListQuery, ApprovalRecord, ApprovalStatus, ApprovalStore, CreateApprovalInput,
    EngineJobQueue, LifecycleEvent, LifecycleEventSink, Notifier, ResumeTrigger,
};

/// Decision taken on one pending approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    /// Approve the request.
    Approve,
    /// Reject the request.
    Reject,
}

impl ApprovalDecision {
    fn target_status(self) -> ApprovalStatus {
        match self {
            Self::Approve => ApprovalStatus::Approved,
            Self::Reject => ApprovalStatus::Rejected,
        }
    }
}

/// Approval request lifecycle: create, decide, expire, list.
///
/// Every transition out of `pending` is a compare-and-set on the approval
/// row, so concurrent deciders serialize and exactly one wins.
#[derive(Clone)]
pub struct ApprovalService {
    store: Arc<dyn ApprovalStore>,
    job_queue: Arc<dyn EngineJobQueue>,
    notifier: Arc<dyn Notifier>,
    event_sink: Arc<dyn LifecycleEventSink>,
    approver_addresses: HashMap<String, String>,
}

impl ApprovalService {
    /// Creates an approval service.
    #[must_use]
    pub fn new(
        store: Arc<dyn ApprovalStore>,
        job_queue: Arc<dyn EngineJobQueue>,
        notifier: Arc<dyn Notifier>,
        event_sink: Arc<dyn LifecycleEventSink>,
    ) -> Self {
        Self {
            store,
            job_queue,
            notifier,
            event_sink,
            approver_addresses: HashMap::new(),
        }
    }

    /// Adds configured role-to-address notification routing.
    #[must_use]
    pub fn with_approver_addresses(mut self, addresses: HashMap<String, String>) -> Self {
        self.approver_addresses = addresses;
        self
    }

    /// Creates one pending approval and notifies the approver role.
    pub async fn create(&self, input: CreateApprovalInput) -> AppResult<ApprovalRecord> {
        let expires_at = input
            .ttl_seconds
            .map(|ttl| {
                i64::try_from(ttl)
                    .map(|seconds| Utc::now() + Duration::seconds(seconds))
                    .map_err(|error| {
                        AppError::Validation(format!("invalid approval ttl_seconds: {error}"))
                    })
            })
            .transpose()?;

        let approval = self.store.insert(input, expires_at).await?;

        let address = self
            .approver_addresses
            .get(approval.approver_role.as_str())
            .cloned()
            .unwrap_or_else(|| approval.approver_role.clone());
        let message = format!(
            "approval requested: {} (execution {}, step '{}')",
            approval.reason, approval.execution_id, approval.step_id
        );

        if let Err(error) = self.notifier.notify(&[address], message.as_str()).await {
            warn!(
                approval_id = %approval.id,
                approver_role = %approval.approver_role,
                error = %error,
                "failed to notify approver role for new approval"
            );
        }

        if let Err(error) = self
            .event_sink
            .publish(LifecycleEvent::ApprovalRequested {
                approval_id: approval.id,
                execution_id: approval.execution_id,
            })
            .await
        {
            warn!(approval_id = %approval.id, error = %error, "failed to publish approval event");
        }

        Ok(approval)
    }

    /// Applies one decision to a pending approval.
    ///
    /// Deciding an already-decided approval is a conflict. On success a
    /// resume job is enqueued for the paired execution.
    pub async fn decide(
        &self,
        approval_id: ApprovalId,
        decision: ApprovalDecision,
        comment: Option<&str>,
        approver_id: &str,
    ) -> AppResult<ApprovalRecord> {
        let approval = self
            .store
            .transition(approval_id, decision.target_status(), Some(approver_id), comment)
            .await?;

        info!(
            approval_id = %approval.id,
            execution_id = %approval.execution_id,
            status = approval.status.as_str(),
            approver_id,
            "approval decided"
        );

        self.enqueue_resume(&approval).await?;
        Ok(approval)
    }

    /// Expires one pending approval whose deadline has passed.
    pub async fn expire(&self, approval_id: ApprovalId) -> AppResult<ApprovalRecord> {
        let approval = self.store.find(approval_id).await?.ok_or_else(|| {
            AppError::NotFound(format!("approval '{approval_id}' does not exist"))
        })?;

        let now = Utc::now();
        let due = approval.expires_at.is_some_and(|deadline| deadline <= now);
        if !due {
            return Err(AppError::Conflict(format!(
                "approval '{approval_id}' is not past its expiration deadline"
            )));
        }

        let approval = self
            .store
            .transition(approval_id, ApprovalStatus::Expired, None, None)
            .await?;

        info!(
            approval_id = %approval.id,
            execution_id = %approval.execution_id,
            "approval expired"
        );

        self.enqueue_resume(&approval).await?;
        Ok(approval)
    }

    /// Expires every pending approval past its deadline.
    ///
    /// Individual failures log and do not stop the sweep. Returns the
    /// number of approvals expired.
    pub async fn expire_due(&self) -> AppResult<usize> {
        let due = self.store.list_expirable(Utc::now()).await?;
        let mut expired = 0_usize;

        for approval in due {
            match self.expire(approval.id).await {
                Ok(_) => expired += 1,
                // A concurrent decision winning the CAS is expected here.
                Err(AppError::Conflict(_)) => {}
                Err(error) => {
                    warn!(
                        approval_id = %approval.id,
                        error = %error,
                        "failed to expire overdue approval"
                    );
                }
            }
        }

        Ok(expired)
    }

    /// Returns one approval by id.
    pub async fn find(&self, approval_id: ApprovalId) -> AppResult<ApprovalRecord> {
        self.store.find(approval_id).await?.ok_or_else(|| {
            AppError::NotFound(format!("approval '{approval_id}' does not exist"))
        })
    }

    /// Lists approvals filtered by status and approver role.
    pub async fn list(&self, query: ApprovalListQuery) -> AppResult<Vec<ApprovalRecord>> {
        self.store.list(query).await
    }

    async fn enqueue_resume(&self, approval: &ApprovalRecord) -> AppResult<()> {
        self.job_queue
            .enqueue_resume(
                approval.execution_id,
                &ResumeTrigger::Approval {
                    approval_id: approval.id,
                },
            )
            .await
    }
}
