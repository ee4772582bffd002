/// Approval endpoints.
pub mod approvals;
/// Event ingress endpoint.
pub mod events;
/// Execution read and cancel endpoints.
pub mod executions;
/// Health and readiness probes.
pub mod health;
/// Workflow CRUD and test-injection endpoints.
pub mod workflows;
