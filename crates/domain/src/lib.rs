//! Pure workflow model: definitions, conditions, payload paths, validation.

#![forbid(unsafe_code)]

/// Side-effect actions carried by `execute` steps.
pub mod action;
/// Boolean condition trees and their evaluator.
pub mod condition;
/// Workflow definitions and triggers.
pub mod definition;
/// Dotted-path resolution and string interpolation over JSON payloads.
pub mod path;
/// Step graph nodes, retry policies, parallel strategies.
pub mod step;
/// Static definition validation.
pub mod validator;

pub use action::{ExecuteAction, HttpMethod};
pub use condition::{Condition, ConditionOperator};
pub use definition::{Trigger, WorkflowDefinition};
pub use path::{Interpolated, interpolate, resolve};
pub use step::{Backoff, ParallelStrategy, RetryKind, RetryPolicy, Step, StepDecision, StepKind};
pub use validator::validate_definition;
