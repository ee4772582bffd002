use serde::{Deserialize, Serialize};

use crate::action::ExecuteAction;
use crate::condition::Condition;

/// Aggregation rule for a parallel step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParallelStrategy {
    /// Fails the step on the first branch failure.
    AllMustPass,
    /// Succeeds as soon as one branch succeeds; peers are cancelled best-effort.
    AnyCanPass,
    /// Awaits every branch and always aggregates to success.
    BestEffort,
}

impl ParallelStrategy {
    /// Returns stable configuration value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AllMustPass => "all_must_pass",
            Self::AnyCanPass => "any_can_pass",
            Self::BestEffort => "best_effort",
        }
    }
}

/// Scalar decision carried by an `action` step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepDecision {
    /// Terminates the execution with result `allowed`.
    Allow,
    /// Terminates the execution with result `blocked`.
    Block {
        /// Recorded block reason.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// Opens an approval request and pauses the execution.
    RequireApproval {
        /// Role whose members may decide the request.
        approver_role: String,
        /// Human-readable justification.
        reason: String,
        /// Optional time-to-live before automatic expiration.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ttl_seconds: Option<u64>,
    },
    /// Pauses the execution until a named event arrives.
    Wait {
        /// Event name the execution waits for.
        event: String,
    },
}

impl StepDecision {
    /// Returns stable decision type value.
    #[must_use]
    pub fn decision_type(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Block { .. } => "block",
            Self::RequireApproval { .. } => "require_approval",
            Self::Wait { .. } => "wait",
        }
    }
}

/// Retryable failure kind matched by a step retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryKind {
    /// Recoverable I/O or dependency failure.
    Transient,
    /// Action deadline exceeded.
    Timeout,
    /// Upstream HTTP 5xx response.
    Http5xx,
}

/// Backoff schedule between step retry attempts.
///
/// Serialized in its compact string form: `fixed:<ms>` or `exp:<base_ms>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Backoff {
    /// Constant delay between attempts.
    Fixed {
        /// Delay in milliseconds.
        ms: u64,
    },
    /// Exponential delay doubling per attempt, capped at 30 seconds.
    Exp {
        /// First-retry base delay in milliseconds.
        base_ms: u64,
    },
}

/// Upper bound applied to every computed retry delay.
pub const MAX_RETRY_DELAY_MS: u64 = 30_000;

impl Backoff {
    /// Returns the delay before the given attempt, numbered from 1.
    #[must_use]
    pub fn delay_ms(&self, attempt: u16) -> u64 {
        let delay = match self {
            Self::Fixed { ms } => *ms,
            Self::Exp { base_ms } => {
                let exponent = u32::from(attempt.saturating_sub(1));
                base_ms.saturating_mul(2_u64.saturating_pow(exponent))
            }
        };

        delay.min(MAX_RETRY_DELAY_MS)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Exp { base_ms: 500 }
    }
}

impl From<Backoff> for String {
    fn from(value: Backoff) -> Self {
        match value {
            Backoff::Fixed { ms } => format!("fixed:{ms}"),
            Backoff::Exp { base_ms } => format!("exp:{base_ms}"),
        }
    }
}

impl TryFrom<String> for Backoff {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let (kind, amount) = value
            .split_once(':')
            .ok_or_else(|| format!("backoff '{value}' must be 'fixed:<ms>' or 'exp:<base_ms>'"))?;
        let amount = amount
            .parse::<u64>()
            .map_err(|error| format!("invalid backoff milliseconds in '{value}': {error}"))?;

        match kind {
            "fixed" => Ok(Self::Fixed { ms: amount }),
            "exp" => Ok(Self::Exp { base_ms: amount }),
            _ => Err(format!("unknown backoff kind '{kind}'")),
        }
    }
}

/// Per-step retry policy for transient failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one, numbered from 1.
    pub max_attempts: u16,
    /// Delay schedule between attempts.
    #[serde(default)]
    pub backoff: Backoff,
    /// Failure kinds eligible for retry; empty means every retryable kind.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retry_on: Vec<RetryKind>,
}

impl RetryPolicy {
    /// Returns whether another attempt is permitted after the given one.
    ///
    /// `kinds` lists every retry kind the observed failure counts as; an
    /// empty list means the failure is not retryable at all.
    #[must_use]
    pub fn permits_any(&self, kinds: &[RetryKind], completed_attempts: u16) -> bool {
        if kinds.is_empty() || completed_attempts >= self.max_attempts {
            return false;
        }

        self.retry_on.is_empty() || kinds.iter().any(|kind| self.retry_on.contains(kind))
    }
}

/// Type-specific payload of one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepKind {
    /// Conditional branch selecting `on_true` or `on_false`.
    Condition {
        /// Condition evaluated against the execution context.
        condition: Condition,
    },
    /// Scalar decision step.
    Action {
        /// Decision payload.
        action: StepDecision,
    },
    /// Sequential list of side-effect actions.
    Execute {
        /// Actions executed in order; outputs keyed by action index.
        actions: Vec<ExecuteAction>,
    },
    /// Bounded fan-out over inline child steps.
    Parallel {
        /// Child steps executed concurrently.
        branches: Vec<Step>,
        /// Aggregation rule for branch outcomes.
        strategy: ParallelStrategy,
    },
    /// Durable pause until a named event arrives or a timeout fires.
    Wait {
        /// Event name the execution waits for.
        event: String,
        /// Optional timeout before the `on_timeout` successor is taken.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_seconds: Option<u64>,
    },
}

impl StepKind {
    /// Returns stable step type value.
    #[must_use]
    pub fn step_type(&self) -> &'static str {
        match self {
            Self::Condition { .. } => "condition",
            Self::Action { .. } => "action",
            Self::Execute { .. } => "execute",
            Self::Parallel { .. } => "parallel",
            Self::Wait { .. } => "wait",
        }
    }
}

/// One node in a workflow's successor graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Step identifier, unique within the definition.
    pub id: String,
    /// Type-specific payload.
    #[serde(flatten)]
    pub kind: StepKind,
    /// Default successor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    /// Successor taken when a condition evaluates to true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_true: Option<String>,
    /// Successor taken when a condition evaluates to false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_false: Option<String>,
    /// Successor taken when a wait or approval times out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_timeout: Option<String>,
    /// Optional retry policy for transient step failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
}

impl Step {
    /// Returns every successor id declared on this step.
    pub fn successors(&self) -> impl Iterator<Item = &str> {
        [
            self.next.as_deref(),
            self.on_true.as_deref(),
            self.on_false.as_deref(),
            self.on_timeout.as_deref(),
        ]
        .into_iter()
        .flatten()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{Backoff, RetryKind, RetryPolicy, Step};

    #[test]
    fn step_deserializes_with_flattened_kind() {
        let step: Step = serde_json::from_value(json!({
            "id": "gate",
            "type": "condition",
            "condition": {"field": "trigger.total", "operator": "gt", "value": 1000},
            "on_true": "high",
            "on_false": "low",
        }))
        .unwrap();

        assert_eq!(step.kind.step_type(), "condition");
        assert_eq!(step.successors().collect::<Vec<_>>(), vec!["high", "low"]);
    }

    #[test]
    fn exponential_backoff_doubles_and_caps() {
        let backoff = Backoff::Exp { base_ms: 500 };
        assert_eq!(backoff.delay_ms(1), 500);
        assert_eq!(backoff.delay_ms(2), 1_000);
        assert_eq!(backoff.delay_ms(3), 2_000);
        assert_eq!(backoff.delay_ms(10), 30_000);
    }

    #[test]
    fn backoff_parses_compact_string_form() {
        let policy: RetryPolicy = serde_json::from_value(json!({
            "max_attempts": 3,
            "backoff": "fixed:250",
            "retry_on": ["timeout"],
        }))
        .unwrap();

        assert_eq!(policy.backoff, Backoff::Fixed { ms: 250 });
        assert!(policy.permits_any(&[RetryKind::Timeout], 1));
        assert!(!policy.permits_any(&[RetryKind::Transient], 1));
        assert!(!policy.permits_any(&[RetryKind::Timeout], 3));
        assert!(!policy.permits_any(&[], 1));
    }

    #[test]
    fn default_backoff_is_exponential_500ms() {
        let policy: RetryPolicy = serde_json::from_value(json!({"max_attempts": 2})).unwrap();
        assert_eq!(policy.backoff, Backoff::Exp { base_ms: 500 });
        assert!(policy.permits_any(&[RetryKind::Http5xx], 1));
    }
}
