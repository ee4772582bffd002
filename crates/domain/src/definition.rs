use serde::{Deserialize, Serialize};
use trellis_core::AppResult;

use crate::condition::Condition;
use crate::step::Step;
use crate::validator::validate_definition_parts;

/// Workflow trigger source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    /// Fires when an event of the given type is ingested.
    Event {
        /// Event type matched exactly against ingested events.
        event: String,
        /// Optional narrowing condition over the event payload.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filter: Option<Condition>,
    },
    /// Fires on schedule ticks, routed as event equivalents.
    Schedule {
        /// Cron expression identifying the schedule.
        cron: String,
        /// Optional narrowing condition over the tick payload.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filter: Option<Condition>,
    },
    /// Manually invoked trigger.
    Manual,
}

impl Trigger {
    /// Returns stable trigger type value.
    #[must_use]
    pub fn trigger_type(&self) -> &'static str {
        match self {
            Self::Event { .. } => "event",
            Self::Schedule { .. } => "schedule",
            Self::Manual => "manual",
        }
    }

    /// Returns the event name or schedule key this trigger matches on.
    #[must_use]
    pub fn match_key(&self) -> Option<&str> {
        match self {
            Self::Event { event, .. } => Some(event.as_str()),
            Self::Schedule { cron, .. } => Some(cron.as_str()),
            Self::Manual => None,
        }
    }

    /// Returns the optional narrowing filter condition.
    #[must_use]
    pub fn filter(&self) -> Option<&Condition> {
        match self {
            Self::Event { filter, .. } | Self::Schedule { filter, .. } => filter.as_ref(),
            Self::Manual => None,
        }
    }
}

/// Validated workflow definition: a trigger plus an ordered step graph.
///
/// The first step in the list is the entry point. Definitions are immutable
/// once published; edits create a new version row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    trigger: Trigger,
    steps: Vec<Step>,
}

impl WorkflowDefinition {
    /// Creates a validated workflow definition.
    ///
    /// The error aggregates every structural violation found by the
    /// validator rather than stopping at the first one.
    pub fn new(trigger: Trigger, steps: Vec<Step>) -> AppResult<Self> {
        validate_definition_parts(&trigger, steps.as_slice())?;
        Ok(Self { trigger, steps })
    }

    /// Returns the trigger configuration.
    #[must_use]
    pub fn trigger(&self) -> &Trigger {
        &self.trigger
    }

    /// Returns the ordered step list.
    #[must_use]
    pub fn steps(&self) -> &[Step] {
        self.steps.as_slice()
    }

    /// Returns the entry step.
    #[must_use]
    pub fn entry_step(&self) -> Option<&Step> {
        self.steps.first()
    }

    /// Returns the step with the given id, searching top-level steps only.
    #[must_use]
    pub fn find_step(&self, step_id: &str) -> Option<&Step> {
        self.steps.iter().find(|step| step.id == step_id)
    }
}
