use std::collections::{HashMap, HashSet};

use trellis_core::{AppError, AppResult};

use crate::action::ExecuteAction;
use crate::condition::{Condition, ConditionOperator};
use crate::definition::{Trigger, WorkflowDefinition};
use crate::step::{Step, StepDecision, StepKind};

/// Statically validates a workflow definition.
///
/// Returns an aggregated `Validation` error listing every violation found:
/// trigger shape, step ids, type-specific payloads, successor references,
/// and cycle freedom of the successor graph.
pub fn validate_definition(definition: &WorkflowDefinition) -> AppResult<()> {
    validate_definition_parts(definition.trigger(), definition.steps())
}

pub(crate) fn validate_definition_parts(trigger: &Trigger, steps: &[Step]) -> AppResult<()> {
    let mut violations = Vec::new();

    validate_trigger(trigger, &mut violations);

    if steps.is_empty() {
        violations.push("definition must declare at least one step".to_owned());
    }

    let mut seen_ids = HashSet::new();
    for step in steps {
        collect_step_ids(step, &mut seen_ids, &mut violations);
    }

    let top_level_ids: HashSet<&str> = steps.iter().map(|step| step.id.as_str()).collect();
    for step in steps {
        validate_step(step, &top_level_ids, false, &mut violations);
    }

    detect_cycles(steps, &mut violations);

    if violations.is_empty() {
        Ok(())
    } else {
        Err(AppError::Validation(violations.join("; ")))
    }
}

fn validate_trigger(trigger: &Trigger, violations: &mut Vec<String>) {
    match trigger {
        Trigger::Event { event, .. } => {
            if event.trim().is_empty() {
                violations.push("event trigger requires a non-empty event name".to_owned());
            }
        }
        Trigger::Schedule { cron, .. } => {
            if cron.trim().is_empty() {
                violations.push("schedule trigger requires a non-empty cron expression".to_owned());
            }
        }
        Trigger::Manual => {}
    }
}

fn collect_step_ids<'a>(
    step: &'a Step,
    seen: &mut HashSet<&'a str>,
    violations: &mut Vec<String>,
) {
    if step.id.trim().is_empty() {
        violations.push("every step requires a non-empty id".to_owned());
    } else if !seen.insert(step.id.as_str()) {
        violations.push(format!("duplicate step id '{}'", step.id));
    }

    if let StepKind::Parallel { branches, .. } = &step.kind {
        for branch in branches {
            collect_step_ids(branch, seen, violations);
        }
    }
}

fn validate_step(
    step: &Step,
    top_level_ids: &HashSet<&str>,
    inside_parallel: bool,
    violations: &mut Vec<String>,
) {
    let step_id = step.id.as_str();

    for successor in step.successors() {
        if inside_parallel {
            violations.push(format!(
                "parallel branch step '{step_id}' must not declare successors"
            ));
            break;
        }

        if !top_level_ids.contains(successor) {
            violations.push(format!(
                "step '{step_id}' references unknown successor '{successor}'"
            ));
        }
    }

    if !matches!(step.kind, StepKind::Condition { .. })
        && (step.on_true.is_some() || step.on_false.is_some())
    {
        violations.push(format!(
            "step '{step_id}' declares on_true/on_false but is not a condition step"
        ));
    }

    if let Some(retry) = &step.retry
        && retry.max_attempts == 0
    {
        violations.push(format!(
            "step '{step_id}' retry max_attempts must be greater than zero"
        ));
    }

    match &step.kind {
        StepKind::Condition { condition } => {
            validate_condition(condition, step_id, violations);
        }
        StepKind::Action { action } => {
            validate_decision(action, step_id, inside_parallel, violations);
        }
        StepKind::Execute { actions } => {
            validate_execute_actions(actions, step_id, inside_parallel, violations);
        }
        StepKind::Parallel { branches, .. } => {
            if branches.is_empty() {
                violations.push(format!(
                    "parallel step '{step_id}' requires at least one branch"
                ));
            }

            for branch in branches {
                validate_step(branch, top_level_ids, true, violations);
            }
        }
        StepKind::Wait { event, .. } => {
            if event.trim().is_empty() {
                violations.push(format!(
                    "wait step '{step_id}' requires a non-empty event name"
                ));
            }

            if inside_parallel {
                violations.push(format!(
                    "wait step '{step_id}' is not allowed inside a parallel step"
                ));
            }
        }
    }
}

fn validate_condition(condition: &Condition, step_id: &str, violations: &mut Vec<String>) {
    match condition {
        Condition::All { and } => {
            for child in and {
                validate_condition(child, step_id, violations);
            }
        }
        Condition::Any { or } => {
            for child in or {
                validate_condition(child, step_id, violations);
            }
        }
        Condition::Not { not } => validate_condition(not, step_id, violations),
        Condition::Leaf {
            field,
            operator,
            value,
        } => {
            if field.trim().is_empty() {
                violations.push(format!(
                    "condition leaf in step '{step_id}' requires a non-empty field path"
                ));
            }

            let Some(value) = value else {
                violations.push(format!(
                    "condition leaf '{field}' in step '{step_id}' requires a comparison value"
                ));
                return;
            };

            match operator {
                ConditionOperator::In => {
                    if !value.is_array() {
                        violations.push(format!(
                            "condition leaf '{field}' in step '{step_id}' requires an array value for 'in'"
                        ));
                    }
                }
                ConditionOperator::Regex => match value.as_str() {
                    Some(pattern) => {
                        if regex::Regex::new(pattern).is_err() {
                            violations.push(format!(
                                "condition leaf '{field}' in step '{step_id}' has an uncompilable regex"
                            ));
                        }
                    }
                    None => violations.push(format!(
                        "condition leaf '{field}' in step '{step_id}' requires a string pattern for 'regex'"
                    )),
                },
                _ => {}
            }
        }
    }
}

fn validate_decision(
    decision: &StepDecision,
    step_id: &str,
    inside_parallel: bool,
    violations: &mut Vec<String>,
) {
    match decision {
        StepDecision::Allow | StepDecision::Block { .. } => {}
        StepDecision::RequireApproval {
            approver_role,
            reason,
            ..
        } => {
            if approver_role.trim().is_empty() {
                violations.push(format!(
                    "require_approval step '{step_id}' requires a non-empty approver_role"
                ));
            }

            if reason.trim().is_empty() {
                violations.push(format!(
                    "require_approval step '{step_id}' requires a non-empty reason"
                ));
            }

            if inside_parallel {
                violations.push(format!(
                    "require_approval step '{step_id}' is not allowed inside a parallel step"
                ));
            }
        }
        StepDecision::Wait { event } => {
            if event.trim().is_empty() {
                violations.push(format!(
                    "wait decision in step '{step_id}' requires a non-empty event name"
                ));
            }

            if inside_parallel {
                violations.push(format!(
                    "wait decision in step '{step_id}' is not allowed inside a parallel step"
                ));
            }
        }
    }
}

fn validate_execute_actions(
    actions: &[ExecuteAction],
    step_id: &str,
    inside_parallel: bool,
    violations: &mut Vec<String>,
) {
    if actions.is_empty() {
        violations.push(format!(
            "execute step '{step_id}' requires at least one action"
        ));
    }

    let mut approval_requests = 0_usize;
    for (index, action) in actions.iter().enumerate() {
        match action {
            ExecuteAction::Notify {
                recipients,
                message,
            } => {
                if recipients.is_empty()
                    || recipients.iter().any(|address| address.trim().is_empty())
                {
                    violations.push(format!(
                        "notify action {index} in step '{step_id}' requires non-empty recipients"
                    ));
                }

                if message.trim().is_empty() {
                    violations.push(format!(
                        "notify action {index} in step '{step_id}' requires a non-empty message"
                    ));
                }
            }
            ExecuteAction::Webhook { url, .. } | ExecuteAction::HttpRequest { url, .. } => {
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    violations.push(format!(
                        "{} action {index} in step '{step_id}' requires an http(s) url",
                        action.action_type()
                    ));
                }
            }
            ExecuteAction::CreateRecord { entity, data } => {
                if entity.trim().is_empty() {
                    violations.push(format!(
                        "create_record action {index} in step '{step_id}' requires an entity"
                    ));
                }

                if !data.is_object() {
                    violations.push(format!(
                        "create_record action {index} in step '{step_id}' requires an object payload"
                    ));
                }
            }
            ExecuteAction::UpdateRecord {
                entity,
                entity_id,
                data,
            } => {
                if entity.trim().is_empty() || entity_id.trim().is_empty() {
                    violations.push(format!(
                        "update_record action {index} in step '{step_id}' requires entity and entity_id"
                    ));
                }

                if !data.is_object() {
                    violations.push(format!(
                        "update_record action {index} in step '{step_id}' requires an object payload"
                    ));
                }
            }
            ExecuteAction::DeleteRecord { entity, entity_id } => {
                if entity.trim().is_empty() || entity_id.trim().is_empty() {
                    violations.push(format!(
                        "delete_record action {index} in step '{step_id}' requires entity and entity_id"
                    ));
                }
            }
            ExecuteAction::CreateApprovalRequest {
                approver_role,
                reason,
                ..
            } => {
                approval_requests += 1;

                if approver_role.trim().is_empty() || reason.trim().is_empty() {
                    violations.push(format!(
                        "create_approval_request action {index} in step '{step_id}' requires approver_role and reason"
                    ));
                }

                if inside_parallel {
                    violations.push(format!(
                        "create_approval_request action {index} in step '{step_id}' is not allowed inside a parallel step"
                    ));
                }
            }
            ExecuteAction::Log { message } => {
                if message.trim().is_empty() {
                    violations.push(format!(
                        "log action {index} in step '{step_id}' requires a non-empty message"
                    ));
                }
            }
        }
    }

    if approval_requests > 1 {
        violations.push(format!(
            "execute step '{step_id}' may contain at most one create_approval_request action"
        ));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VisitColor {
    White,
    Gray,
    Black,
}

/// Depth-first cycle detection with gray/black marking over the successor
/// graph. Every node is used as a root so cycles unreachable from the entry
/// step are also rejected.
fn detect_cycles(steps: &[Step], violations: &mut Vec<String>) {
    let graph: HashMap<&str, Vec<&str>> = steps
        .iter()
        .map(|step| (step.id.as_str(), step.successors().collect()))
        .collect();

    let mut colors: HashMap<&str, VisitColor> = graph
        .keys()
        .map(|step_id| (*step_id, VisitColor::White))
        .collect();

    for step in steps {
        if colors.get(step.id.as_str()) == Some(&VisitColor::White)
            && visit(step.id.as_str(), &graph, &mut colors)
        {
            violations.push(format!(
                "successor graph contains a cycle reachable from step '{}'",
                step.id
            ));
            return;
        }
    }
}

fn visit<'a>(
    step_id: &'a str,
    graph: &HashMap<&'a str, Vec<&'a str>>,
    colors: &mut HashMap<&'a str, VisitColor>,
) -> bool {
    colors.insert(step_id, VisitColor::Gray);

    for &successor in graph.get(step_id).into_iter().flatten() {
        match colors.get(successor) {
            Some(VisitColor::Gray) => return true,
            Some(VisitColor::White) => {
                if visit(successor, graph, colors) {
                    return true;
                }
            }
            _ => {}
        }
    }

    colors.insert(step_id, VisitColor::Black);
    false
}
