use std::time::Duration;

use serde_json::{Map, json};
use tracing::{info, warn};
use trellis_domain::{ExecuteAction, HttpMethod, interpolate};

use super::*;
use crate::engine_ports::{ApprovalRecord, CreateApprovalInput, WebhookRequest};

impl ExecutionService {
    /// Runs the actions of one execute step sequentially.
    ///
    /// Outputs are collected into a map keyed by action index. When one of
    /// the actions opened an approval request, the step must suspend after
    /// the remaining actions complete; the created approval is returned.
    pub(super) async fn run_execute_actions(
        &self,
        execution: &ExecutionRecord,
        step: &Step,
        actions: &[ExecuteAction],
    ) -> AppResult<(Value, Option<ApprovalRecord>)> {
        let mut outputs = Map::new();
        let mut approval = None;

        for (index, action) in actions.iter().enumerate() {
            let deadline = Duration::from_secs(action.timeout_seconds());
            let dispatched = tokio::time::timeout(
                deadline,
                self.dispatch_action(execution, step, index, action),
            )
            .await
            .map_err(|_| {
                AppError::Timeout(format!(
                    "action {index} ({}) in step '{}' exceeded its {}s deadline",
                    action.action_type(),
                    step.id,
                    deadline.as_secs()
                ))
            })?;

            let output = match dispatched? {
                ActionOutput::Value(output) => output,
                ActionOutput::ApprovalOpened(record) => {
                    let output = json!({ "approval_id": record.id });
                    approval = Some(record);
                    output
                }
            };

            outputs.insert(index.to_string(), output);
        }

        Ok((Value::Object(outputs), approval))
    }

    async fn dispatch_action(
        &self,
        execution: &ExecutionRecord,
        step: &Step,
        index: usize,
        action: &ExecuteAction,
    ) -> AppResult<ActionOutput> {
        match action {
            ExecuteAction::Notify {
                recipients,
                message,
            } => {
                let recipients: Vec<String> = recipients
                    .iter()
                    .map(|recipient| self.render(recipient, execution))
                    .collect();
                let message = self.render(message, execution);

                self.notifier
                    .notify(recipients.as_slice(), message.as_str())
                    .await?;
                Ok(ActionOutput::Value(
                    json!({ "delivered_to": recipients.len() }),
                ))
            }
            ExecuteAction::Webhook {
                url,
                method,
                headers,
                body,
                ..
            }
            | ExecuteAction::HttpRequest {
                url,
                method,
                headers,
                body,
                ..
            } => {
                let request = WebhookRequest {
                    url: self.render(url, execution),
                    method: method.unwrap_or(HttpMethod::POST),
                    headers: headers
                        .as_ref()
                        .map(|headers| self.render_object(headers, execution))
                        .unwrap_or_default(),
                    body: body.as_ref().map(|body| self.render_value(body, execution)),
                    idempotency_key: format!("{}:{}:{index}", execution.id, step.id),
                    timeout_seconds: action.timeout_seconds(),
                };

                let response = self.webhook_transport.dispatch(request).await?;
                Ok(ActionOutput::Value(json!({
                    "status": response.status,
                    "body": response.body,
                })))
            }
            ExecuteAction::CreateRecord { entity, data } => {
                let record = self
                    .record_store
                    .create_record(entity.as_str(), self.render_value(data, execution))
                    .await?;
                Ok(ActionOutput::Value(record))
            }
            ExecuteAction::UpdateRecord {
                entity,
                entity_id,
                data,
            } => {
                let entity_id = self.render(entity_id, execution);
                let record = self
                    .record_store
                    .update_record(
                        entity.as_str(),
                        entity_id.as_str(),
                        self.render_value(data, execution),
                    )
                    .await?;
                Ok(ActionOutput::Value(record))
            }
            ExecuteAction::DeleteRecord { entity, entity_id } => {
                let entity_id = self.render(entity_id, execution);
                self.record_store
                    .delete_record(entity.as_str(), entity_id.as_str())
                    .await?;
                Ok(ActionOutput::Value(json!({ "deleted": entity_id })))
            }
            ExecuteAction::CreateApprovalRequest {
                approver_role,
                reason,
                ttl_seconds,
            } => {
                // Never retried: failures fail the step immediately.
                let approval = self
                    .approval_service
                    .create(CreateApprovalInput {
                        execution_id: execution.id,
                        step_id: step.id.clone(),
                        approver_role: approver_role.clone(),
                        reason: self.render(reason, execution),
                        ttl_seconds: *ttl_seconds,
                        entity_type: None,
                        entity_id: None,
                        requester_id: None,
                    })
                    .await
                    .map_err(|error| {
                        AppError::Permanent(format!("approval creation failed: {error}"))
                    })?;

                Ok(ActionOutput::ApprovalOpened(approval))
            }
            ExecuteAction::Log { message } => {
                let message = self.render(message, execution);
                info!(
                    execution_id = %execution.id,
                    step_id = %step.id,
                    "{message}"
                );
                Ok(ActionOutput::Value(json!({ "logged": true })))
            }
        }
    }

    /// Renders `${path}` placeholders against the execution context.
    fn render(&self, template: &str, execution: &ExecutionRecord) -> String {
        let rendered = interpolate(template, &execution.context);
        for path in &rendered.unresolved {
            warn!(
                execution_id = %execution.id,
                path = %path,
                "unresolved context path in action payload"
            );
        }

        rendered.rendered
    }

    /// Renders every string inside a JSON value.
    fn render_value(&self, value: &Value, execution: &ExecutionRecord) -> Value {
        match value {
            Value::String(template) => Value::String(self.render(template, execution)),
            Value::Array(entries) => Value::Array(
                entries
                    .iter()
                    .map(|entry| self.render_value(entry, execution))
                    .collect(),
            ),
            Value::Object(fields) => Value::Object(self.render_object(fields, execution)),
            other => other.clone(),
        }
    }

    fn render_object(
        &self,
        fields: &Map<String, Value>,
        execution: &ExecutionRecord,
    ) -> Map<String, Value> {
        fields
            .iter()
            .map(|(key, value)| (key.clone(), self.render_value(value, execution)))
            .collect()
    }
}

enum ActionOutput {
    Value(Value),
    ApprovalOpened(ApprovalRecord),
}
