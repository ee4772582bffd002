use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// HTTP method allowed for webhook and http_request actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HttpMethod {
    /// HTTP GET.
    GET,
    /// HTTP POST (default).
    POST,
    /// HTTP PUT.
    PUT,
    /// HTTP DELETE.
    DELETE,
    /// HTTP PATCH.
    PATCH,
}

impl HttpMethod {
    /// Returns the wire-format method name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GET => "GET",
            Self::POST => "POST",
            Self::PUT => "PUT",
            Self::DELETE => "DELETE",
            Self::PATCH => "PATCH",
        }
    }
}

/// One side-effect action inside an `execute` step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecuteAction {
    /// Delivers a message to one or more recipients through the notifier.
    Notify {
        /// Recipient addresses.
        recipients: Vec<String>,
        /// Message body; supports `${path}` interpolation.
        message: String,
    },
    /// Delivers an outbound webhook request.
    Webhook {
        /// Target URL.
        url: String,
        /// HTTP method; POST when omitted.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        method: Option<HttpMethod>,
        /// Extra request headers.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        headers: Option<Map<String, Value>>,
        /// JSON request body.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<Value>,
        /// Per-action timeout override in seconds.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_seconds: Option<u64>,
    },
    /// Sends a generic outbound HTTP request; same payload as `webhook`.
    HttpRequest {
        /// Target URL.
        url: String,
        /// HTTP method; POST when omitted.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        method: Option<HttpMethod>,
        /// Extra request headers.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        headers: Option<Map<String, Value>>,
        /// JSON request body.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<Value>,
        /// Per-action timeout override in seconds.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_seconds: Option<u64>,
    },
    /// Creates a record through the record collaborator.
    CreateRecord {
        /// Target entity name.
        entity: String,
        /// Record payload; idempotency key supplied by the caller in `data`.
        data: Value,
    },
    /// Updates a record through the record collaborator.
    UpdateRecord {
        /// Target entity name.
        entity: String,
        /// Identifier of the record to update.
        entity_id: String,
        /// Field changes.
        data: Value,
    },
    /// Deletes a record through the record collaborator.
    DeleteRecord {
        /// Target entity name.
        entity: String,
        /// Identifier of the record to delete.
        entity_id: String,
    },
    /// Opens an approval request and pauses the execution after the step.
    CreateApprovalRequest {
        /// Role whose members may decide the request.
        approver_role: String,
        /// Human-readable justification.
        reason: String,
        /// Optional time-to-live before automatic expiration.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ttl_seconds: Option<u64>,
    },
    /// Writes a structured log line; never fails.
    Log {
        /// Message text; supports `${path}` interpolation.
        message: String,
    },
}

/// Default per-action deadline.
pub const DEFAULT_ACTION_TIMEOUT_SECONDS: u64 = 30;

impl ExecuteAction {
    /// Returns stable action type value.
    #[must_use]
    pub fn action_type(&self) -> &'static str {
        match self {
            Self::Notify { .. } => "notify",
            Self::Webhook { .. } => "webhook",
            Self::HttpRequest { .. } => "http_request",
            Self::CreateRecord { .. } => "create_record",
            Self::UpdateRecord { .. } => "update_record",
            Self::DeleteRecord { .. } => "delete_record",
            Self::CreateApprovalRequest { .. } => "create_approval_request",
            Self::Log { .. } => "log",
        }
    }

    /// Returns the action deadline in seconds.
    #[must_use]
    pub fn timeout_seconds(&self) -> u64 {
        match self {
            Self::Webhook {
                timeout_seconds, ..
            }
            | Self::HttpRequest {
                timeout_seconds, ..
            } => timeout_seconds.unwrap_or(DEFAULT_ACTION_TIMEOUT_SECONDS),
            _ => DEFAULT_ACTION_TIMEOUT_SECONDS,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::ExecuteAction;

    #[test]
    fn actions_deserialize_from_tagged_form() {
        let action: ExecuteAction = serde_json::from_value(json!({
            "type": "webhook",
            "url": "https://hooks.example.com/orders",
            "method": "PUT",
            "body": {"order_id": "${trigger.order.id}"},
        }))
        .unwrap();

        assert_eq!(action.action_type(), "webhook");
        assert_eq!(action.timeout_seconds(), 30);
    }

    #[test]
    fn webhook_timeout_override_applies() {
        let action: ExecuteAction = serde_json::from_value(json!({
            "type": "http_request",
            "url": "https://api.example.com",
            "timeout_seconds": 5,
        }))
        .unwrap();

        assert_eq!(action.timeout_seconds(), 5);
    }
}
