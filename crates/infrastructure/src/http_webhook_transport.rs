use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use trellis_application::{WebhookRequest, WebhookResponse, WebhookTransport};
use trellis_core::{AppError, AppResult};

/// Reqwest-based transport for webhook and http_request actions.
///
/// Failure classification feeds the step retry policy: timeouts map to
/// `Timeout`, 5xx and 429 responses and transport errors map to
/// `Transient`, and every other non-success status maps to `Permanent`.
pub struct HttpWebhookTransport {
    http_client: reqwest::Client,
}

impl HttpWebhookTransport {
    /// Creates a transport around the provided HTTP client.
    #[must_use]
    pub fn new(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }
}

#[async_trait]
impl WebhookTransport for HttpWebhookTransport {
    async fn dispatch(&self, request: WebhookRequest) -> AppResult<WebhookResponse> {
        let method =
            reqwest::Method::from_bytes(request.method.as_str().as_bytes()).map_err(|error| {
                AppError::Validation(format!(
                    "invalid HTTP method '{}': {error}",
                    request.method.as_str()
                ))
            })?;

        let mut builder = self
            .http_client
            .request(method, request.url.as_str())
            .timeout(Duration::from_secs(request.timeout_seconds))
            .header("Idempotency-Key", request.idempotency_key.as_str());

        for (key, value) in &request.headers {
            if let Some(header_value) = value.as_str() {
                builder = builder.header(key, header_value);
            }
        }

        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|error| {
            if error.is_timeout() {
                AppError::Timeout(format!(
                    "webhook request to '{}' timed out after {}s",
                    request.url, request.timeout_seconds
                ))
            } else {
                AppError::Transient(format!(
                    "webhook request to '{}' failed in transport: {error}",
                    request.url
                ))
            }
        })?;

        let status = response.status();
        let body_text = response
            .text()
            .await
            .unwrap_or_else(|_| "<response body unavailable>".to_owned());
        let body: Value =
            serde_json::from_str(body_text.as_str()).unwrap_or(Value::String(body_text));

        if status.is_success() {
            return Ok(WebhookResponse {
                status: status.as_u16(),
                body,
            });
        }

        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(AppError::Transient(format!(
                "webhook request to '{}' returned status {status}",
                request.url
            )));
        }

        Err(AppError::Permanent(format!(
            "webhook request to '{}' returned status {status}: {body}",
            request.url
        )))
    }
}
