//! Webhook delivery of the final job status.
//!
//! [`WebhookDelivery`] POSTs a JSON [`WebhookPayload`] to the caller's URL
//! once per job. Delivery is a single attempt with a 30 second timeout; the
//! outcome is recorded, never raised as a job failure.

use std::time::Duration;

use relay_core::types::Timestamp;
use serde::Serialize;

/// HTTP request timeout for a delivery attempt.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Error type for webhook delivery failures.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// The underlying HTTP request failed (network, DNS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The remote server returned a non-2xx status code.
    #[error("Webhook returned HTTP {0}")]
    HttpStatus(u16),
}

// ---------------------------------------------------------------------------
// Payload and outcome
// ---------------------------------------------------------------------------

/// Body POSTed to the webhook URL.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookPayload {
    pub job_id: String,
    pub status: String,
    pub timestamp: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    pub duration_ms: u64,
    pub images_count: usize,
    pub loras_count: usize,
}

/// Recorded result of a delivery attempt.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookOutcome {
    pub url: String,
    pub delivered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// WebhookDelivery
// ---------------------------------------------------------------------------

/// Delivers final job status to external webhook endpoints.
///
/// Each delivery is a single attempt bounded by a per-request timeout.
#[derive(Clone)]
pub struct WebhookDelivery {
    client: reqwest::Client,
    timeout: Duration,
}

impl WebhookDelivery {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout: REQUEST_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Deliver `payload` to `url` and record how it went.
    pub async fn deliver(&self, url: &str, payload: &WebhookPayload) -> WebhookOutcome {
        match self.try_send(url, payload).await {
            Ok(status) => {
                tracing::info!(url, job_id = %payload.job_id, status, "Webhook delivered");
                WebhookOutcome {
                    url: url.to_string(),
                    delivered: true,
                    status_code: Some(status),
                    error: None,
                }
            }
            Err(e) => {
                tracing::error!(url, job_id = %payload.job_id, error = %e, "Webhook delivery failed");
                let status_code = match &e {
                    WebhookError::HttpStatus(code) => Some(*code),
                    WebhookError::Request(_) => None,
                };
                WebhookOutcome {
                    url: url.to_string(),
                    delivered: false,
                    status_code,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Execute a single POST request and check the response status.
    async fn try_send(&self, url: &str, payload: &WebhookPayload) -> Result<u16, WebhookError> {
        let response = self
            .client
            .post(url)
            .timeout(self.timeout)
            .json(payload)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(WebhookError::HttpStatus(status.as_u16()));
        }
        Ok(status.as_u16())
    }
}

impl Default for WebhookDelivery {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
