//! Email delivery via the Resend HTTP API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;

use rally_common::error::AppError;

use super::{DeliveryError, OutboundMessage, Transport};

/// Longest upstream error body kept in `last_error`.
const MAX_ERROR_BODY_LEN: usize = 512;

/// Request body for `POST /emails`.
#[derive(Debug, Serialize)]
struct SendEmailRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    text: &'a str,
}

/// Resend API client.
#[derive(Debug, Clone)]
pub struct ResendTransport {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    from: String,
}

impl ResendTransport {
    pub fn new(
        api_url: &str,
        api_key: impl Into<String>,
        from: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!("{}/emails", api_url.trim_end_matches('/')),
            api_key: api_key.into(),
            from: from.into(),
        })
    }

    /// Map a non-success HTTP status to a delivery error.
    ///
    /// Timeouts, rate limits and server errors are transient; any other client
    /// error means the request itself is unacceptable and will not improve.
    pub fn classify_status(status: StatusCode, body: &str) -> DeliveryError {
        let mut detail = format!("HTTP {}", status.as_u16());
        let body = body.trim();
        if !body.is_empty() {
            let truncated: String = body.chars().take(MAX_ERROR_BODY_LEN).collect();
            detail.push_str(": ");
            detail.push_str(&truncated);
        }

        if status.is_server_error()
            || status == StatusCode::TOO_MANY_REQUESTS
            || status == StatusCode::REQUEST_TIMEOUT
        {
            DeliveryError::Transient(detail)
        } else {
            DeliveryError::Permanent(detail)
        }
    }
}

#[async_trait]
impl Transport for ResendTransport {
    async fn send(&self, message: OutboundMessage<'_>) -> Result<(), DeliveryError> {
        let request = SendEmailRequest {
            from: &self.from,
            to: [message.recipient],
            subject: message.subject,
            text: message.body,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| DeliveryError::Transient(format!("Request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(recipient = message.recipient, "Email accepted by Resend");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(Self::classify_status(status, &body))
    }
}
