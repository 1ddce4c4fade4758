//! Message transports.
//!
//! A transport delivers a single message and reports whether a failure is
//! worth retrying. Implementations:
//! - [`ResendTransport`]: email via the Resend HTTP API
//! - [`LogTransport`]: writes the message to the log, for local development

pub mod log;
pub mod resend;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use rally_common::config::AppConfig;
use rally_common::error::AppError;

pub use log::LogTransport;
pub use resend::ResendTransport;

/// The content handed to a transport for one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutboundMessage<'a> {
    pub recipient: &'a str,
    pub subject: &'a str,
    pub body: &'a str,
}

/// Why a delivery attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// Network trouble, rate limiting, upstream outage. Retried on a later pass.
    #[error("transient delivery failure: {0}")]
    Transient(String),

    /// The message can never be delivered as is (e.g. invalid address).
    #[error("permanent delivery failure: {0}")]
    Permanent(String),
}

impl DeliveryError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, DeliveryError::Permanent(_))
    }
}

/// Delivery capability consumed by the dispatcher.
///
/// May be called concurrently from several dispatch tasks.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, message: OutboundMessage<'_>) -> Result<(), DeliveryError>;
}

/// Resend when an API key and sender are configured, log-only otherwise.
pub fn from_config(config: &AppConfig) -> Result<Arc<dyn Transport>, AppError> {
    match (&config.resend_api_key, &config.email_from) {
        (Some(api_key), Some(from)) => Ok(Arc::new(ResendTransport::new(
            &config.resend_api_url,
            api_key.clone(),
            from.clone(),
            Duration::from_secs(config.transport_timeout_secs),
        )?)),
        _ => {
            tracing::warn!(
                "RESEND_API_KEY or EMAIL_FROM not set, notifications will only be logged"
            );
            Ok(Arc::new(LogTransport))
        }
    }
}
