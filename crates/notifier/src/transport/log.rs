use async_trait::async_trait;

use super::{DeliveryError, OutboundMessage, Transport};

/// Transport that only logs the message. Used when no mail API key is configured.
#[derive(Debug, Clone, Default)]
pub struct LogTransport;

#[async_trait]
impl Transport for LogTransport {
    async fn send(&self, message: OutboundMessage<'_>) -> Result<(), DeliveryError> {
        tracing::info!(
            recipient = message.recipient,
            subject = message.subject,
            body_len = message.body.len(),
            "Notification delivered to log transport"
        );
        Ok(())
    }
}
