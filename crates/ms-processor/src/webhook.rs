//! Webhook Delivery Client
//!
//! POSTs `{ "to": ..., "content": ... }` to the configured endpoint and
//! expects `{ "message": ..., "messageId": ... }` back. The payload is
//! validated before any network I/O so malformed messages fail fast.

use std::time::Duration;

use async_trait::async_trait;
use ms_common::{DeliveryReceipt, OutboundMessage, ValidationError};
use thiserror::Error;
use tracing::{debug, warn};

/// Header carrying the webhook API key
pub const AUTH_HEADER: &str = "x-ins-auth-key";

#[derive(Error, Debug)]
pub enum DeliveryError {
    /// Payload rejected locally; resending the same payload cannot succeed
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("webhook request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("webhook responded with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("webhook response did not include a message id")]
    MissingDeliveryId,
}

impl DeliveryError {
    pub fn is_validation(&self) -> bool {
        matches!(self, DeliveryError::Validation(_))
    }
}

/// Delivers a single outbound message
#[async_trait]
pub trait MessageDelivery: Send + Sync {
    /// Submit the payload; a successful receipt always has a non-empty `message_id`
    async fn send(&self, message: &OutboundMessage) -> Result<DeliveryReceipt, DeliveryError>;
}

/// Webhook client configuration
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub url: String,
    pub api_key: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:9000/webhook".to_string(),
            api_key: String::new(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

pub struct WebhookClient {
    config: WebhookConfig,
    client: reqwest::Client,
}

impl WebhookClient {
    pub fn new(config: WebhookConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self { config, client })
    }
}

#[async_trait]
impl MessageDelivery for WebhookClient {
    async fn send(&self, message: &OutboundMessage) -> Result<DeliveryReceipt, DeliveryError> {
        message.validate()?;

        debug!(url = %self.config.url, to = %message.to, "Sending message to webhook");

        let response = self
            .client
            .post(&self.config.url)
            .header(AUTH_HEADER, &self.config.api_key)
            .json(message)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %body, "Webhook rejected message");
            return Err(DeliveryError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let receipt: DeliveryReceipt = response.json().await?;
        if receipt.message_id.is_empty() {
            return Err(DeliveryError::MissingDeliveryId);
        }

        debug!(delivery_id = %receipt.message_id, "Webhook accepted message");
        Ok(receipt)
    }
}
