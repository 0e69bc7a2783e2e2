use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

pub mod logging;
pub mod validation;

pub use validation::{ValidationError, MAX_CONTENT_LENGTH};

// ============================================================================
// Stored Messages
// ============================================================================

/// Delivery status of a stored message.
///
/// The only legal transition is `Unsent -> Sent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Unsent,
    Sent,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Unsent => "unsent",
            MessageStatus::Sent => "sent",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "unsent" => Some(MessageStatus::Unsent),
            "sent" => Some(MessageStatus::Sent),
            _ => None,
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected `Unsent -> Sent` transition
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("delivery id must not be empty")]
    EmptyDeliveryId,

    #[error("message {id} was already sent with delivery id {existing}")]
    AlreadySent { id: String, existing: String },
}

/// An outbound message owned by the store.
///
/// A `Sent` message always carries a non-empty `delivery_id` and a `sent_at`;
/// an `Unsent` message carries neither.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    /// Destination phone number
    #[serde(rename = "phoneNumber")]
    pub recipient: String,
    pub content: String,
    pub status: MessageStatus,
    /// Identifier returned by the webhook once delivery succeeded
    #[serde(rename = "webhookMessageId", default, skip_serializing_if = "Option::is_none")]
    pub delivery_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
}

impl Message {
    /// Create an unsent message with a freshly generated id
    pub fn new(recipient: impl Into<String>, content: impl Into<String>) -> Self {
        Self::with_id(uuid::Uuid::new_v4().simple().to_string(), recipient, content)
    }

    pub fn with_id(
        id: impl Into<String>,
        recipient: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            recipient: recipient.into(),
            content: content.into(),
            status: MessageStatus::Unsent,
            delivery_id: None,
            sent_at: None,
        }
    }

    pub fn is_sent(&self) -> bool {
        self.status == MessageStatus::Sent
    }

    /// Check the status/delivery-id/sent-at invariant
    pub fn is_consistent(&self) -> bool {
        match self.status {
            MessageStatus::Sent => {
                self.delivery_id.as_deref().is_some_and(|id| !id.is_empty())
                    && self.sent_at.is_some()
            }
            MessageStatus::Unsent => self.delivery_id.is_none() && self.sent_at.is_none(),
        }
    }

    /// Apply the `Unsent -> Sent` transition.
    ///
    /// Returns `Ok(true)` when the message changed and `Ok(false)` when it was
    /// already sent with the same delivery id.
    pub fn mark_sent(
        &mut self,
        delivery_id: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<bool, TransitionError> {
        if delivery_id.is_empty() {
            return Err(TransitionError::EmptyDeliveryId);
        }

        if self.status == MessageStatus::Sent {
            let existing = self.delivery_id.as_deref().unwrap_or_default();
            if existing == delivery_id {
                return Ok(false);
            }
            return Err(TransitionError::AlreadySent {
                id: self.id.clone(),
                existing: existing.to_string(),
            });
        }

        self.status = MessageStatus::Sent;
        self.delivery_id = Some(delivery_id.to_string());
        self.sent_at = Some(sent_at);
        Ok(true)
    }

    /// Build the webhook payload for this message
    pub fn to_outbound(&self) -> OutboundMessage {
        OutboundMessage {
            to: self.recipient.clone(),
            content: self.content.clone(),
        }
    }
}

// ============================================================================
// Webhook Payloads
// ============================================================================

/// Body POSTed to the delivery webhook
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub to: String,
    pub content: String,
}

/// Webhook acknowledgement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReceipt {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub message_id: String,
}

// ============================================================================
// Cache Records
// ============================================================================

/// Delivery metadata cached under the message id after a successful send
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheRecord {
    #[serde(rename = "messageId")]
    pub delivery_id: String,
    /// RFC 3339, UTC, second precision
    pub sent_at: String,
}

impl CacheRecord {
    pub fn new(delivery_id: impl Into<String>, sent_at: DateTime<Utc>) -> Self {
        Self {
            delivery_id: delivery_id.into(),
            sent_at: sent_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
