//! Outbound payload validation
//!
//! Run by the delivery client before any network I/O. A validation failure
//! is never retried by sending the same payload again.

use regex::Regex;
use thiserror::Error;

use crate::OutboundMessage;

/// Maximum content length in characters
pub const MAX_CONTENT_LENGTH: usize = 100;

/// Turkish mobile numbers: +905 followed by nine digits
fn phone_pattern() -> &'static Regex {
    static PATTERN: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\+905[0-9]{9}$").unwrap())
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("phone number is required")]
    MissingRecipient,

    #[error("invalid phone number format, expected +905xxxxxxxxx")]
    InvalidRecipient,

    #[error("content cannot be empty")]
    EmptyContent,

    #[error("content exceeds maximum length of {max} characters (got {actual})")]
    ContentTooLong { max: usize, actual: usize },
}

impl OutboundMessage {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.to.is_empty() {
            return Err(ValidationError::MissingRecipient);
        }
        if !phone_pattern().is_match(&self.to) {
            return Err(ValidationError::InvalidRecipient);
        }

        if self.content.is_empty() {
            return Err(ValidationError::EmptyContent);
        }
        let length = self.content.chars().count();
        if length > MAX_CONTENT_LENGTH {
            return Err(ValidationError::ContentTooLong {
                max: MAX_CONTENT_LENGTH,
                actual: length,
            });
        }

        Ok(())
    }
}
