//! Message Repository Trait
//!
//! Store contract consumed by the dispatch pipeline and the read path.

use anyhow::Result;
use async_trait::async_trait;
use ms_common::{Message, MessageStatus};

#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Fetch up to `limit` messages with the given status, oldest first
    async fn fetch_by_status(&self, status: MessageStatus, limit: u32) -> Result<Vec<Message>>;

    /// Transition a message to `sent`, attaching the webhook's delivery id.
    ///
    /// Repeating the call with the same delivery id is a no-op. Marking an
    /// unknown message, or one already sent under a different delivery id,
    /// is an error.
    async fn mark_sent(&self, message_id: &str, delivery_id: &str) -> Result<()>;

    /// Create indexes or other schema objects (no-op by default)
    async fn init_schema(&self) -> Result<()> {
        Ok(())
    }
}
