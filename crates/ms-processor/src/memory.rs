//! In-memory message store
//!
//! Used in dev mode and by tests. Keeps insertion order, which stands in for
//! the creation order MongoDB gets from ObjectIds.

use std::collections::HashSet;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use ms_common::{Message, MessageStatus};
use parking_lot::RwLock;
use tracing::debug;

use crate::repository::MessageRepository;

#[derive(Default)]
pub struct InMemoryMessageRepository {
    messages: RwLock<Vec<Message>>,
    fetch_error: RwLock<Option<String>>,
    failing_marks: RwLock<HashSet<String>>,
}

impl InMemoryMessageRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with messages, keeping their order
    pub fn with_messages(messages: impl IntoIterator<Item = Message>) -> Self {
        let repo = Self::new();
        repo.messages.write().extend(messages);
        repo
    }

    /// Add a message; replaces an existing one with the same id
    pub fn insert(&self, message: Message) {
        let mut messages = self.messages.write();
        match messages.iter_mut().find(|m| m.id == message.id) {
            Some(existing) => *existing = message,
            None => messages.push(message),
        }
    }

    pub fn get(&self, message_id: &str) -> Option<Message> {
        self.messages.read().iter().find(|m| m.id == message_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.messages.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.read().is_empty()
    }

    /// Make every fetch fail with `error` until cleared with `None`
    pub fn set_fetch_error(&self, error: Option<&str>) {
        *self.fetch_error.write() = error.map(String::from);
    }

    /// Make `mark_sent` fail for the given message id
    pub fn fail_mark_for(&self, message_id: &str) {
        self.failing_marks.write().insert(message_id.to_string());
    }
}

#[async_trait]
impl MessageRepository for InMemoryMessageRepository {
    async fn fetch_by_status(&self, status: MessageStatus, limit: u32) -> Result<Vec<Message>> {
        if let Some(error) = self.fetch_error.read().as_ref() {
            return Err(anyhow!("{}", error));
        }

        let messages: Vec<Message> = self
            .messages
            .read()
            .iter()
            .filter(|m| m.status == status)
            .take(limit as usize)
            .cloned()
            .collect();

        debug!(status = %status, count = messages.len(), "Fetched messages");
        Ok(messages)
    }

    async fn mark_sent(&self, message_id: &str, delivery_id: &str) -> Result<()> {
        if self.failing_marks.read().contains(message_id) {
            return Err(anyhow!("failed to update message {}", message_id));
        }

        let mut messages = self.messages.write();
        let message = messages
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or_else(|| anyhow!("message {} not found", message_id))?;

        message.mark_sent(delivery_id, Utc::now())?;
        Ok(())
    }
}
