//! Dispatch Pipeline
//!
//! One pass: fetch a bounded batch of unsent messages, then for each message
//! deliver -> mark sent -> cache metadata. A failure in any step is logged
//! and the pass moves on to the next message; only a failed fetch ends a
//! pass early.
//!
//! A message that is delivered but then fails to be marked stays `unsent`
//! and will be delivered again on a later pass. There is no deduplication.
//!
//! A message that fails payload validation is never retried by this
//! process: its id is remembered and excluded from later batches.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ms_common::{CacheRecord, DeliveryReceipt, Message, MessageStatus};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::cache::DeliveryCache;
use crate::repository::MessageRepository;
use crate::webhook::{DeliveryError, MessageDelivery};

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("failed to fetch unsent messages: {0}")]
    Fetch(#[source] anyhow::Error),

    #[error("delivery of message {message_id} failed: {source}")]
    Delivery {
        message_id: String,
        #[source]
        source: DeliveryError,
    },

    #[error("failed to mark message {message_id} as sent: {source}")]
    Mark {
        message_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to cache delivery record for message {message_id}: {source}")]
    Cache {
        message_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to serialize cache record for message {message_id}: {source}")]
    Serialize {
        message_id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{step} timed out after {timeout:?}")]
    Timeout { step: &'static str, timeout: Duration },
}

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum unsent messages fetched per pass
    pub batch_size: u32,
    /// Lifetime of cached delivery records
    pub cache_ttl: Duration,
    /// Upper bound for each store, webhook and cache call
    pub call_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 2,
            cache_ttl: Duration::from_secs(24 * 60 * 60),
            call_timeout: Duration::from_secs(30),
        }
    }
}

/// Counts for a single pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub fetched: usize,
    pub delivered: usize,
    pub marked: usize,
    pub cached: usize,
    /// Messages whose delivery or status update failed
    pub failed: usize,
    /// Messages rejected by payload validation; excluded from later passes
    pub invalid: usize,
}

/// Upper bound on remembered invalid message ids
pub const MAX_INVALID_IDS: usize = 1000;

pub struct DispatchPipeline {
    repository: Arc<dyn MessageRepository>,
    delivery: Arc<dyn MessageDelivery>,
    cache: Arc<dyn DeliveryCache>,
    config: PipelineConfig,
    /// Ids that failed validation in this process. They stay `unsent` in
    /// the store but no longer take up batch slots.
    invalid_ids: Mutex<HashSet<String>>,
}

impl DispatchPipeline {
    pub fn new(
        repository: Arc<dyn MessageRepository>,
        delivery: Arc<dyn MessageDelivery>,
        cache: Arc<dyn DeliveryCache>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            repository,
            delivery,
            cache,
            config,
            invalid_ids: Mutex::new(HashSet::new()),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn repository(&self) -> &Arc<dyn MessageRepository> {
        &self.repository
    }

    /// Number of message ids currently excluded as invalid
    pub fn invalid_count(&self) -> usize {
        self.invalid_ids.lock().len()
    }

    /// Run one dispatch pass.
    ///
    /// Returns an error only when the batch could not be fetched; every
    /// per-message failure is logged and reflected in the summary.
    pub async fn run_pass(&self) -> Result<PassSummary, DispatchError> {
        metrics::counter!("dispatch.passes_total").increment(1);

        let messages = match self.fetch_batch().await {
            Ok(messages) => messages,
            Err(e) => {
                metrics::counter!("dispatch.fetch_errors_total").increment(1);
                return Err(e);
            }
        };

        let mut summary = PassSummary {
            fetched: messages.len(),
            ..Default::default()
        };

        if messages.is_empty() {
            debug!("No unsent messages");
            return Ok(summary);
        }

        for message in &messages {
            self.process_message(message, &mut summary).await;
        }

        info!(
            fetched = summary.fetched,
            marked = summary.marked,
            cached = summary.cached,
            failed = summary.failed,
            invalid = summary.invalid,
            "Dispatch pass complete"
        );

        Ok(summary)
    }

    /// Fetch up to `batch_size` unsent messages that are not known to be invalid.
    ///
    /// Over-fetches by the number of excluded ids so they cannot fill the batch.
    async fn fetch_batch(&self) -> Result<Vec<Message>, DispatchError> {
        let excluded = self.invalid_ids.lock().len() as u32;
        let limit = self.config.batch_size.saturating_add(excluded);

        let fetched = self
            .bounded("fetch", self.repository.fetch_by_status(MessageStatus::Unsent, limit))
            .await?
            .map_err(DispatchError::Fetch)?;

        let invalid_ids = self.invalid_ids.lock();
        Ok(fetched
            .into_iter()
            .filter(|m| !invalid_ids.contains(&m.id))
            .take(self.config.batch_size as usize)
            .collect())
    }

    async fn process_message(&self, message: &Message, summary: &mut PassSummary) {
        let receipt = match self.deliver(message).await {
            Ok(receipt) => receipt,
            Err(e) if e.delivery_error().is_some_and(DeliveryError::is_validation) => {
                warn!(
                    message_id = %message.id,
                    error = %e,
                    "Message failed validation, excluding it from later passes"
                );
                metrics::counter!("dispatch.messages.invalid_total").increment(1);
                self.remember_invalid(&message.id);
                summary.invalid += 1;
                return;
            }
            Err(e) => {
                error!(message_id = %message.id, error = %e, "Message delivery failed");
                metrics::counter!("dispatch.messages.failed_total").increment(1);
                summary.failed += 1;
                return;
            }
        };
        summary.delivered += 1;
        let delivery_id = receipt.message_id;

        if let Err(e) = self.mark_sent(message, &delivery_id).await {
            // Delivered but still unsent: the next pass will deliver it again
            error!(
                message_id = %message.id,
                delivery_id = %delivery_id,
                error = %e,
                "Delivered message could not be marked as sent"
            );
            metrics::counter!("dispatch.messages.failed_total").increment(1);
            summary.failed += 1;
            return;
        }
        summary.marked += 1;
        metrics::counter!("dispatch.messages.sent_total").increment(1);

        match self.cache_delivery(message, &delivery_id).await {
            Ok(()) => summary.cached += 1,
            Err(e) => {
                warn!(
                    message_id = %message.id,
                    delivery_id = %delivery_id,
                    error = %e,
                    "Failed to cache delivery record"
                );
                metrics::counter!("dispatch.cache.errors_total").increment(1);
            }
        }

        debug!(message_id = %message.id, delivery_id = %delivery_id, "Message dispatched");
    }

    fn remember_invalid(&self, message_id: &str) {
        let mut invalid_ids = self.invalid_ids.lock();
        if invalid_ids.len() >= MAX_INVALID_IDS {
            warn!(message_id, "Invalid message set is full, message will be fetched again");
            return;
        }
        invalid_ids.insert(message_id.to_string());
    }

    async fn deliver(&self, message: &Message) -> Result<DeliveryReceipt, DispatchError> {
        let outbound = message.to_outbound();
        self.bounded("deliver", self.delivery.send(&outbound))
            .await?
            .map_err(|source| DispatchError::Delivery {
                message_id: message.id.clone(),
                source,
            })
    }

    async fn mark_sent(&self, message: &Message, delivery_id: &str) -> Result<(), DispatchError> {
        let mark = self.repository.mark_sent(&message.id, delivery_id);
        self.bounded("mark_sent", mark)
            .await?
            .map_err(|source| DispatchError::Mark {
                message_id: message.id.clone(),
                source,
            })
    }

    async fn cache_delivery(
        &self,
        message: &Message,
        delivery_id: &str,
    ) -> Result<(), DispatchError> {
        let record = CacheRecord::new(delivery_id, Utc::now());
        let value = record.to_json().map_err(|source| DispatchError::Serialize {
            message_id: message.id.clone(),
            source,
        })?;

        let write = self.cache.set_with_ttl(&message.id, &value, self.config.cache_ttl);
        self.bounded("cache", write)
            .await?
            .map_err(|source| DispatchError::Cache {
                message_id: message.id.clone(),
                source,
            })
    }

    /// Apply the call timeout to a collaborator call
    async fn bounded<F, T>(&self, step: &'static str, call: F) -> Result<T, DispatchError>
    where
        F: Future<Output = T>,
    {
        let timeout = self.config.call_timeout;
        tokio::time::timeout(timeout, call)
            .await
            .map_err(|_| DispatchError::Timeout { step, timeout })
    }
}

impl DispatchError {
    /// The delivery failure behind this error, if any
    pub fn delivery_error(&self) -> Option<&DeliveryError> {
        match self {
            DispatchError::Delivery { source, .. } => Some(source),
            _ => None,
        }
    }
}
