//! Message Dispatch Processor
//!
//! Periodically pulls unsent messages from the store, delivers each one to
//! the webhook, marks it sent and caches the delivery metadata. Lifecycle is
//! controlled through [`MessageProcessor::start`] / [`MessageProcessor::stop`],
//! usually via the HTTP API in [`api`].
//!
//! Collaborators are trait objects so the pipeline can run against MongoDB,
//! Redis and a real webhook in production, or the in-memory variants in
//! development and tests.

pub mod api;
pub mod cache;
pub mod memory;
pub mod pipeline;
pub mod processor;
pub mod repository;
pub mod webhook;

#[cfg(feature = "mongo")]
pub mod mongo;

pub use cache::{DeliveryCache, InMemoryDeliveryCache};
pub use memory::InMemoryMessageRepository;
pub use pipeline::{DispatchError, DispatchPipeline, PassSummary, PipelineConfig};
pub use processor::{MessageProcessor, ProcessorConfig};
pub use repository::MessageRepository;
pub use webhook::{DeliveryError, MessageDelivery, WebhookClient, WebhookConfig};

#[cfg(feature = "mongo")]
pub use mongo::MongoMessageRepository;

#[cfg(feature = "redis")]
pub use cache::RedisDeliveryCache;
