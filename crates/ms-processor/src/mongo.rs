//! MongoDB Message Repository
//!
//! Documents look like:
//! `{ _id: ObjectId, phoneNumber, content, status, webhookMessageId?, sentAt? }`
//! and are returned in `_id` order, i.e. creation order.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use futures::stream::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, DateTime as BsonDateTime, Document};
use mongodb::options::{FindOptions, IndexOptions};
use mongodb::{Client, Collection, Database, IndexModel};
use ms_common::{Message, MessageStatus};
use tracing::{debug, info, warn};

use crate::repository::MessageRepository;

pub struct MongoMessageRepository {
    database: Database,
    collection_name: String,
}

impl MongoMessageRepository {
    pub fn new(client: Client, db_name: &str, collection_name: &str) -> Self {
        Self {
            database: client.database(db_name),
            collection_name: collection_name.to_string(),
        }
    }

    fn collection(&self) -> Collection<Document> {
        self.database.collection(&self.collection_name)
    }

    fn parse_id(message_id: &str) -> Result<ObjectId> {
        ObjectId::parse_str(message_id)
            .map_err(|e| anyhow!("invalid message id {}: {}", message_id, e))
    }

    fn parse_doc(doc: &Document) -> Result<Message> {
        let status_str = doc.get_str("status")?;
        let status = MessageStatus::parse(status_str)
            .ok_or_else(|| anyhow!("unknown message status: {}", status_str))?;

        let delivery_id = doc
            .get_str("webhookMessageId")
            .ok()
            .filter(|id| !id.is_empty())
            .map(String::from);
        let sent_at = doc.get_datetime("sentAt").ok().map(|dt| dt.to_chrono());

        Ok(Message {
            id: doc.get_object_id("_id")?.to_hex(),
            recipient: doc.get_str("phoneNumber")?.to_string(),
            content: doc.get_str("content")?.to_string(),
            status,
            delivery_id,
            sent_at,
        })
    }
}

#[async_trait]
impl MessageRepository for MongoMessageRepository {
    async fn fetch_by_status(&self, status: MessageStatus, limit: u32) -> Result<Vec<Message>> {
        let filter = doc! { "status": status.as_str() };
        let find_options = FindOptions::builder()
            .sort(doc! { "_id": 1 })
            .limit(limit as i64)
            .build();

        let mut cursor = self.collection().find(filter).with_options(find_options).await?;
        let mut messages = Vec::new();

        while let Some(doc) = cursor.try_next().await? {
            match Self::parse_doc(&doc) {
                Ok(message) => messages.push(message),
                Err(e) => warn!(error = %e, "Skipping malformed message document"),
            }
        }

        debug!(
            collection = %self.collection_name,
            status = %status,
            count = messages.len(),
            "Fetched messages"
        );

        Ok(messages)
    }

    async fn mark_sent(&self, message_id: &str, delivery_id: &str) -> Result<()> {
        if delivery_id.is_empty() {
            return Err(anyhow!("delivery id must not be empty"));
        }
        let oid = Self::parse_id(message_id)?;
        let collection = self.collection();

        let filter = doc! { "_id": oid, "status": MessageStatus::Unsent.as_str() };
        let update = doc! {
            "$set": {
                "status": MessageStatus::Sent.as_str(),
                "webhookMessageId": delivery_id,
                "sentAt": BsonDateTime::from_chrono(Utc::now()),
            }
        };

        let result = collection.update_one(filter, update).await?;
        if result.matched_count == 1 {
            debug!(message_id, delivery_id, "Marked message as sent");
            return Ok(());
        }

        // Nothing unsent matched: either a repeat of an earlier mark or a real conflict
        let existing = collection
            .find_one(doc! { "_id": oid })
            .await?
            .ok_or_else(|| anyhow!("message {} not found", message_id))?;

        match existing.get_str("webhookMessageId") {
            Ok(id) if id == delivery_id => Ok(()),
            Ok(id) => Err(anyhow!(
                "message {} was already sent with delivery id {}",
                message_id,
                id
            )),
            Err(_) => Err(anyhow!("message {} could not be marked as sent", message_id)),
        }
    }

    async fn init_schema(&self) -> Result<()> {
        let status_index = IndexModel::builder()
            .keys(doc! { "status": 1 })
            .options(IndexOptions::builder().name("idx_status".to_string()).build())
            .build();

        self.collection().create_index(status_index).await?;

        info!(collection = %self.collection_name, "Initialized MongoDB message indexes");
        Ok(())
    }
}
