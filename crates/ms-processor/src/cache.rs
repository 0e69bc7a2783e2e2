//! Delivery metadata cache
//!
//! After a message is marked sent, its delivery record is written here under
//! the message id. Entries expire on their own; nothing in the processor
//! reads them back.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

#[async_trait]
pub trait DeliveryCache: Send + Sync {
    /// Store `value` under `key`, expiring after `ttl`
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;
}

// ============================================================================
// Redis
// ============================================================================

#[cfg(feature = "redis")]
pub use self::redis_cache::RedisDeliveryCache;

#[cfg(feature = "redis")]
mod redis_cache {
    use super::*;
    use redis::aio::ConnectionManager;
    use tracing::{debug, info};

    /// Redis-backed cache using `SET key value EX ttl`
    #[derive(Clone)]
    pub struct RedisDeliveryCache {
        conn: ConnectionManager,
    }

    impl RedisDeliveryCache {
        pub async fn connect(redis_url: &str) -> Result<Self> {
            let client = redis::Client::open(redis_url)
                .map_err(|e| anyhow!("Failed to create Redis client: {}", e))?;
            let conn = ConnectionManager::new(client).await?;
            info!(url = %redis_url, "Connected to Redis");
            Ok(Self { conn })
        }
    }

    #[async_trait]
    impl DeliveryCache for RedisDeliveryCache {
        async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
            // EX rejects zero, so round sub-second TTLs up
            let secs = ttl.as_secs().max(1);
            let mut conn = self.conn.clone();
            redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("EX")
                .arg(secs)
                .query_async::<()>(&mut conn)
                .await?;

            debug!(key, ttl_secs = secs, "Cached delivery record");
            Ok(())
        }
    }
}

// ============================================================================
// In-memory
// ============================================================================

struct CacheEntry {
    value: String,
    ttl: Duration,
    expires_at: Instant,
}

/// Expiring map used in dev mode and tests.
///
/// Expiry follows `tokio::time`, so paused-clock tests can advance past it.
#[derive(Default)]
pub struct InMemoryDeliveryCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    error: Mutex<Option<String>>,
}

impl InMemoryDeliveryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value for `key`, if present and not expired
    pub fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// TTL the live entry for `key` was written with
    pub fn ttl_of(&self, key: &str) -> Option<Duration> {
        let entries = self.entries.lock();
        entries
            .get(key)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.ttl)
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.lock().values().filter(|e| e.expires_at > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make every write fail with `error` until cleared with `None`
    pub fn set_error(&self, error: Option<&str>) {
        *self.error.lock() = error.map(String::from);
    }
}

#[async_trait]
impl DeliveryCache for InMemoryDeliveryCache {
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        if let Some(error) = self.error.lock().as_ref() {
            return Err(anyhow!("{}", error));
        }

        let mut entries = self.entries.lock();
        let now = Instant::now();
        entries.retain(|_, entry| entry.expires_at > now);
        entries.insert(
            key.to_string(),
            CacheEntry {
                value: value.to_string(),
                ttl,
                expires_at: now + ttl,
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let cache = InMemoryDeliveryCache::new();
        cache.set_with_ttl("m1", "{}", Duration::from_secs(60)).await.unwrap();

        assert_eq!(cache.get("m1").as_deref(), Some("{}"));
        assert_eq!(cache.ttl_of("m1"), Some(Duration::from_secs(60)));

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(cache.get("m1").is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get("m1").is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_overwrite_replaces_value() {
        let cache = InMemoryDeliveryCache::new();
        cache.set_with_ttl("m1", "a", Duration::from_secs(60)).await.unwrap();
        cache.set_with_ttl("m1", "b", Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get("m1").as_deref(), Some("b"));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_injected_error() {
        let cache = InMemoryDeliveryCache::new();
        cache.set_error(Some("connection reset"));
        assert!(cache.set_with_ttl("m1", "a", Duration::from_secs(1)).await.is_err());
        assert!(cache.get("m1").is_none());
    }
}
