//! Tagged cache storage.
//!
//! [`TaggedStore`] is the boundary between the read-through layer and a
//! concrete backend. [`MemoryStore`] is the in-process implementation; the
//! Redis-backed one lives in `infra::redis`.

use std::num::NonZeroUsize;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use metrics::counter;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

use super::keys::{CacheKey, Tag};
use super::lock::{rw_read, rw_write};
use super::registry::TagRegistry;

const SOURCE: &str = "cache::store";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache store `{store}` did not answer within {timeout_ms} ms")]
    Timeout { store: &'static str, timeout_ms: u64 },
    #[error("cache store unavailable: {0}")]
    Unavailable(String),
    #[error("cache payload codec error: {0}")]
    Codec(String),
}

impl StoreError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec(message.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::Unavailable(_) => "unavailable",
            Self::Codec(_) => "codec",
        }
    }
}

/// A key/value store whose entries expire and can be grouped under tags.
///
/// Writes replace the whole entry: a reader sees either the previous value
/// or the new one.
#[async_trait]
pub trait TaggedStore: Send + Sync {
    /// Short backend name used in logs and metric labels.
    fn name(&self) -> &'static str;

    async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>, StoreError>;

    async fn put(
        &self,
        key: &CacheKey,
        value: Bytes,
        ttl: Duration,
        tags: &[Tag],
    ) -> Result<(), StoreError>;

    /// Remove every entry carrying `tag`, returning how many were removed.
    async fn invalidate_tag(&self, tag: &Tag) -> Result<u64, StoreError>;
}

struct StoredEntry {
    value: Bytes,
    expires_at: Instant,
}

/// In-process LRU store with per-entry expiry.
///
/// Lock order is always entries first, then the tag registry.
pub struct MemoryStore {
    entries: RwLock<LruCache<CacheKey, StoredEntry>>,
    registry: TagRegistry,
}

impl MemoryStore {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(capacity)),
            registry: TagRegistry::new(),
        }
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn registry(&self) -> &TagRegistry {
        &self.registry
    }

    fn lookup(&self, key: &CacheKey) -> Option<Bytes> {
        let now = Instant::now();
        let mut entries = rw_write(&self.entries, SOURCE, "get");

        let expired = match entries.get(key) {
            Some(entry) if entry.expires_at > now => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };

        if expired {
            entries.pop(key);
            self.registry.unregister(key);
            debug!(key = %key, "Dropped expired listing cache entry");
        }
        None
    }

    fn store(&self, key: &CacheKey, value: Bytes, ttl: Duration, tags: &[Tag]) {
        let entry = StoredEntry {
            value,
            expires_at: Instant::now() + ttl,
        };

        let mut entries = rw_write(&self.entries, SOURCE, "put");
        if let Some((evicted, _)) = entries.push(key.clone(), entry)
            && evicted != *key
        {
            self.registry.unregister(&evicted);
            counter!("listing_cache_evict_total", "store" => self.name()).increment(1);
            debug!(key = %evicted, "Evicted listing cache entry");
        }
        self.registry.register(key, tags);
    }

    fn remove_tagged(&self, tag: &Tag) -> u64 {
        let mut entries = rw_write(&self.entries, SOURCE, "invalidate_tag");
        let keys = self.registry.take_tag(tag);

        keys.iter()
            .filter(|key| entries.pop(*key).is_some())
            .count() as u64
    }
}

#[async_trait]
impl TaggedStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>, StoreError> {
        Ok(self.lookup(key))
    }

    async fn put(
        &self,
        key: &CacheKey,
        value: Bytes,
        ttl: Duration,
        tags: &[Tag],
    ) -> Result<(), StoreError> {
        self.store(key, value, ttl, tags);
        Ok(())
    }

    async fn invalidate_tag(&self, tag: &Tag) -> Result<u64, StoreError> {
        Ok(self.remove_tagged(tag))
    }
}
