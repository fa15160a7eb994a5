//! Read-through access over any [`TaggedStore`].
//!
//! Reads degrade to computation: a store that errors, times out or returns
//! an undecodable entry is treated as a miss. Only the caller's computation
//! can fail a read.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use metrics::counter;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{Instrument, debug, info_span, warn};

use super::config::CacheConfig;
use super::keys::{CacheKey, Tag};
use super::store::{StoreError, TaggedStore};

#[derive(Clone)]
pub struct ReadThroughCache {
    store: Arc<dyn TaggedStore>,
    timeout: Duration,
}

impl ReadThroughCache {
    pub fn new(store: Arc<dyn TaggedStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub fn from_config(store: Arc<dyn TaggedStore>, config: &CacheConfig) -> Self {
        Self::new(store, config.store_timeout())
    }

    pub fn store_name(&self) -> &'static str {
        self.store.name()
    }

    /// Return the cached value for `key`, or compute, store and return it.
    ///
    /// Errors from `compute` are returned unchanged and nothing is stored.
    pub async fn get_or_compute<T, E, F, Fut>(
        &self,
        key: &CacheKey,
        ttl: Duration,
        tags: &[Tag],
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let span = info_span!("listing_cache.read_through", key = %key, store = self.store.name());
        async move {
            if let Some(value) = self.lookup(key).await {
                return Ok(value);
            }

            let value = compute().await?;
            if let Err(err) = self.put(key, &value, ttl, tags).await {
                warn!(
                    key = %key,
                    error = %err,
                    kind = err.kind(),
                    "Failed to store computed listing; serving uncached"
                );
            }
            Ok(value)
        }
        .instrument(span)
        .await
    }

    /// Unconditionally write `value` under `key`.
    pub async fn put<T>(
        &self,
        key: &CacheKey,
        value: &T,
        ttl: Duration,
        tags: &[Tag],
    ) -> Result<(), StoreError>
    where
        T: Serialize + ?Sized,
    {
        let bytes = serde_json::to_vec(value).map_err(|err| StoreError::codec(err.to_string()))?;
        self.bounded(self.store.put(key, Bytes::from(bytes), ttl, tags))
            .await
            .inspect_err(|_| self.record_store_error("put"))
    }

    /// Remove every entry carrying `tag`.
    pub async fn invalidate_tag(&self, tag: &Tag) -> Result<u64, StoreError> {
        let removed = self
            .bounded(self.store.invalidate_tag(tag))
            .await
            .inspect_err(|_| self.record_store_error("invalidate_tag"))?;

        counter!("listing_cache_invalidate_total", "store" => self.store.name()).increment(1);
        debug!(tag = %tag, removed, "Invalidated listing cache tag");
        Ok(removed)
    }

    async fn lookup<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let store = self.store.name();
        match self.bounded(self.store.get(key)).await {
            Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
                Ok(value) => {
                    counter!("listing_cache_hit_total", "store" => store).increment(1);
                    debug!(outcome = "hit", "Listing cache lookup");
                    Some(value)
                }
                Err(err) => {
                    counter!("listing_cache_miss_total", "store" => store).increment(1);
                    warn!(error = %err, "Discarding undecodable listing cache entry");
                    None
                }
            },
            Ok(None) => {
                counter!("listing_cache_miss_total", "store" => store).increment(1);
                debug!(outcome = "miss", "Listing cache lookup");
                None
            }
            Err(err) => {
                self.record_store_error("get");
                counter!("listing_cache_miss_total", "store" => store).increment(1);
                warn!(
                    error = %err,
                    kind = err.kind(),
                    "Listing cache read failed; computing instead"
                );
                None
            }
        }
    }

    async fn bounded<T, Fut>(&self, operation: Fut) -> Result<T, StoreError>
    where
        Fut: Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.timeout, operation).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout {
                store: self.store.name(),
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }

    fn record_store_error(&self, op: &'static str) {
        counter!("listing_cache_store_error_total", "store" => self.store.name(), "op" => op)
            .increment(1);
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::cache::keys::{CacheKeyBuilder, FilterSet};
    use crate::cache::store::MemoryStore;

    const TTL: Duration = Duration::from_secs(300);

    fn key() -> CacheKey {
        CacheKeyBuilder::new("v1")
            .expect("schema version")
            .build("groups", "index", &FilterSet::new())
            .expect("key")
    }

    fn memory_cache() -> (Arc<MemoryStore>, ReadThroughCache) {
        let store = Arc::new(MemoryStore::new(NonZeroUsize::new(16).expect("capacity")));
        let cache = ReadThroughCache::new(store.clone(), Duration::from_millis(250));
        (store, cache)
    }

    /// Store whose reads and writes never finish.
    struct StalledStore;

    #[async_trait]
    impl TaggedStore for StalledStore {
        fn name(&self) -> &'static str {
            "stalled"
        }

        async fn get(&self, _key: &CacheKey) -> Result<Option<Bytes>, StoreError> {
            std::future::pending().await
        }

        async fn put(
            &self,
            _key: &CacheKey,
            _value: Bytes,
            _ttl: Duration,
            _tags: &[Tag],
        ) -> Result<(), StoreError> {
            std::future::pending().await
        }

        async fn invalidate_tag(&self, _tag: &Tag) -> Result<u64, StoreError> {
            std::future::pending().await
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl TaggedStore for BrokenStore {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn get(&self, _key: &CacheKey) -> Result<Option<Bytes>, StoreError> {
            Err(StoreError::unavailable("connection refused"))
        }

        async fn put(
            &self,
            _key: &CacheKey,
            _value: Bytes,
            _ttl: Duration,
            _tags: &[Tag],
        ) -> Result<(), StoreError> {
            Err(StoreError::unavailable("connection refused"))
        }

        async fn invalidate_tag(&self, _tag: &Tag) -> Result<u64, StoreError> {
            Err(StoreError::unavailable("connection refused"))
        }
    }

    #[tokio::test]
    async fn second_read_is_served_from_cache() {
        let (_, cache) = memory_cache();
        let calls = AtomicUsize::new(0);
        let key = key();

        for _ in 0..2 {
            let value: Result<Vec<u32>, ()> = cache
                .get_or_compute(&key, TTL, &[Tag::groups()], || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(vec![1, 2, 3])
                })
                .await;
            assert_eq!(value, Ok(vec![1, 2, 3]));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn compute_errors_are_not_cached() {
        let (store, cache) = memory_cache();
        let key = key();

        let failed: Result<Vec<u32>, &str> = cache
            .get_or_compute(&key, TTL, &[Tag::groups()], || async { Err("db down") })
            .await;
        assert_eq!(failed, Err("db down"));
        assert!(store.is_empty());

        let recovered: Result<Vec<u32>, &str> = cache
            .get_or_compute(&key, TTL, &[Tag::groups()], || async { Ok(vec![7]) })
            .await;
        assert_eq!(recovered, Ok(vec![7]));
    }

    #[tokio::test]
    async fn undecodable_entry_is_recomputed() {
        let (store, cache) = memory_cache();
        let key = key();
        store
            .put(&key, Bytes::from_static(b"not json"), TTL, &[])
            .await
            .expect("seed");

        let value: Result<Vec<u32>, ()> = cache
            .get_or_compute(&key, TTL, &[], || async { Ok(vec![4]) })
            .await;
        assert_eq!(value, Ok(vec![4]));

        let stored = store.get(&key).await.expect("get").expect("rewritten");
        assert_eq!(&stored[..], b"[4]");
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_store_degrades_to_compute() {
        let cache = ReadThroughCache::new(Arc::new(StalledStore), Duration::from_millis(250));

        let value: Result<u32, ()> = cache
            .get_or_compute(&key(), TTL, &[], || async { Ok(5) })
            .await;
        assert_eq!(value, Ok(5));

        let err = cache
            .invalidate_tag(&Tag::groups())
            .await
            .expect_err("timeout surfaces");
        assert!(matches!(err, StoreError::Timeout { store: "stalled", timeout_ms: 250 }));
    }

    #[tokio::test]
    async fn failing_store_degrades_to_compute() {
        let cache = ReadThroughCache::new(Arc::new(BrokenStore), Duration::from_millis(250));

        let value: Result<u32, ()> = cache
            .get_or_compute(&key(), TTL, &[], || async { Ok(9) })
            .await;
        assert_eq!(value, Ok(9));

        assert!(cache.put(&key(), &9_u32, TTL, &[]).await.is_err());
    }

    #[tokio::test]
    async fn invalidation_forces_recompute() {
        let (_, cache) = memory_cache();
        let key = key();
        cache
            .put(&key, &vec![1_u32], TTL, &[Tag::groups()])
            .await
            .expect("put");

        assert_eq!(cache.invalidate_tag(&Tag::groups()).await.expect("invalidate"), 1);

        let value: Result<Vec<u32>, ()> = cache
            .get_or_compute(&key, TTL, &[Tag::groups()], || async { Ok(vec![2]) })
            .await;
        assert_eq!(value, Ok(vec![2]));
    }
}
