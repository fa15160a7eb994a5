//! End-to-end behaviour of the listing cache over the in-memory store.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::json;

use listing_cache::application::listings::events::{EventFilters, EventsListing};
use listing_cache::application::listings::groups::GroupsListing;
use listing_cache::application::listings::matches::{MatchFeedFilters, MatchFeedListing};
use listing_cache::application::listings::{Listing, ListingContext};
use listing_cache::application::repos::{
    EventsQuery, GroupsQuery, MatchFeedQuery, SourceError,
};
use listing_cache::cache::{
    CacheConfig, CacheKey, Invalidator, MemoryStore, ReadThroughCache, StoreError, Tag,
    TaggedStore,
};
use listing_cache::infra::cache_warmer::{CacheWarmer, WarmTarget};

#[derive(Default)]
struct CountingSource {
    calls: AtomicUsize,
}

impl CountingSource {
    fn next(&self, label: &str) -> Listing {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Listing::unpaginated(vec![json!({ "source": label, "call": call })])
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GroupsQuery for CountingSource {
    async fn list_public_groups(&self) -> Result<Listing, SourceError> {
        Ok(self.next("groups"))
    }
}

#[async_trait]
impl EventsQuery for CountingSource {
    async fn list_events(&self, filters: &EventFilters) -> Result<Listing, SourceError> {
        let mut listing = self.next("events");
        listing.current_page = Some(filters.page());
        Ok(listing)
    }
}

#[async_trait]
impl MatchFeedQuery for CountingSource {
    async fn match_feed(
        &self,
        user_id: i64,
        _filters: &MatchFeedFilters,
    ) -> Result<Listing, SourceError> {
        Ok(self.next(&format!("feed:{user_id}")))
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    cache: Arc<ReadThroughCache>,
    ctx: Arc<ListingContext>,
}

fn harness_with(config: CacheConfig) -> Harness {
    let store = Arc::new(MemoryStore::new(
        NonZeroUsize::new(128).expect("non-zero capacity"),
    ));
    harness_on(store, config)
}

fn harness_on(store: Arc<MemoryStore>, config: CacheConfig) -> Harness {
    let cache = Arc::new(ReadThroughCache::from_config(store.clone(), &config));
    let ctx = Arc::new(ListingContext::from_config(cache.clone(), &config).expect("context"));
    Harness { store, cache, ctx }
}

fn harness() -> Harness {
    harness_with(CacheConfig::default())
}

#[tokio::test]
async fn hit_returns_the_bytes_written_on_miss() {
    let h = harness();
    let source = Arc::new(CountingSource::default());
    let groups = GroupsListing::new(h.ctx.clone(), source.clone());

    let first = groups.index().await.expect("miss");
    let second = groups.index().await.expect("hit");

    assert_eq!(first, second);
    assert_eq!(source.calls(), 1);

    let key = groups.cache_key().expect("key");
    let stored = h.store.get(&key).await.expect("get").expect("entry");
    assert_eq!(
        stored,
        Bytes::from(serde_json::to_vec(&first).expect("encode"))
    );
}

#[tokio::test]
async fn warmer_and_handlers_share_keys() {
    let h = harness();
    let source = Arc::new(CountingSource::default());
    let groups = Arc::new(GroupsListing::new(h.ctx.clone(), source.clone()));
    let events = Arc::new(EventsListing::new(h.ctx.clone(), source.clone()));
    let targets: Vec<Arc<dyn WarmTarget>> = vec![groups.clone(), events.clone()];

    let report = CacheWarmer::new(targets).warm_all().await;
    assert!(report.failed.is_empty());
    assert_eq!(source.calls(), 2);

    groups.index().await.expect("groups");
    events.index(&EventFilters::default()).await.expect("events");
    events
        .index(&EventFilters {
            page: Some(1),
            ..Default::default()
        })
        .await
        .expect("explicit first page");

    assert_eq!(source.calls(), 2, "every read after warming is a hit");
}

#[tokio::test]
async fn event_change_drops_every_events_page() {
    let h = harness();
    let source = Arc::new(CountingSource::default());
    let events = EventsListing::new(h.ctx.clone(), source.clone());
    let groups = GroupsListing::new(h.ctx.clone(), source.clone());
    let second_page = EventFilters {
        page: Some(2),
        ..Default::default()
    };

    events.index(&EventFilters::default()).await.expect("page 1");
    events.index(&second_page).await.expect("page 2");
    groups.index().await.expect("groups");
    assert_eq!(source.calls(), 3);

    let removed = Invalidator::new(h.cache.clone())
        .event_changed()
        .await
        .expect("invalidate");
    assert_eq!(removed, 2);

    let page_one = events.index(&EventFilters::default()).await.expect("page 1");
    assert_eq!(page_one.current_page, Some(1));
    events.index(&second_page).await.expect("page 2");
    groups.index().await.expect("groups still cached");
    assert_eq!(source.calls(), 5);
}

#[tokio::test]
async fn match_action_only_touches_the_acting_user() {
    let h = harness();
    let source = Arc::new(CountingSource::default());
    let feed = MatchFeedListing::new(h.ctx.clone(), source.clone());
    let filters = MatchFeedFilters::default();

    feed.feed(42, &filters).await.expect("user 42");
    feed.feed(7, &filters).await.expect("user 7");
    assert_eq!(source.calls(), 2);

    Invalidator::new(h.cache.clone())
        .match_action(42)
        .await
        .expect("invalidate");

    feed.feed(7, &filters).await.expect("user 7 cached");
    assert_eq!(source.calls(), 2);
    feed.feed(42, &filters).await.expect("user 42 recomputed");
    assert_eq!(source.calls(), 3);
}

#[tokio::test]
async fn schema_bump_misses_old_entries() {
    let store = Arc::new(MemoryStore::new(
        NonZeroUsize::new(16).expect("non-zero capacity"),
    ));
    let source = Arc::new(CountingSource::default());

    let v1 = harness_on(store.clone(), CacheConfig::default());
    let v2 = harness_on(
        store,
        CacheConfig {
            schema_version: "v2".to_string(),
            ..Default::default()
        },
    );

    GroupsListing::new(v1.ctx.clone(), source.clone())
        .index()
        .await
        .expect("v1");
    let v2_groups = GroupsListing::new(v2.ctx.clone(), source.clone());
    v2_groups.index().await.expect("v2");

    assert_eq!(source.calls(), 2);
    assert!(v2_groups.cache_key().expect("key").as_str().starts_with("v2:groups:index:"));
}

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

#[tokio::test(start_paused = true)]
async fn unresponsive_store_degrades_to_source_reads() {
    let config = CacheConfig::default();
    let cache = Arc::new(ReadThroughCache::from_config(Arc::new(StalledStore), &config));
    let ctx = Arc::new(ListingContext::from_config(cache.clone(), &config).expect("context"));
    let source = Arc::new(CountingSource::default());
    let groups = GroupsListing::new(ctx, source.clone());

    groups.index().await.expect("served from source");
    groups.index().await.expect("served from source again");
    assert_eq!(source.calls(), 2);

    let err = cache
        .invalidate_tag(&Tag::groups())
        .await
        .expect_err("invalidation times out");
    assert!(matches!(err, StoreError::Timeout { store: "stalled", .. }));
}
