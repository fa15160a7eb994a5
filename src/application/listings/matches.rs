//! Per-user match feed and established-match list.

use std::sync::Arc;

use serde::Deserialize;

use crate::application::repos::{EstablishedMatchesQuery, MatchFeedQuery};
use crate::cache::{CacheKey, FilterSet, InvalidFilterError, ListingKind, Tag};

use super::{Listing, ListingContext, ListingError};

const FEED_FILTER_FIELDS: [&str; 10] = [
    "user_id",
    "age_min",
    "age_max",
    "max_distance",
    "smoking",
    "drinking",
    "body_type",
    "height_min",
    "has_bio",
    "verified_only",
];

/// Preference filters a user can apply to their candidate feed.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct MatchFeedFilters {
    pub age_min: Option<u32>,
    pub age_max: Option<u32>,
    /// Miles.
    pub max_distance: Option<f64>,
    pub smoking: Option<String>,
    pub drinking: Option<String>,
    pub body_type: Option<String>,
    /// Centimetres.
    pub height_min: Option<u32>,
    pub has_bio: Option<bool>,
    pub verified_only: Option<bool>,
}

impl MatchFeedFilters {
    pub fn filter_set(&self, user_id: i64) -> FilterSet {
        FilterSet::declare(&FEED_FILTER_FIELDS)
            .int("user_id", Some(user_id))
            .int("age_min", self.age_min.map(i64::from))
            .int("age_max", self.age_max.map(i64::from))
            .float("max_distance", self.max_distance)
            .text("smoking", self.smoking.as_deref())
            .text("drinking", self.drinking.as_deref())
            .text("body_type", self.body_type.as_deref())
            .int("height_min", self.height_min.map(i64::from))
            .flag("has_bio", self.has_bio)
            .flag("verified_only", self.verified_only)
    }
}

pub struct MatchFeedListing {
    ctx: Arc<ListingContext>,
    source: Arc<dyn MatchFeedQuery>,
}

impl MatchFeedListing {
    pub fn new(ctx: Arc<ListingContext>, source: Arc<dyn MatchFeedQuery>) -> Self {
        Self { ctx, source }
    }

    pub fn cache_key(
        &self,
        user_id: i64,
        filters: &MatchFeedFilters,
    ) -> Result<CacheKey, InvalidFilterError> {
        self.ctx
            .key(ListingKind::MatchFeed, &filters.filter_set(user_id))
    }

    pub fn tags(user_id: i64) -> Vec<Tag> {
        vec![Tag::matches_feed(user_id)]
    }

    pub async fn feed(
        &self,
        user_id: i64,
        filters: &MatchFeedFilters,
    ) -> Result<Listing, ListingError> {
        let key = self.cache_key(user_id, filters)?;
        self.ctx
            .read_through(ListingKind::MatchFeed, &key, &Self::tags(user_id), || {
                self.source.match_feed(user_id, filters)
            })
            .await
    }
}

pub struct EstablishedMatchesListing {
    ctx: Arc<ListingContext>,
    source: Arc<dyn EstablishedMatchesQuery>,
}

impl EstablishedMatchesListing {
    pub fn new(ctx: Arc<ListingContext>, source: Arc<dyn EstablishedMatchesQuery>) -> Self {
        Self { ctx, source }
    }

    pub fn cache_key(&self, user_id: i64) -> Result<CacheKey, InvalidFilterError> {
        let filters = FilterSet::declare(&["user_id"]).int("user_id", Some(user_id));
        self.ctx.key(ListingKind::EstablishedMatches, &filters)
    }

    pub fn tags(user_id: i64) -> Vec<Tag> {
        vec![Tag::matches_list(user_id)]
    }

    pub async fn list(&self, user_id: i64) -> Result<Listing, ListingError> {
        let key = self.cache_key(user_id)?;
        self.ctx
            .read_through(
                ListingKind::EstablishedMatches,
                &key,
                &Self::tags(user_id),
                || self.source.established_matches(user_id),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::application::listings::test_support::{Counter, context};
    use crate::application::repos::SourceError;
    use crate::cache::{InvalidationEvent, Invalidator};

    #[derive(Default)]
    struct FakeMatches(Counter);

    #[async_trait]
    impl MatchFeedQuery for FakeMatches {
        async fn match_feed(
            &self,
            _user_id: i64,
            _filters: &MatchFeedFilters,
        ) -> Result<Listing, SourceError> {
            Ok(self.0.next())
        }
    }

    #[async_trait]
    impl EstablishedMatchesQuery for FakeMatches {
        async fn established_matches(&self, _user_id: i64) -> Result<Listing, SourceError> {
            Ok(self.0.next())
        }
    }

    #[test]
    fn feed_key_depends_on_user_and_preferences() {
        let feed = MatchFeedListing::new(context(), Arc::new(FakeMatches::default()));
        let defaults = MatchFeedFilters::default();
        let picky = MatchFeedFilters {
            age_min: Some(25),
            verified_only: Some(true),
            ..Default::default()
        };

        let base = feed.cache_key(1, &defaults).expect("key");
        assert_ne!(feed.cache_key(2, &defaults).expect("key"), base);
        assert_ne!(feed.cache_key(1, &picky).expect("key"), base);
        assert_eq!(feed.cache_key(1, &MatchFeedFilters::default()).expect("key"), base);
    }

    #[test]
    fn false_flag_differs_from_absent_flag() {
        let feed = MatchFeedListing::new(context(), Arc::new(FakeMatches::default()));
        let unset = MatchFeedFilters::default();
        let off = MatchFeedFilters {
            has_bio: Some(false),
            ..Default::default()
        };
        assert_ne!(
            feed.cache_key(1, &unset).expect("key"),
            feed.cache_key(1, &off).expect("key"),
        );
    }

    #[tokio::test]
    async fn mutual_match_refreshes_both_lists() {
        let ctx = context();
        let source = Arc::new(FakeMatches::default());
        let established = EstablishedMatchesListing::new(ctx.clone(), source.clone());
        let invalidator = Invalidator::new(ctx.cache().clone());

        let alice_before = established.list(1).await.expect("alice");
        let bob_before = established.list(2).await.expect("bob");
        established.list(3).await.expect("carol");
        assert_eq!(source.0.calls(), 3);

        invalidator
            .apply(InvalidationEvent::MatchFormed { user_a: 1, user_b: 2 })
            .await
            .expect("invalidate");

        assert_ne!(established.list(1).await.expect("alice"), alice_before);
        assert_ne!(established.list(2).await.expect("bob"), bob_before);
        established.list(3).await.expect("carol");
        assert_eq!(source.0.calls(), 5);
    }

    #[tokio::test]
    async fn feed_is_isolated_per_user() {
        let ctx = context();
        let source = Arc::new(FakeMatches::default());
        let feed = MatchFeedListing::new(ctx.clone(), source.clone());
        let filters = MatchFeedFilters::default();

        feed.feed(1, &filters).await.expect("user 1");
        feed.feed(2, &filters).await.expect("user 2");
        ctx.cache()
            .invalidate_tag(&Tag::matches_feed(1))
            .await
            .expect("invalidate");
        feed.feed(1, &filters).await.expect("user 1 again");
        feed.feed(2, &filters).await.expect("user 2 again");

        assert_eq!(source.0.calls(), 3);
    }
}
