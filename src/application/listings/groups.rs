//! Public groups index.

use std::sync::Arc;

use async_trait::async_trait;

use crate::application::repos::GroupsQuery;
use crate::cache::{CacheKey, FilterSet, InvalidFilterError, ListingKind, Tag};
use crate::infra::cache_warmer::{WarmError, WarmTarget, WarmedEntry};

use super::{Listing, ListingContext, ListingError};

const KIND: ListingKind = ListingKind::GroupsIndex;
const PUBLIC_VISIBILITY: &str = "public";

pub struct GroupsListing {
    ctx: Arc<ListingContext>,
    source: Arc<dyn GroupsQuery>,
}

impl GroupsListing {
    pub fn new(ctx: Arc<ListingContext>, source: Arc<dyn GroupsQuery>) -> Self {
        Self { ctx, source }
    }

    pub fn filters() -> FilterSet {
        FilterSet::declare(&["visibility"]).text("visibility", Some(PUBLIC_VISIBILITY))
    }

    pub fn cache_key(&self) -> Result<CacheKey, InvalidFilterError> {
        self.ctx.key(KIND, &Self::filters())
    }

    pub fn tags() -> Vec<Tag> {
        vec![Tag::groups()]
    }

    pub async fn index(&self) -> Result<Listing, ListingError> {
        let key = self.cache_key()?;
        self.ctx
            .read_through(KIND, &key, &Self::tags(), || self.source.list_public_groups())
            .await
    }
}

#[async_trait]
impl WarmTarget for GroupsListing {
    fn resource(&self) -> &'static str {
        KIND.resource()
    }

    async fn warm(&self) -> Result<WarmedEntry, WarmError> {
        let key = self.cache_key()?;
        self.ctx
            .refresh(KIND, key, &Self::tags(), || self.source.list_public_groups())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::listings::test_support::{Counter, context};
    use crate::application::repos::SourceError;

    #[derive(Default)]
    struct FakeGroups(Counter);

    #[async_trait]
    impl GroupsQuery for FakeGroups {
        async fn list_public_groups(&self) -> Result<Listing, SourceError> {
            Ok(self.0.next())
        }
    }

    #[tokio::test]
    async fn index_is_cached_until_groups_tag_is_invalidated() {
        let ctx = context();
        let source = Arc::new(FakeGroups::default());
        let listing = GroupsListing::new(ctx.clone(), source.clone());

        let first = listing.index().await.expect("first");
        let second = listing.index().await.expect("second");
        assert_eq!(first, second);
        assert_eq!(source.0.calls(), 1);

        ctx.cache().invalidate_tag(&Tag::groups()).await.expect("invalidate");
        let third = listing.index().await.expect("third");
        assert_ne!(third, first);
        assert_eq!(source.0.calls(), 2);
    }

    #[tokio::test]
    async fn warm_writes_the_key_index_reads() {
        let ctx = context();
        let source = Arc::new(FakeGroups::default());
        let listing = GroupsListing::new(ctx, source.clone());

        let warmed = listing.warm().await.expect("warm");
        assert_eq!(warmed.key, listing.cache_key().expect("key"));
        assert_eq!(warmed.rows, 1);

        listing.index().await.expect("index");
        assert_eq!(source.0.calls(), 1);
    }
}
