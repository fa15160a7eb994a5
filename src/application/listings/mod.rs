//! Read-through listing handlers.
//!
//! Each handler normalizes its filters into a [`FilterSet`], builds the
//! cache key, and serves the listing through the shared
//! [`ReadThroughCache`]. The payload returned on a hit is the same one that
//! was computed on the miss.

pub mod events;
pub mod groups;
pub mod matches;
pub mod proximity;
pub mod recommendations;

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::application::repos::SourceError;
use crate::cache::{
    CacheConfig, CacheKey, CacheKeyBuilder, FilterSet, InvalidFilterError, ListingKind,
    ReadThroughCache, Tag, TtlPolicy,
};
use crate::infra::cache_warmer::{WarmError, WarmedEntry};

/// A page (or the whole) of a listing, as returned to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub data: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}

impl Listing {
    pub fn unpaginated(data: Vec<Value>) -> Self {
        Self {
            data,
            current_page: None,
            per_page: None,
            total: None,
        }
    }

    pub fn paginated(data: Vec<Value>, current_page: u32, per_page: u32, total: u64) -> Self {
        Self {
            data,
            current_page: Some(current_page),
            per_page: Some(per_page),
            total: Some(total),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum ListingError {
    #[error(transparent)]
    InvalidFilter(#[from] InvalidFilterError),
    #[error(transparent)]
    Source(#[from] SourceError),
}

/// Everything a handler needs besides its query source.
pub struct ListingContext {
    cache: Arc<ReadThroughCache>,
    keys: CacheKeyBuilder,
    ttl: TtlPolicy,
}

impl ListingContext {
    pub fn new(cache: Arc<ReadThroughCache>, keys: CacheKeyBuilder, ttl: TtlPolicy) -> Self {
        Self { cache, keys, ttl }
    }

    pub fn from_config(
        cache: Arc<ReadThroughCache>,
        config: &CacheConfig,
    ) -> Result<Self, InvalidFilterError> {
        let keys = CacheKeyBuilder::new(config.schema_version.clone())?;
        Ok(Self::new(cache, keys, config.ttl.clone()))
    }

    pub fn cache(&self) -> &Arc<ReadThroughCache> {
        &self.cache
    }

    pub fn ttl(&self) -> &TtlPolicy {
        &self.ttl
    }

    pub(crate) fn key(
        &self,
        kind: ListingKind,
        filters: &FilterSet,
    ) -> Result<CacheKey, InvalidFilterError> {
        self.keys.build_for(kind, filters)
    }

    pub(crate) async fn read_through<F, Fut>(
        &self,
        kind: ListingKind,
        key: &CacheKey,
        tags: &[Tag],
        compute: F,
    ) -> Result<Listing, ListingError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Listing, SourceError>>,
    {
        self.cache
            .get_or_compute(key, self.ttl.for_kind(kind), tags, move || async move {
                compute().await.map_err(ListingError::from)
            })
            .await
    }

    /// Compute a listing and overwrite its cache entry.
    pub(crate) async fn refresh<F, Fut>(
        &self,
        kind: ListingKind,
        key: CacheKey,
        tags: &[Tag],
        compute: F,
    ) -> Result<WarmedEntry, WarmError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Listing, SourceError>>,
    {
        let listing = compute().await?;
        self.cache
            .put(&key, &listing, self.ttl.for_kind(kind), tags)
            .await?;
        Ok(WarmedEntry {
            key,
            rows: listing.len(),
        })
    }
}
