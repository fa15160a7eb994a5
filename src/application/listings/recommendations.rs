//! Personalised recommendations.
//!
//! The scoring engine behind [`RecommendationsQuery`] is slow and billed per
//! call, so results are cached for an hour per user and context.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::application::repos::RecommendationsQuery;
use crate::cache::{CacheKey, FilterSet, InvalidFilterError, ListingKind, Tag};

use super::{Listing, ListingContext, ListingError};

const KIND: ListingKind = ListingKind::Recommendations;
const FILTER_FIELDS: [&str; 6] = ["user_id", "limit", "types", "lat", "lng", "radius"];

pub const DEFAULT_LIMIT: u32 = 10;
pub const MAX_LIMIT: u32 = 50;
const MIN_RADIUS_M: u32 = 100;
const MAX_RADIUS_M: u32 = 50_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationType {
    Content,
    Collaborative,
    Ai,
    Location,
}

impl RecommendationType {
    pub const ALL: [RecommendationType; 4] =
        [Self::Content, Self::Collaborative, Self::Ai, Self::Location];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Content => "content",
            Self::Collaborative => "collaborative",
            Self::Ai => "ai",
            Self::Location => "location",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RecommendationFilters {
    pub limit: Option<u32>,
    pub types: Option<Vec<RecommendationType>>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Metres.
    pub radius: Option<u32>,
}

impl RecommendationFilters {
    pub fn limit(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_LIMIT)
    }

    /// Requested types; an absent or empty list means every type.
    pub fn types(&self) -> Vec<RecommendationType> {
        match &self.types {
            Some(types) if !types.is_empty() => types.clone(),
            _ => RecommendationType::ALL.to_vec(),
        }
    }

    pub fn filter_set(&self, user_id: i64) -> Result<FilterSet, InvalidFilterError> {
        let limit = self.limit();
        if !(1..=MAX_LIMIT).contains(&limit) {
            return Err(InvalidFilterError::out_of_range(
                "limit",
                f64::from(limit),
                1.0,
                f64::from(MAX_LIMIT),
            ));
        }
        if let Some(radius) = self.radius
            && !(MIN_RADIUS_M..=MAX_RADIUS_M).contains(&radius)
        {
            return Err(InvalidFilterError::out_of_range(
                "radius",
                f64::from(radius),
                f64::from(MIN_RADIUS_M),
                f64::from(MAX_RADIUS_M),
            ));
        }

        let types = self.types().into_iter().map(RecommendationType::as_str);
        Ok(FilterSet::declare(&FILTER_FIELDS)
            .int("user_id", Some(user_id))
            .int("limit", Some(i64::from(limit)))
            .list("types", Some(types))
            .latitude("lat", self.latitude)
            .longitude("lng", self.longitude)
            .int("radius", self.radius.map(i64::from)))
    }
}

pub struct RecommendationsListing {
    ctx: Arc<ListingContext>,
    source: Arc<dyn RecommendationsQuery>,
}

impl RecommendationsListing {
    pub fn new(ctx: Arc<ListingContext>, source: Arc<dyn RecommendationsQuery>) -> Self {
        Self { ctx, source }
    }

    pub fn cache_key(
        &self,
        user_id: i64,
        filters: &RecommendationFilters,
    ) -> Result<CacheKey, InvalidFilterError> {
        self.ctx.key(KIND, &filters.filter_set(user_id)?)
    }

    pub fn tags(user_id: i64) -> Vec<Tag> {
        vec![Tag::recommendations(user_id)]
    }

    pub async fn index(
        &self,
        user_id: i64,
        filters: &RecommendationFilters,
    ) -> Result<Listing, ListingError> {
        let key = self.cache_key(user_id, filters)?;
        self.ctx
            .read_through(KIND, &key, &Self::tags(user_id), || {
                self.source.recommendations(user_id, filters)
            })
            .await
    }
}
