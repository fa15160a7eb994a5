//! Local pulse: proximity artifacts around the caller.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::application::repos::ProximityQuery;
use crate::cache::{CacheKey, FilterSet, InvalidFilterError, ListingKind, Tag};

use super::{Listing, ListingContext, ListingError};

const KIND: ListingKind = ListingKind::ProximityFeed;
const FILTER_FIELDS: [&str; 5] = ["user_id", "lat", "lng", "radius", "type"];

/// Metres.
pub const DEFAULT_RADIUS_M: u32 = 1_000;
pub const MIN_RADIUS_M: u32 = 100;
pub const MAX_RADIUS_M: u32 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    Chat,
    BoardPost,
    Announce,
}

impl ArtifactType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::BoardPost => "board_post",
            Self::Announce => "announce",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ProximityFilters {
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub radius: Option<u32>,
    #[serde(rename = "type")]
    pub artifact_type: Option<ArtifactType>,
}

impl ProximityFilters {
    pub fn radius(&self) -> u32 {
        self.radius.unwrap_or(DEFAULT_RADIUS_M)
    }

    /// Checks required fields and the radius range, then normalizes.
    pub fn filter_set(&self, user_id: i64) -> Result<FilterSet, InvalidFilterError> {
        let lat = self.lat.ok_or_else(|| InvalidFilterError::missing("lat"))?;
        let lng = self.lng.ok_or_else(|| InvalidFilterError::missing("lng"))?;

        let radius = self.radius();
        if !(MIN_RADIUS_M..=MAX_RADIUS_M).contains(&radius) {
            return Err(InvalidFilterError::out_of_range(
                "radius",
                f64::from(radius),
                f64::from(MIN_RADIUS_M),
                f64::from(MAX_RADIUS_M),
            ));
        }

        Ok(FilterSet::declare(&FILTER_FIELDS)
            .int("user_id", Some(user_id))
            .latitude("lat", Some(lat))
            .longitude("lng", Some(lng))
            .int("radius", Some(i64::from(radius)))
            .text("type", self.artifact_type.map(ArtifactType::as_str)))
    }
}

pub struct ProximityListing {
    ctx: Arc<ListingContext>,
    source: Arc<dyn ProximityQuery>,
}

impl ProximityListing {
    pub fn new(ctx: Arc<ListingContext>, source: Arc<dyn ProximityQuery>) -> Self {
        Self { ctx, source }
    }

    pub fn cache_key(
        &self,
        user_id: i64,
        filters: &ProximityFilters,
    ) -> Result<CacheKey, InvalidFilterError> {
        self.ctx.key(KIND, &filters.filter_set(user_id)?)
    }

    /// Shared `proximity` tag plus the caller's own feed tag.
    pub fn tags(user_id: i64) -> Vec<Tag> {
        vec![Tag::proximity(), Tag::proximity_feed(user_id)]
    }

    pub async fn local_pulse(
        &self,
        user_id: i64,
        filters: &ProximityFilters,
    ) -> Result<Listing, ListingError> {
        let key = self.cache_key(user_id, filters)?;
        self.ctx
            .read_through(KIND, &key, &Self::tags(user_id), || {
                self.source.local_pulse(user_id, filters)
            })
            .await
    }
}
