//! Events index, optionally narrowed to a radius around a point.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::application::repos::EventsQuery;
use crate::cache::{CacheKey, FilterSet, InvalidFilterError, ListingKind, Tag};
use crate::infra::cache_warmer::{WarmError, WarmTarget, WarmedEntry};

use super::{Listing, ListingContext, ListingError};

const KIND: ListingKind = ListingKind::EventsIndex;
const FILTER_FIELDS: [&str; 6] = ["lat", "lon", "radius", "status", "type", "page"];

pub const EVENTS_PER_PAGE: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Upcoming,
    Ongoing,
    Completed,
    Cancelled,
}

impl EventStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Upcoming => "upcoming",
            Self::Ongoing => "ongoing",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Query parameters of the events index.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct EventFilters {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Kilometres.
    pub radius: Option<f64>,
    pub status: Option<EventStatus>,
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    pub page: Option<u32>,
}

impl EventFilters {
    /// The 1-based page, defaulting to the first.
    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    /// Centre and radius, only when all three are given.
    pub fn geo(&self) -> Option<(f64, f64, f64)> {
        match (self.latitude, self.longitude, self.radius) {
            (Some(lat), Some(lon), Some(radius)) => Some((lat, lon, radius)),
            _ => None,
        }
    }

    pub fn filter_set(&self) -> FilterSet {
        FilterSet::declare(&FILTER_FIELDS)
            .latitude("lat", self.latitude)
            .longitude("lon", self.longitude)
            .float("radius", self.radius)
            .text("status", self.status.map(EventStatus::as_str))
            .text("type", self.event_type.as_deref())
            .int("page", Some(i64::from(self.page())))
    }
}

pub struct EventsListing {
    ctx: Arc<ListingContext>,
    source: Arc<dyn EventsQuery>,
}

impl EventsListing {
    pub fn new(ctx: Arc<ListingContext>, source: Arc<dyn EventsQuery>) -> Self {
        Self { ctx, source }
    }

    pub fn cache_key(&self, filters: &EventFilters) -> Result<CacheKey, InvalidFilterError> {
        self.ctx.key(KIND, &filters.filter_set())
    }

    pub fn tags() -> Vec<Tag> {
        vec![Tag::events()]
    }

    pub async fn index(&self, filters: &EventFilters) -> Result<Listing, ListingError> {
        let key = self.cache_key(filters)?;
        self.ctx
            .read_through(KIND, &key, &Self::tags(), || self.source.list_events(filters))
            .await
    }
}

#[async_trait]
impl WarmTarget for EventsListing {
    fn resource(&self) -> &'static str {
        KIND.resource()
    }

    /// The unfiltered first page.
    async fn warm(&self) -> Result<WarmedEntry, WarmError> {
        let filters = EventFilters::default();
        let key = self.cache_key(&filters)?;
        self.ctx
            .refresh(KIND, key, &Self::tags(), || self.source.list_events(&filters))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::listings::test_support::{Counter, context};
    use crate::application::repos::SourceError;

    #[derive(Default)]
    struct FakeEvents(Counter);

    #[async_trait]
    impl EventsQuery for FakeEvents {
        async fn list_events(&self, _filters: &EventFilters) -> Result<Listing, SourceError> {
            Ok(self.0.next())
        }
    }

    fn listing() -> (Arc<FakeEvents>, EventsListing) {
        let source = Arc::new(FakeEvents::default());
        (source.clone(), EventsListing::new(context(), source))
    }

    #[test]
    fn page_defaults_to_one() {
        assert_eq!(EventFilters::default().page(), 1);
        let zero = EventFilters {
            page: Some(0),
            ..Default::default()
        };
        assert_eq!(zero.page(), 1);
    }

    #[test]
    fn geo_requires_all_three_parts() {
        let partial = EventFilters {
            latitude: Some(1.0),
            longitude: Some(2.0),
            ..Default::default()
        };
        assert_eq!(partial.geo(), None);

        let full = EventFilters {
            radius: Some(5.0),
            ..partial
        };
        assert_eq!(full.geo(), Some((1.0, 2.0, 5.0)));
    }

    #[test]
    fn explicit_first_page_shares_key_with_default() {
        let (_, listing) = listing();
        let explicit = EventFilters {
            page: Some(1),
            ..Default::default()
        };
        assert_eq!(
            listing.cache_key(&explicit).expect("key"),
            listing.cache_key(&EventFilters::default()).expect("key"),
        );
    }

    #[test]
    fn status_and_type_change_the_key() {
        let (_, listing) = listing();
        let base = listing.cache_key(&EventFilters::default()).expect("key");
        let upcoming = EventFilters {
            status: Some(EventStatus::Upcoming),
            ..Default::default()
        };
        let social = EventFilters {
            event_type: Some("social".to_string()),
            ..Default::default()
        };

        assert_ne!(listing.cache_key(&upcoming).expect("key"), base);
        assert_ne!(listing.cache_key(&social).expect("key"), base);
    }

    #[test]
    fn query_string_names_deserialize() {
        let filters: EventFilters = serde_json::from_value(serde_json::json!({
            "latitude": 40.7128,
            "longitude": -74.006,
            "radius": 10.0,
            "status": "upcoming",
            "type": "social",
            "page": 2
        }))
        .expect("decode");

        assert_eq!(filters.status, Some(EventStatus::Upcoming));
        assert_eq!(filters.event_type.as_deref(), Some("social"));
        assert_eq!(filters.page(), 2);
    }

    #[tokio::test]
    async fn invalid_coordinates_skip_the_source() {
        let (source, listing) = listing();
        let filters = EventFilters {
            latitude: Some(f64::NAN),
            ..Default::default()
        };

        let err = listing.index(&filters).await.expect_err("invalid filter");
        assert!(matches!(err, ListingError::InvalidFilter(_)));
        assert_eq!(source.0.calls(), 0);
    }

    #[tokio::test]
    async fn pages_are_cached_independently() {
        let (source, listing) = listing();
        let first_page = EventFilters::default();
        let second_page = EventFilters {
            page: Some(2),
            ..Default::default()
        };

        listing.index(&first_page).await.expect("page 1");
        listing.index(&second_page).await.expect("page 2");
        listing.index(&first_page).await.expect("page 1 again");

        assert_eq!(source.0.calls(), 2);
    }
}
