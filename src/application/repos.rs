//! Query traits describing the listing sources behind the cache.
//!
//! Each trait is the expensive computation a listing handler wraps. The
//! handlers never look inside the returned [`Listing`].

use async_trait::async_trait;
use thiserror::Error;

use crate::application::listings::Listing;
use crate::application::listings::events::EventFilters;
use crate::application::listings::matches::MatchFeedFilters;
use crate::application::listings::proximity::ProximityFilters;
use crate::application::listings::recommendations::RecommendationFilters;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("upstream service unavailable: {0}")]
    Unavailable(String),
    #[error("listing query timed out")]
    Timeout,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
}

impl SourceError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }
}

#[async_trait]
pub trait GroupsQuery: Send + Sync {
    /// Groups that are public or explicitly visible, with member counts.
    async fn list_public_groups(&self) -> Result<Listing, SourceError>;
}

#[async_trait]
pub trait EventsQuery: Send + Sync {
    /// One page of events, at most [`EVENTS_PER_PAGE`](crate::application::listings::events::EVENTS_PER_PAGE) rows.
    async fn list_events(&self, filters: &EventFilters) -> Result<Listing, SourceError>;
}

#[async_trait]
pub trait MatchFeedQuery: Send + Sync {
    async fn match_feed(
        &self,
        user_id: i64,
        filters: &MatchFeedFilters,
    ) -> Result<Listing, SourceError>;
}

#[async_trait]
pub trait EstablishedMatchesQuery: Send + Sync {
    async fn established_matches(&self, user_id: i64) -> Result<Listing, SourceError>;
}

#[async_trait]
pub trait ProximityQuery: Send + Sync {
    async fn local_pulse(
        &self,
        user_id: i64,
        filters: &ProximityFilters,
    ) -> Result<Listing, SourceError>;
}

#[async_trait]
pub trait RecommendationsQuery: Send + Sync {
    async fn recommendations(
        &self,
        user_id: i64,
        filters: &RecommendationFilters,
    ) -> Result<Listing, SourceError>;
}
