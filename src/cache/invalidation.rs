//! Domain change events and the tags they invalidate.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use super::keys::Tag;
use super::read_through::ReadThroughCache;
use super::store::StoreError;

/// A write elsewhere in the platform that makes cached listings stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationEvent {
    /// A group was created, updated, joined or left.
    GroupChanged,
    /// An event was created, updated or RSVP'd to.
    EventChanged,
    /// `user_id` liked or passed on a candidate.
    MatchAction { user_id: i64 },
    /// Two users matched each other.
    MatchFormed { user_a: i64, user_b: i64 },
    /// A proximity artifact was posted, flagged or removed.
    ArtifactChanged,
    /// A profile or its location changed.
    ProfileChanged { user_id: i64 },
}

impl InvalidationEvent {
    pub fn tags(&self) -> Vec<Tag> {
        match *self {
            Self::GroupChanged => vec![Tag::groups()],
            Self::EventChanged => vec![Tag::events()],
            Self::MatchAction { user_id } => vec![Tag::matches_feed(user_id)],
            Self::MatchFormed { user_a, user_b } => vec![
                Tag::matches_list(user_a),
                Tag::matches_list(user_b),
                Tag::matches_feed(user_a),
                Tag::matches_feed(user_b),
            ],
            Self::ArtifactChanged => vec![Tag::proximity()],
            Self::ProfileChanged { user_id } => vec![
                Tag::matches_feed(user_id),
                Tag::proximity_feed(user_id),
                Tag::recommendations(user_id),
            ],
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::GroupChanged => "group_changed",
            Self::EventChanged => "event_changed",
            Self::MatchAction { .. } => "match_action",
            Self::MatchFormed { .. } => "match_formed",
            Self::ArtifactChanged => "artifact_changed",
            Self::ProfileChanged { .. } => "profile_changed",
        }
    }
}

#[derive(Debug, Error)]
#[error("failed to invalidate {} tag(s): {}", .failed.len(), describe_failures(.failed))]
pub struct InvalidationError {
    pub failed: Vec<(Tag, StoreError)>,
}

fn describe_failures(failed: &[(Tag, StoreError)]) -> String {
    failed
        .iter()
        .map(|(tag, err)| format!("{tag} ({err})"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Entry point for write paths to invalidate cached listings.
#[derive(Clone)]
pub struct Invalidator {
    cache: Arc<ReadThroughCache>,
}

impl Invalidator {
    pub fn new(cache: Arc<ReadThroughCache>) -> Self {
        Self { cache }
    }

    /// Invalidate every tag affected by `event`.
    ///
    /// All tags are attempted even if some fail. Returns the number of
    /// entries removed.
    pub async fn apply(&self, event: InvalidationEvent) -> Result<u64, InvalidationError> {
        let mut removed = 0;
        let mut failed = Vec::new();

        for tag in event.tags() {
            match self.cache.invalidate_tag(&tag).await {
                Ok(count) => removed += count,
                Err(err) => {
                    warn!(event = event.name(), tag = %tag, error = %err, "Tag invalidation failed");
                    failed.push((tag, err));
                }
            }
        }

        if !failed.is_empty() {
            return Err(InvalidationError { failed });
        }

        info!(event = event.name(), removed, "Listing cache invalidated");
        Ok(removed)
    }

    /// Invalidate a single tag by name.
    pub async fn invalidate(&self, tag: &Tag) -> Result<u64, StoreError> {
        self.cache.invalidate_tag(tag).await
    }

    pub async fn group_changed(&self) -> Result<u64, InvalidationError> {
        self.apply(InvalidationEvent::GroupChanged).await
    }

    pub async fn event_changed(&self) -> Result<u64, InvalidationError> {
        self.apply(InvalidationEvent::EventChanged).await
    }

    pub async fn match_action(&self, user_id: i64) -> Result<u64, InvalidationError> {
        self.apply(InvalidationEvent::MatchAction { user_id }).await
    }

    pub async fn match_formed(&self, user_a: i64, user_b: i64) -> Result<u64, InvalidationError> {
        self.apply(InvalidationEvent::MatchFormed { user_a, user_b })
            .await
    }

    pub async fn artifact_changed(&self) -> Result<u64, InvalidationError> {
        self.apply(InvalidationEvent::ArtifactChanged).await
    }

    pub async fn profile_changed(&self, user_id: i64) -> Result<u64, InvalidationError> {
        self.apply(InvalidationEvent::ProfileChanged { user_id })
            .await
    }
}
