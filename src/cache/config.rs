//! Cache configuration.
//!
//! Controls key versioning, store timeouts, memory capacity and the per
//! listing TTLs via the `[cache]` and `[ttl]` sections of
//! `listing-cache.toml`.

use std::num::NonZeroUsize;
use std::time::Duration;

use super::keys::ListingKind;

pub const DEFAULT_SCHEMA_VERSION: &str = "v1";
const DEFAULT_STORE_TIMEOUT_MS: u64 = 250;
const DEFAULT_MEMORY_CAPACITY: usize = 10_000;

const DEFAULT_GROUPS_TTL_SECS: u64 = 600;
const DEFAULT_EVENTS_TTL_SECS: u64 = 300;
const DEFAULT_MATCHES_FEED_TTL_SECS: u64 = 300;
const DEFAULT_MATCHES_ESTABLISHED_TTL_SECS: u64 = 60;
const DEFAULT_PROXIMITY_TTL_SECS: u64 = 300;
const DEFAULT_RECOMMENDATIONS_TTL_SECS: u64 = 3_600;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Leading key segment; bumping it orphans every existing entry.
    pub schema_version: String,
    /// Upper bound on any single store call.
    pub store_timeout_ms: u64,
    /// Maximum entries held by the in-process store.
    pub memory_capacity: usize,
    pub ttl: TtlPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            schema_version: DEFAULT_SCHEMA_VERSION.to_string(),
            store_timeout_ms: DEFAULT_STORE_TIMEOUT_MS,
            memory_capacity: DEFAULT_MEMORY_CAPACITY,
            ttl: TtlPolicy::default(),
        }
    }
}

impl From<&crate::config::Settings> for CacheConfig {
    fn from(settings: &crate::config::Settings) -> Self {
        Self {
            schema_version: settings.cache.schema_version.clone(),
            store_timeout_ms: settings.cache.store_timeout.as_millis() as u64,
            memory_capacity: settings.cache.memory_capacity.get(),
            ttl: settings.ttl.clone(),
        }
    }
}

impl CacheConfig {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// Returns the memory capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn memory_capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.memory_capacity).unwrap_or(NonZeroUsize::MIN)
    }
}

/// Per-listing time-to-live, in seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TtlPolicy {
    pub groups: u64,
    pub events: u64,
    pub matches_feed: u64,
    pub matches_established: u64,
    pub proximity: u64,
    pub recommendations: u64,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            groups: DEFAULT_GROUPS_TTL_SECS,
            events: DEFAULT_EVENTS_TTL_SECS,
            matches_feed: DEFAULT_MATCHES_FEED_TTL_SECS,
            matches_established: DEFAULT_MATCHES_ESTABLISHED_TTL_SECS,
            proximity: DEFAULT_PROXIMITY_TTL_SECS,
            recommendations: DEFAULT_RECOMMENDATIONS_TTL_SECS,
        }
    }
}

impl TtlPolicy {
    pub fn secs_for(&self, kind: ListingKind) -> u64 {
        match kind {
            ListingKind::GroupsIndex => self.groups,
            ListingKind::EventsIndex => self.events,
            ListingKind::MatchFeed => self.matches_feed,
            ListingKind::EstablishedMatches => self.matches_established,
            ListingKind::ProximityFeed => self.proximity,
            ListingKind::Recommendations => self.recommendations,
        }
    }

    pub fn for_kind(&self, kind: ListingKind) -> Duration {
        Duration::from_secs(self.secs_for(kind))
    }

    /// The longest configured TTL.
    pub fn max_secs(&self) -> u64 {
        ListingKind::ALL
            .iter()
            .map(|kind| self.secs_for(*kind))
            .max()
            .unwrap_or_default()
    }

    /// Returns the first listing whose TTL is zero, if any.
    pub fn first_zero(&self) -> Option<ListingKind> {
        ListingKind::ALL
            .into_iter()
            .find(|kind| self.secs_for(*kind) == 0)
    }
}
