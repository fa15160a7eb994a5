//! Listing cache core.
//!
//! Deterministic keys, tagged storage and read-through access for the
//! expensive listing endpoints.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! schema_version = "v1"
//! store_timeout_ms = 250
//! backend = "memory"
//!
//! [ttl]
//! groups = 600
//! events = 300
//! # ... see config.rs for all options
//! ```

mod config;
mod invalidation;
mod keys;
mod lock;
mod read_through;
mod registry;
mod store;

pub use config::{CacheConfig, DEFAULT_SCHEMA_VERSION, TtlPolicy};
pub use invalidation::{InvalidationError, InvalidationEvent, Invalidator};
pub use keys::{
    CacheKey, CacheKeyBuilder, FilterSet, FilterValue, InvalidFilterError, ListingKind, Tag,
    round_coordinate,
};
pub use read_through::ReadThroughCache;
pub use registry::TagRegistry;
pub use store::{MemoryStore, StoreError, TaggedStore};
