//! Cache key construction.
//!
//! Every cached listing lives under
//! `{schema_version}:{resource}:{operation}:{fingerprint}` where the
//! fingerprint is the first 128 bits of a SHA-256 digest over the canonical
//! JSON encoding of the normalized filters. Normalization runs before
//! hashing so that logically identical requests share one key:
//!
//! - absent filters are explicit `null`,
//! - coordinates are rounded to three decimal places (about 110 m),
//! - lists are sorted and de-duplicated,
//! - empty strings are treated as absent.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Bytes of the SHA-256 digest kept in the key.
const FINGERPRINT_BYTES: usize = 16;
const COORDINATE_SCALE: f64 = 1_000.0;
const SEGMENT_SEPARATOR: char = ':';

#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvalidFilterError {
    #[error("filter `{name}` must be a finite number")]
    NonFinite { name: String },
    #[error("filter `{name}` is out of range: {value} is not within [{min}, {max}]")]
    OutOfRange {
        name: String,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("filter `{name}` is required")]
    Missing { name: String },
    #[error("key segment `{segment}` is invalid: {reason}")]
    Segment {
        segment: String,
        reason: &'static str,
    },
    #[error("filters could not be encoded: {reason}")]
    Encoding { reason: String },
}

impl InvalidFilterError {
    pub fn out_of_range(name: &str, value: f64, min: f64, max: f64) -> Self {
        Self::OutOfRange {
            name: name.to_string(),
            value,
            min,
            max,
        }
    }

    pub fn missing(name: &str) -> Self {
        Self::Missing {
            name: name.to_string(),
        }
    }
}

/// A single filter value before normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Latitude(f64),
    Longitude(f64),
    List(Vec<String>),
}

impl FilterValue {
    fn canonical(&self, name: &str) -> Result<Value, InvalidFilterError> {
        let value = match self {
            Self::Null => Value::Null,
            Self::Bool(flag) => Value::Bool(*flag),
            Self::Int(number) => Value::from(*number),
            Self::Float(number) => Value::from(fold_zero(finite(name, *number)?)),
            Self::Text(text) => match text.trim() {
                "" => Value::Null,
                trimmed => Value::String(trimmed.to_string()),
            },
            Self::Latitude(degrees) => coordinate(name, *degrees, 90.0)?,
            Self::Longitude(degrees) => coordinate(name, *degrees, 180.0)?,
            Self::List(items) => {
                let mut items: Vec<&str> = items
                    .iter()
                    .map(|item| item.trim())
                    .filter(|item| !item.is_empty())
                    .collect();
                items.sort_unstable();
                items.dedup();
                Value::Array(items.into_iter().map(Value::from).collect())
            }
        };
        Ok(value)
    }
}

fn finite(name: &str, value: f64) -> Result<f64, InvalidFilterError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(InvalidFilterError::NonFinite {
            name: name.to_string(),
        })
    }
}

fn fold_zero(value: f64) -> f64 {
    if value == 0.0 { 0.0 } else { value }
}

fn coordinate(name: &str, degrees: f64, bound: f64) -> Result<Value, InvalidFilterError> {
    let degrees = finite(name, degrees)?;
    if !(-bound..=bound).contains(&degrees) {
        return Err(InvalidFilterError::out_of_range(name, degrees, -bound, bound));
    }
    Ok(Value::from(round_coordinate(degrees)))
}

/// Round a coordinate to three decimal places, folding `-0.0` into `0.0`.
pub fn round_coordinate(degrees: f64) -> f64 {
    fold_zero((degrees * COORDINATE_SCALE).round() / COORDINATE_SCALE)
}

/// Named filter values for one listing request.
///
/// Setters take `Option`s: `None` is recorded as an explicit null so that an
/// omitted parameter and a parameter defaulted to null hash identically.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterSet {
    entries: BTreeMap<String, FilterValue>,
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a fixed list of fields, all set to null.
    pub fn declare(fields: &[&str]) -> Self {
        let entries = fields
            .iter()
            .map(|field| (field.to_string(), FilterValue::Null))
            .collect();
        Self { entries }
    }

    pub fn insert(&mut self, name: &str, value: FilterValue) {
        self.entries.insert(name.to_string(), value);
    }

    pub fn with(mut self, name: &str, value: FilterValue) -> Self {
        self.insert(name, value);
        self
    }

    pub fn int(self, name: &str, value: Option<i64>) -> Self {
        self.with(name, value.map_or(FilterValue::Null, FilterValue::Int))
    }

    pub fn float(self, name: &str, value: Option<f64>) -> Self {
        self.with(name, value.map_or(FilterValue::Null, FilterValue::Float))
    }

    pub fn flag(self, name: &str, value: Option<bool>) -> Self {
        self.with(name, value.map_or(FilterValue::Null, FilterValue::Bool))
    }

    pub fn text(self, name: &str, value: Option<&str>) -> Self {
        self.with(
            name,
            value.map_or(FilterValue::Null, |text| FilterValue::Text(text.to_string())),
        )
    }

    pub fn latitude(self, name: &str, value: Option<f64>) -> Self {
        self.with(name, value.map_or(FilterValue::Null, FilterValue::Latitude))
    }

    pub fn longitude(self, name: &str, value: Option<f64>) -> Self {
        self.with(name, value.map_or(FilterValue::Null, FilterValue::Longitude))
    }

    pub fn list<I, S>(self, name: &str, values: Option<I>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let value = match values {
            Some(values) => FilterValue::List(values.into_iter().map(Into::into).collect()),
            None => FilterValue::Null,
        };
        self.with(name, value)
    }

    pub fn get(&self, name: &str) -> Option<&FilterValue> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Canonical JSON bytes of the normalized filters.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, InvalidFilterError> {
        let mut normalized = BTreeMap::new();
        for (name, value) in &self.entries {
            normalized.insert(name.as_str(), value.canonical(name)?);
        }
        // BTreeMap keys serialize in sorted order.
        serde_json::to_vec(&normalized).map_err(|err| InvalidFilterError::Encoding {
            reason: err.to_string(),
        })
    }
}

/// A fully built cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// The trailing hex fingerprint.
    pub fn fingerprint(&self) -> &str {
        self.0
            .rsplit_once(SEGMENT_SEPARATOR)
            .map_or(self.0.as_str(), |(_, fingerprint)| fingerprint)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The cached listings and their `(resource, operation)` pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListingKind {
    GroupsIndex,
    EventsIndex,
    MatchFeed,
    EstablishedMatches,
    ProximityFeed,
    Recommendations,
}

impl ListingKind {
    pub const ALL: [ListingKind; 6] = [
        Self::GroupsIndex,
        Self::EventsIndex,
        Self::MatchFeed,
        Self::EstablishedMatches,
        Self::ProximityFeed,
        Self::Recommendations,
    ];

    pub fn resource(self) -> &'static str {
        match self {
            Self::GroupsIndex => "groups",
            Self::EventsIndex => "events",
            Self::MatchFeed | Self::EstablishedMatches => "matches",
            Self::ProximityFeed => "proximity",
            Self::Recommendations => "recommendations",
        }
    }

    pub fn operation(self) -> &'static str {
        match self {
            Self::GroupsIndex | Self::EventsIndex | Self::Recommendations => "index",
            Self::MatchFeed => "feed",
            Self::EstablishedMatches => "established",
            Self::ProximityFeed => "local_pulse",
        }
    }
}

/// Builds keys for one schema version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKeyBuilder {
    schema_version: String,
}

impl CacheKeyBuilder {
    pub fn new(schema_version: impl Into<String>) -> Result<Self, InvalidFilterError> {
        let schema_version = schema_version.into();
        validate_segment(&schema_version)?;
        Ok(Self { schema_version })
    }

    pub fn schema_version(&self) -> &str {
        &self.schema_version
    }

    pub fn build(
        &self,
        resource: &str,
        operation: &str,
        filters: &FilterSet,
    ) -> Result<CacheKey, InvalidFilterError> {
        validate_segment(resource)?;
        validate_segment(operation)?;

        let canonical = filters.canonical_bytes()?;
        let digest = Sha256::digest(&canonical);
        let fingerprint = hex::encode(&digest[..FINGERPRINT_BYTES]);

        Ok(CacheKey(format!(
            "{}:{resource}:{operation}:{fingerprint}",
            self.schema_version
        )))
    }

    pub fn build_for(
        &self,
        kind: ListingKind,
        filters: &FilterSet,
    ) -> Result<CacheKey, InvalidFilterError> {
        self.build(kind.resource(), kind.operation(), filters)
    }
}

fn validate_segment(segment: &str) -> Result<(), InvalidFilterError> {
    let reason = if segment.is_empty() {
        "must not be empty"
    } else if segment.contains(SEGMENT_SEPARATOR) {
        "must not contain ':'"
    } else if segment.chars().any(char::is_whitespace) {
        "must not contain whitespace"
    } else {
        return Ok(());
    };

    Err(InvalidFilterError::Segment {
        segment: segment.to_string(),
        reason,
    })
}

/// Invalidation label attached to cache entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(String);

impl Tag {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn groups() -> Self {
        Self::new("groups")
    }

    pub fn events() -> Self {
        Self::new("events")
    }

    pub fn proximity() -> Self {
        Self::new("proximity")
    }

    pub fn matches_feed(user_id: i64) -> Self {
        Self(format!("matches_feed:user_{user_id}"))
    }

    pub fn matches_list(user_id: i64) -> Self {
        Self(format!("matches_list:user_{user_id}"))
    }

    pub fn proximity_feed(user_id: i64) -> Self {
        Self(format!("proximity_feed:user_{user_id}"))
    }

    pub fn recommendations(user_id: i64) -> Self {
        Self(format!("recommendations:user_{user_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
