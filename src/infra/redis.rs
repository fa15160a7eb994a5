//! Redis-backed [`TaggedStore`].
//!
//! Entries are plain string keys written with `SET .. EX`. Each tag is a
//! set of entry keys under `{prefix}tag:{tag}`; invalidation deletes the
//! members and then the set. A tag set outlives every entry it indexes, so
//! an entry can never be orphaned from its tag while still readable.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use deadpool_redis::redis::{self, AsyncCommands};
use deadpool_redis::{Config, Connection, Pool, Runtime};
use tracing::debug;

use crate::cache::{CacheKey, StoreError, Tag, TaggedStore};
use crate::config::RedisSettings;

use super::error::InfraError;

pub struct RedisStore {
    pool: Pool,
    prefix: String,
    tag_ttl: Duration,
}

impl RedisStore {
    pub fn new(pool: Pool, prefix: impl Into<String>, tag_ttl: Duration) -> Self {
        Self {
            pool,
            prefix: prefix.into(),
            tag_ttl,
        }
    }

    pub fn connect(settings: &RedisSettings) -> Result<Self, InfraError> {
        let url = settings
            .url
            .as_deref()
            .ok_or_else(|| InfraError::configuration("redis.url is required"))?;
        let pool = Config::from_url(url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|err| InfraError::redis(err.to_string()))?;
        Ok(Self::new(pool, settings.key_prefix.clone(), settings.tag_ttl))
    }

    fn entry_key(&self, key: &CacheKey) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn tag_key(&self, tag: &Tag) -> String {
        format!("{}tag:{}", self.prefix, tag)
    }

    async fn connection(&self) -> Result<Connection, StoreError> {
        self.pool
            .get()
            .await
            .map_err(|err| StoreError::unavailable(err.to_string()))
    }
}

fn command_error(err: redis::RedisError) -> StoreError {
    StoreError::unavailable(err.to_string())
}

#[async_trait]
impl TaggedStore for RedisStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>, StoreError> {
        let mut conn = self.connection().await?;
        let value: Option<Vec<u8>> = conn
            .get(self.entry_key(key))
            .await
            .map_err(command_error)?;
        Ok(value.map(Bytes::from))
    }

    async fn put(
        &self,
        key: &CacheKey,
        value: Bytes,
        ttl: Duration,
        tags: &[Tag],
    ) -> Result<(), StoreError> {
        let entry_key = self.entry_key(key);
        let ttl_secs = ttl.as_secs().max(1);
        let tag_ttl_secs = self.tag_ttl.as_secs().max(ttl_secs) as i64;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .set_ex(&entry_key, value.as_ref(), ttl_secs)
            .ignore();
        for tag in tags {
            let tag_key = self.tag_key(tag);
            pipe.sadd(&tag_key, &entry_key)
                .ignore()
                .expire(&tag_key, tag_ttl_secs)
                .ignore();
        }

        let mut conn = self.connection().await?;
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(command_error)
    }

    async fn invalidate_tag(&self, tag: &Tag) -> Result<u64, StoreError> {
        let tag_key = self.tag_key(tag);
        let mut conn = self.connection().await?;

        let members: Vec<String> = conn.smembers(&tag_key).await.map_err(command_error)?;
        let removed: u64 = if members.is_empty() {
            0
        } else {
            conn.del(&members).await.map_err(command_error)?
        };
        let _: () = conn.del(&tag_key).await.map_err(command_error)?;

        debug!(tag = %tag, removed, "Deleted tagged Redis entries");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheKeyBuilder, FilterSet};

    fn store() -> RedisStore {
        let pool = Config::from_url("redis://127.0.0.1:6379")
            .create_pool(Some(Runtime::Tokio1))
            .expect("pool config");
        RedisStore::new(pool, "lc:", Duration::from_secs(7_200))
    }

    #[tokio::test]
    async fn keys_are_prefixed() {
        let store = store();
        let key = CacheKeyBuilder::new("v1")
            .expect("schema version")
            .build("groups", "index", &FilterSet::new())
            .expect("key");

        assert!(store.entry_key(&key).starts_with("lc:v1:groups:index:"));
        assert_eq!(store.tag_key(&Tag::matches_feed(3)), "lc:tag:matches_feed:user_3");
    }

    #[test]
    fn connect_requires_url() {
        let settings = RedisSettings {
            url: None,
            key_prefix: "lc:".to_string(),
            tag_ttl: Duration::from_secs(7_200),
        };
        assert!(matches!(
            RedisStore::connect(&settings),
            Err(InfraError::Configuration { .. })
        ));
    }
}
