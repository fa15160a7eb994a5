//! Postgres-backed listing sources.

mod events;
mod groups;
mod util;

pub use util::map_sqlx_error;

use std::sync::Arc;

use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::application::repos::SourceError;

#[derive(Clone)]
pub struct PostgresListings {
    pool: Arc<PgPool>,
}

impl PostgresListings {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
        PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
    }

    fn convert_count(value: i64) -> Result<u64, SourceError> {
        value
            .try_into()
            .map_err(|_| SourceError::from_persistence("count exceeds supported range"))
    }
}
