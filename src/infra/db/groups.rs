use async_trait::async_trait;
use serde_json::Value;
use sqlx::types::Json;

use crate::application::listings::Listing;
use crate::application::repos::{GroupsQuery, SourceError};

use super::{PostgresListings, map_sqlx_error};

const PUBLIC_GROUPS_SQL: &str = "SELECT to_jsonb(g) || jsonb_build_object(\
         'active_members_count', \
         (SELECT COUNT(*) FROM group_members gm \
          WHERE gm.group_id = g.id AND gm.is_active)) \
     FROM groups g \
     WHERE g.is_active \
       AND (g.privacy = 'public' OR g.visibility = 'visible') \
     ORDER BY g.created_at DESC";

#[async_trait]
impl GroupsQuery for PostgresListings {
    async fn list_public_groups(&self) -> Result<Listing, SourceError> {
        let rows: Vec<Json<Value>> = sqlx::query_scalar(PUBLIC_GROUPS_SQL)
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(Listing::unpaginated(
            rows.into_iter().map(|Json(row)| row).collect(),
        ))
    }
}
