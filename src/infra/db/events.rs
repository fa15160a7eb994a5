use async_trait::async_trait;
use serde_json::Value;
use sqlx::{Postgres, QueryBuilder, types::Json};

use crate::application::listings::Listing;
use crate::application::listings::events::{EVENTS_PER_PAGE, EventFilters};
use crate::application::repos::{EventsQuery, SourceError};

use super::{PostgresListings, map_sqlx_error};

const EARTH_RADIUS_KM: f64 = 6371.0;

impl PostgresListings {
    /// Pushes `FROM (..) e WHERE ..` shared by the page and count queries.
    fn push_event_scope(qb: &mut QueryBuilder<'_, Postgres>, filters: &EventFilters) {
        qb.push(
            " FROM (SELECT ev.*, \
             (SELECT COUNT(*) FROM event_attendees a WHERE a.event_id = ev.id) AS attendees_count",
        );

        if let Some((lat, lon, _)) = filters.geo() {
            qb.push(", (");
            qb.push_bind(EARTH_RADIUS_KM);
            qb.push(" * acos(LEAST(1.0, cos(radians(");
            qb.push_bind(lat);
            qb.push(")) * cos(radians(ev.latitude)) * cos(radians(ev.longitude) - radians(");
            qb.push_bind(lon);
            qb.push(")) + sin(radians(");
            qb.push_bind(lat);
            qb.push(")) * sin(radians(ev.latitude))))) AS distance");
        }

        qb.push(" FROM events ev) e WHERE 1=1 ");

        if let Some((_, _, radius)) = filters.geo() {
            qb.push(" AND e.distance < ");
            qb.push_bind(radius);
        }

        match filters.status {
            Some(status) => {
                qb.push(" AND e.status = ");
                qb.push_bind(status.as_str());
            }
            None => {
                qb.push(" AND e.status <> 'cancelled'");
            }
        }

        if let Some(event_type) = filters
            .event_type
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
        {
            qb.push(" AND e.type = ");
            qb.push_bind(event_type.to_string());
        }
    }
}

#[async_trait]
impl EventsQuery for PostgresListings {
    async fn list_events(&self, filters: &EventFilters) -> Result<Listing, SourceError> {
        let page = filters.page();
        let offset = i64::from(page - 1) * i64::from(EVENTS_PER_PAGE);

        let mut count_qb = QueryBuilder::new("SELECT COUNT(*)");
        Self::push_event_scope(&mut count_qb, filters);
        let total: i64 = count_qb
            .build_query_scalar()
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        let mut qb = QueryBuilder::new("SELECT to_jsonb(e)");
        Self::push_event_scope(&mut qb, filters);
        if filters.geo().is_some() {
            qb.push(" ORDER BY e.distance ASC, e.id ASC");
        } else {
            qb.push(" ORDER BY e.starts_at ASC, e.id ASC");
        }
        qb.push(" LIMIT ");
        qb.push_bind(i64::from(EVENTS_PER_PAGE));
        qb.push(" OFFSET ");
        qb.push_bind(offset);

        let rows: Vec<Json<Value>> = qb
            .build_query_scalar()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(Listing::paginated(
            rows.into_iter().map(|Json(row)| row).collect(),
            page,
            EVENTS_PER_PAGE,
            Self::convert_count(total)?,
        ))
    }
}
