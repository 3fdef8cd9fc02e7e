use itertools::Itertools;
use sqlx::prelude::FromRow;
use sqlx::{Pool, Postgres, QueryBuilder, query, query_as, query_scalar};
use tracing::{Instrument, info_span};
use uuid::Uuid;

use crate::model::network::{Route, RoutePatch, Waypoint};
use crate::repository::{RepositoryError, map_db_error};

#[derive(Debug, FromRow)]
struct RouteRow {
    id: Uuid,
    from_stop: Uuid,
    to_stop: Uuid,
    from_name: Option<String>,
    to_name: Option<String>,
    fare: f64,
}

#[derive(Debug, FromRow)]
struct RouteStopRow {
    route_id: Uuid,
    stop_id: Uuid,
    stop_order: i32,
}

impl RouteRow {
    /// An endpoint whose stop row is gone still renders as the raw
    /// identifier rather than dropping the route.
    fn into_route(self, waypoints: Vec<Waypoint>) -> Route {
        Route {
            id: self.id,
            from_stop: self.from_stop,
            to_stop: self.to_stop,
            from_name: self.from_name.unwrap_or_else(|| self.from_stop.to_string()),
            to_name: self.to_name.unwrap_or_else(|| self.to_stop.to_string()),
            fare: self.fare,
            waypoints,
        }
    }
}

/// Routes with endpoint names resolved through the stops join, plus their
/// waypoints ordered by rank.
#[tracing::instrument(err, skip(pool))]
pub async fn list_routes(pool: &Pool<Postgres>) -> Result<Vec<Route>, RepositoryError> {
    let rows: Vec<RouteRow> = query_as(
        "SELECT r.id, r.from_stop, r.to_stop, r.fare,
            f.name AS from_name,
            t.name AS to_name
        FROM routes r
        LEFT JOIN stops f ON f.id = r.from_stop
        LEFT JOIN stops t ON t.id = r.to_stop
        ORDER BY r.inserted_at",
    )
    .fetch_all(pool)
    .await
    .map_err(map_db_error)?;

    let stop_rows: Vec<RouteStopRow> = query_as(
        "SELECT route_id, stop_id, stop_order
        FROM route_stops
        ORDER BY route_id, stop_order",
    )
    .fetch_all(pool)
    .await
    .map_err(map_db_error)?;

    let mut waypoints = stop_rows
        .into_iter()
        .map(|row| {
            (
                row.route_id,
                Waypoint {
                    stop_id: row.stop_id,
                    rank: row.stop_order,
                },
            )
        })
        .into_group_map();

    let routes = rows
        .into_iter()
        .map(|row| {
            let stops = waypoints.remove(&row.id).unwrap_or_default();
            row.into_route(stops)
        })
        .collect_vec();

    Ok(routes)
}

#[tracing::instrument(err, skip(pool))]
pub async fn get_route(pool: &Pool<Postgres>, id: Uuid) -> Result<Route, RepositoryError> {
    let row: Option<RouteRow> = query_as(
        "SELECT r.id, r.from_stop, r.to_stop, r.fare,
            f.name AS from_name,
            t.name AS to_name
        FROM routes r
        LEFT JOIN stops f ON f.id = r.from_stop
        LEFT JOIN stops t ON t.id = r.to_stop
        WHERE r.id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .map_err(map_db_error)?;

    let row = row.ok_or(RepositoryError::NotFoundOrDenied)?;

    let stops: Vec<RouteStopRow> = query_as(
        "SELECT route_id, stop_id, stop_order
        FROM route_stops
        WHERE route_id = $1
        ORDER BY stop_order",
    )
    .bind(id)
    .fetch_all(pool)
    .await
    .map_err(map_db_error)?;

    let waypoints = stops
        .into_iter()
        .map(|row| Waypoint {
            stop_id: row.stop_id,
            rank: row.stop_order,
        })
        .collect_vec();

    Ok(row.into_route(waypoints))
}

/// First step of route creation: the route row alone. The waypoint rows go
/// in separately via [`insert_route_stops`]; there is no transaction
/// spanning the two steps.
#[tracing::instrument(err, skip(pool))]
pub async fn insert_route(
    pool: &Pool<Postgres>,
    from_stop: Uuid,
    to_stop: Uuid,
    fare: f64,
) -> Result<Uuid, RepositoryError> {
    let id: Uuid = query_scalar(
        "INSERT INTO routes (from_stop, to_stop, fare)
        VALUES ($1, $2, $3)
        RETURNING id",
    )
    .bind(from_stop)
    .bind(to_stop)
    .bind(fare)
    .fetch_one(pool)
    .instrument(info_span!("Inserting route"))
    .await
    .map_err(map_db_error)?;

    Ok(id)
}

/// Batch-inserts the ordered waypoint rows for a route, ranked 1..N in
/// list order, in a single statement.
#[tracing::instrument(err, skip(pool, stop_ids))]
pub async fn insert_route_stops(
    pool: &Pool<Postgres>,
    route_id: Uuid,
    stop_ids: &[Uuid],
) -> Result<(), RepositoryError> {
    if stop_ids.is_empty() {
        return Ok(());
    }

    let mut query_builder = QueryBuilder::new(
        "INSERT INTO route_stops (
            route_id,
            stop_id,
            stop_order
        )",
    );

    query_builder.push_values(stop_ids.iter().enumerate(), |mut b, (idx, stop_id)| {
        b.push_bind(route_id)
            .push_bind(stop_id)
            .push_bind(idx as i32 + 1);
    });

    query_builder
        .build()
        .execute(pool)
        .instrument(info_span!("Inserting route stops"))
        .await
        .map_err(map_db_error)?;

    Ok(())
}

#[tracing::instrument(err, skip(pool))]
pub async fn update_route(
    pool: &Pool<Postgres>,
    id: Uuid,
    patch: &RoutePatch,
) -> Result<Route, RepositoryError> {
    let updated: Option<Uuid> = query_scalar(
        "UPDATE routes
        SET fare = COALESCE($2, fare)
        WHERE id = $1
        RETURNING id",
    )
    .bind(id)
    .bind(patch.fare)
    .fetch_optional(pool)
    .await
    .map_err(map_db_error)?;

    match updated {
        Some(id) => get_route(pool, id).await,
        None => Err(RepositoryError::NotFoundOrDenied),
    }
}

#[tracing::instrument(err, skip(pool))]
pub async fn delete_route(pool: &Pool<Postgres>, id: Uuid) -> Result<(), RepositoryError> {
    query("DELETE FROM routes WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .map_err(map_db_error)?;

    Ok(())
}
