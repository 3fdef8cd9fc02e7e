use sqlx::{Pool, Postgres, query, query_as};
use tracing::{Instrument, info_span};
use uuid::Uuid;

use crate::model::network::{Stop, StopPatch};
use crate::repository::{RepositoryError, map_db_error};

/// Stops in creation order, so the map and the admin "recent" view agree
/// with the order the store assigned.
#[tracing::instrument(err, skip(pool))]
pub async fn list_stops(pool: &Pool<Postgres>) -> Result<Vec<Stop>, RepositoryError> {
    let stops = query_as::<_, Stop>(
        "SELECT id, name, lat, lng
        FROM stops
        ORDER BY inserted_at ASC",
    )
    .fetch_all(pool)
    .await
    .map_err(map_db_error)?;

    Ok(stops)
}

#[tracing::instrument(err, skip(pool))]
pub async fn insert_stop(
    pool: &Pool<Postgres>,
    name: &str,
    lat: f64,
    lng: f64,
) -> Result<Stop, RepositoryError> {
    let stop = query_as::<_, Stop>(
        "INSERT INTO stops (name, lat, lng)
        VALUES ($1, $2, $3)
        RETURNING id, name, lat, lng",
    )
    .bind(name)
    .bind(lat)
    .bind(lng)
    .fetch_one(pool)
    .instrument(info_span!("Inserting stop"))
    .await
    .map_err(map_db_error)?;

    Ok(stop)
}

/// Zero matched rows is ambiguous between "no such stop" and "denied by the
/// store's row policy"; both come back as `NotFoundOrDenied`.
#[tracing::instrument(err, skip(pool))]
pub async fn update_stop(
    pool: &Pool<Postgres>,
    id: Uuid,
    patch: &StopPatch,
) -> Result<Stop, RepositoryError> {
    let updated = query_as::<_, Stop>(
        "UPDATE stops
        SET name = COALESCE($2, name),
            lat = COALESCE($3, lat),
            lng = COALESCE($4, lng)
        WHERE id = $1
        RETURNING id, name, lat, lng",
    )
    .bind(id)
    .bind(patch.name.as_deref())
    .bind(patch.lat)
    .bind(patch.lng)
    .fetch_optional(pool)
    .await
    .map_err(map_db_error)?;

    updated.ok_or(RepositoryError::NotFoundOrDenied)
}

/// Idempotent; deleting an absent stop is success. Referencing routes and
/// waypoints go with it via the FK cascade.
#[tracing::instrument(err, skip(pool))]
pub async fn delete_stop(pool: &Pool<Postgres>, id: Uuid) -> Result<(), RepositoryError> {
    query("DELETE FROM stops WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .map_err(map_db_error)?;

    Ok(())
}
