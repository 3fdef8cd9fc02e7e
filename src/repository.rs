use sqlx::{Pool, Postgres};
use uuid::Uuid;

use crate::dal;
use crate::model::network::{Route, RoutePatch, Stop, StopPatch};

/// Store outcomes past client-side validation. `NotFoundOrDenied` is a
/// single recoverable class: under row-level policies a zero-row write is
/// genuinely ambiguous between "does not exist" and "access denied".
#[derive(thiserror::Error, Debug)]
pub enum RepositoryError {
    #[error("the store rejected the operation for this account")]
    Unauthorized,
    #[error("no matching record, or the access policy denied the change")]
    NotFoundOrDenied,
    #[error("remote store failure: {0}")]
    Remote(#[from] sqlx::Error),
}

/// Postgres reports policy denials as SQLSTATE 42501; everything else is a
/// transport/backend failure.
pub(crate) fn map_db_error(e: sqlx::Error) -> RepositoryError {
    if let sqlx::Error::Database(db) = &e {
        if db.code().as_deref() == Some("42501") {
            return RepositoryError::Unauthorized;
        }
    }

    RepositoryError::Remote(e)
}

/// The authoritative remote store. The production implementation is
/// [`PgNetworkRepository`]; tests swap in an in-memory fake.
///
/// `insert_route` and `insert_route_stops` are deliberately two separate
/// operations with no transaction between them, mirroring the store's
/// capabilities: route creation is a two-step protocol owned by the
/// route builder.
#[allow(async_fn_in_trait)]
pub trait NetworkRepository: Send + Sync {
    async fn list_stops(&self) -> Result<Vec<Stop>, RepositoryError>;
    async fn create_stop(&self, name: &str, lat: f64, lng: f64) -> Result<Stop, RepositoryError>;
    async fn update_stop(&self, id: Uuid, patch: &StopPatch) -> Result<Stop, RepositoryError>;
    async fn delete_stop(&self, id: Uuid) -> Result<(), RepositoryError>;

    async fn list_routes(&self) -> Result<Vec<Route>, RepositoryError>;
    async fn insert_route(
        &self,
        from_stop: Uuid,
        to_stop: Uuid,
        fare: f64,
    ) -> Result<Uuid, RepositoryError>;
    async fn insert_route_stops(
        &self,
        route_id: Uuid,
        stop_ids: &[Uuid],
    ) -> Result<(), RepositoryError>;
    async fn update_route(&self, id: Uuid, patch: &RoutePatch) -> Result<Route, RepositoryError>;
    async fn delete_route(&self, id: Uuid) -> Result<(), RepositoryError>;
}

#[derive(Clone)]
pub struct PgNetworkRepository {
    pool: Pool<Postgres>,
}

impl PgNetworkRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

impl NetworkRepository for PgNetworkRepository {
    async fn list_stops(&self) -> Result<Vec<Stop>, RepositoryError> {
        dal::list_stops(&self.pool).await
    }

    async fn create_stop(&self, name: &str, lat: f64, lng: f64) -> Result<Stop, RepositoryError> {
        dal::insert_stop(&self.pool, name, lat, lng).await
    }

    async fn update_stop(&self, id: Uuid, patch: &StopPatch) -> Result<Stop, RepositoryError> {
        dal::update_stop(&self.pool, id, patch).await
    }

    async fn delete_stop(&self, id: Uuid) -> Result<(), RepositoryError> {
        dal::delete_stop(&self.pool, id).await
    }

    async fn list_routes(&self) -> Result<Vec<Route>, RepositoryError> {
        dal::list_routes(&self.pool).await
    }

    async fn insert_route(
        &self,
        from_stop: Uuid,
        to_stop: Uuid,
        fare: f64,
    ) -> Result<Uuid, RepositoryError> {
        dal::insert_route(&self.pool, from_stop, to_stop, fare).await
    }

    async fn insert_route_stops(
        &self,
        route_id: Uuid,
        stop_ids: &[Uuid],
    ) -> Result<(), RepositoryError> {
        dal::insert_route_stops(&self.pool, route_id, stop_ids).await
    }

    async fn update_route(&self, id: Uuid, patch: &RoutePatch) -> Result<Route, RepositoryError> {
        dal::update_route(&self.pool, id, patch).await
    }

    async fn delete_route(&self, id: Uuid) -> Result<(), RepositoryError> {
        dal::delete_route(&self.pool, id).await
    }
}
