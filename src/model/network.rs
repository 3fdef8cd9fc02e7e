use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;
use uuid::Uuid;

/// A named geographic point in the network. Identity is assigned by the
/// store on creation; only `name` and the coordinates are mutable.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Stop {
    pub id: Uuid,
    pub name: String,
    pub lat: f64,
    pub lng: f64,
}

/// A priced connection between two stops. `from_name`/`to_name` carry the
/// resolved endpoint names for display; when an endpoint cannot be resolved
/// they hold the raw identifier instead of the route being dropped.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub id: Uuid,
    pub from_stop: Uuid,
    pub to_stop: Uuid,
    pub from_name: String,
    pub to_name: String,
    pub fare: f64,
    pub waypoints: Vec<Waypoint>,
}

/// A stop a route passes through between its endpoints. Ranks for one route
/// are dense and 1-based, in travel order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub stop_id: Uuid,
    pub rank: i32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StopPatch {
    pub name: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

/// Endpoints are fixed at creation; re-routing means deleting and
/// rebuilding, so only the fare is patchable.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RoutePatch {
    pub fare: Option<f64>,
}

/// Bad input detectable before any store call. Surfaced inline and fully
/// recoverable; submission is blocked while one of these holds.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("please enter a stop name first")]
    EmptyName,
    #[error("coordinates must be finite numbers")]
    NonFiniteCoordinate,
    #[error("please select a 'From' stop")]
    MissingFrom,
    #[error("please select a 'To' stop")]
    MissingTo,
    #[error("'From' and 'To' must be different stops")]
    EqualEndpoints,
    #[error("please enter a fare greater than 0")]
    NonPositiveFare,
    #[error("an intermediate stop cannot repeat a route endpoint")]
    EndpointAsIntermediate,
    #[error("intermediate stops must be distinct")]
    DuplicateIntermediate,
}
