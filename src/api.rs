//! Thin HTTP surface over the command dispatcher. Handlers translate
//! requests into commands or read the latest published snapshot; no
//! business rules live here.

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::Sender;
use tokio::sync::{oneshot, watch};
use uuid::Uuid;

use crate::admin;
use crate::app::{AppError, Command, CommandEnvelope};
use crate::auth::Session;
use crate::cache::GraphSnapshot;
use crate::model::network::{Route, Stop};
use crate::repository::RepositoryError;

#[derive(Clone)]
pub struct ApiState {
    pub commands: Sender<CommandEnvelope>,
    pub graph: watch::Receiver<GraphSnapshot>,
    pub sessions: watch::Receiver<Option<Session>>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route(
            "/session",
            get(current_session).post(sign_in).delete(sign_out),
        )
        .route("/stops", get(list_stops))
        .route("/routes", get(list_routes).post(submit_route))
        .route("/stop-draft", put(stage_stop_name))
        .route("/map-click", post(map_click))
        .route("/route-draft", put(set_route_draft))
        .route("/route-draft/intermediates", post(add_intermediate))
        .route(
            "/route-draft/intermediates/{index}",
            axum::routing::delete(remove_intermediate),
        )
        .route("/admin/stops", get(search_stops))
        .route("/admin/routes", get(search_routes))
        .route(
            "/admin/stops/{id}",
            post(select_stop_edit).delete(delete_stop),
        )
        .route("/admin/stops/{id}/save", post(save_stop_edit))
        .route("/admin/stops/cancel", post(cancel_stop_edit))
        .route(
            "/admin/routes/{id}",
            post(select_route_edit).delete(delete_route),
        )
        .route("/admin/routes/{id}/save", post(save_route_edit))
        .route("/admin/routes/cancel", post(cancel_route_edit))
        .with_state(state)
}

enum ApiError {
    App(AppError),
    Unavailable,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "the service is shutting down".to_string(),
            )
                .into_response(),
            ApiError::App(e) => {
                let status = match &e {
                    AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
                    AppError::NothingStaged => StatusCode::CONFLICT,
                    AppError::NotSignedIn | AppError::Auth(_) => StatusCode::UNAUTHORIZED,
                    AppError::Repository(RepositoryError::NotFoundOrDenied) => {
                        StatusCode::NOT_FOUND
                    }
                    AppError::Repository(RepositoryError::Unauthorized) => StatusCode::FORBIDDEN,
                    AppError::Repository(RepositoryError::Remote(_)) => StatusCode::BAD_GATEWAY,
                    AppError::PartialCommit { .. } => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, e.to_string()).into_response()
            }
        }
    }
}

async fn dispatch(state: &ApiState, command: Command) -> Result<(), ApiError> {
    let (reply, result) = oneshot::channel();
    state
        .commands
        .send(CommandEnvelope { command, reply })
        .await
        .map_err(|_| ApiError::Unavailable)?;

    result
        .await
        .map_err(|_| ApiError::Unavailable)?
        .map_err(ApiError::App)
}

#[derive(Serialize)]
struct SessionView {
    email: String,
}

async fn current_session(State(state): State<ApiState>) -> axum::Json<Option<SessionView>> {
    let view = state
        .sessions
        .borrow()
        .as_ref()
        .map(|s| SessionView {
            email: s.email.clone(),
        });
    axum::Json(view)
}

#[derive(Deserialize)]
struct Credentials {
    email: String,
    password: String,
}

async fn sign_in(
    State(state): State<ApiState>,
    axum::Json(credentials): axum::Json<Credentials>,
) -> Result<StatusCode, ApiError> {
    dispatch(
        &state,
        Command::SignIn {
            email: credentials.email,
            password: credentials.password,
        },
    )
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn sign_out(State(state): State<ApiState>) -> Result<StatusCode, ApiError> {
    dispatch(&state, Command::SignOut).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_stops(State(state): State<ApiState>) -> axum::Json<Vec<Stop>> {
    axum::Json(state.graph.borrow().stops.clone())
}

async fn list_routes(State(state): State<ApiState>) -> axum::Json<Vec<Route>> {
    axum::Json(state.graph.borrow().routes.clone())
}

#[derive(Deserialize)]
struct StopDraft {
    name: String,
}

async fn stage_stop_name(
    State(state): State<ApiState>,
    axum::Json(draft): axum::Json<StopDraft>,
) -> Result<StatusCode, ApiError> {
    dispatch(&state, Command::StageStopName { name: draft.name }).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct MapClick {
    lat: f64,
    lng: f64,
}

async fn map_click(
    State(state): State<ApiState>,
    axum::Json(click): axum::Json<MapClick>,
) -> Result<StatusCode, ApiError> {
    dispatch(
        &state,
        Command::MapClick {
            lat: click.lat,
            lng: click.lng,
        },
    )
    .await?;
    Ok(StatusCode::CREATED)
}

#[derive(Deserialize)]
struct RouteDraftUpdate {
    from_stop: Option<Uuid>,
    to_stop: Option<Uuid>,
    fare: Option<f64>,
}

async fn set_route_draft(
    State(state): State<ApiState>,
    axum::Json(update): axum::Json<RouteDraftUpdate>,
) -> Result<StatusCode, ApiError> {
    if let Some(stop_id) = update.from_stop {
        dispatch(&state, Command::SetRouteFrom { stop_id }).await?;
    }
    if let Some(stop_id) = update.to_stop {
        dispatch(&state, Command::SetRouteTo { stop_id }).await?;
    }
    if let Some(fare) = update.fare {
        dispatch(&state, Command::SetRouteFare { fare }).await?;
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct IntermediateStop {
    stop_id: Uuid,
}

async fn add_intermediate(
    State(state): State<ApiState>,
    axum::Json(body): axum::Json<IntermediateStop>,
) -> Result<StatusCode, ApiError> {
    dispatch(
        &state,
        Command::AddIntermediate {
            stop_id: body.stop_id,
        },
    )
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn remove_intermediate(
    State(state): State<ApiState>,
    Path(index): Path<usize>,
) -> Result<StatusCode, ApiError> {
    dispatch(&state, Command::RemoveIntermediate { index }).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn submit_route(State(state): State<ApiState>) -> Result<StatusCode, ApiError> {
    dispatch(&state, Command::SubmitRoute).await?;
    Ok(StatusCode::CREATED)
}

#[derive(Deserialize)]
struct Search {
    #[serde(default)]
    q: String,
}

async fn search_stops(
    State(state): State<ApiState>,
    Query(search): Query<Search>,
) -> axum::Json<Vec<Stop>> {
    let snapshot = state.graph.borrow().clone();
    let filtered = admin::filter_stops(&snapshot.stops, &search.q)
        .into_iter()
        .cloned()
        .collect();
    axum::Json(filtered)
}

async fn search_routes(
    State(state): State<ApiState>,
    Query(search): Query<Search>,
) -> axum::Json<Vec<Route>> {
    let snapshot = state.graph.borrow().clone();
    let filtered = admin::filter_routes(&snapshot.routes, &search.q)
        .into_iter()
        .cloned()
        .collect();
    axum::Json(filtered)
}

async fn select_stop_edit(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    dispatch(&state, Command::SelectStopEdit { id }).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct StopEdit {
    name: String,
}

async fn save_stop_edit(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    axum::Json(edit): axum::Json<StopEdit>,
) -> Result<StatusCode, ApiError> {
    dispatch(
        &state,
        Command::SaveStopEdit {
            id,
            name: edit.name,
        },
    )
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn cancel_stop_edit(State(state): State<ApiState>) -> Result<StatusCode, ApiError> {
    dispatch(&state, Command::CancelStopEdit).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_stop(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    dispatch(&state, Command::DeleteStop { id }).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn select_route_edit(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    dispatch(&state, Command::SelectRouteEdit { id }).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct RouteEdit {
    fare: f64,
}

async fn save_route_edit(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    axum::Json(edit): axum::Json<RouteEdit>,
) -> Result<StatusCode, ApiError> {
    dispatch(
        &state,
        Command::SaveRouteEdit {
            id,
            fare: edit.fare,
        },
    )
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn cancel_route_edit(State(state): State<ApiState>) -> Result<StatusCode, ApiError> {
    dispatch(&state, Command::CancelRouteEdit).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_route(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    dispatch(&state, Command::DeleteRoute { id }).await?;
    Ok(StatusCode::NO_CONTENT)
}
