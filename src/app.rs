//! Single-writer command dispatcher. Every user intent becomes a
//! [`Command`] sent over a channel to one task that owns the auth gate,
//! the cache, the drafts and the edit sessions, and performs
//! validate → store call → reconcile for each of them.

use tokio::sync::mpsc::Receiver;
use tokio::sync::{oneshot, watch};
use tracing::{info, warn};
use uuid::Uuid;

use crate::admin::EditSession;
use crate::auth::{AuthError, AuthGate, AuthProvider, Session};
use crate::cache::{GraphSnapshot, LocalGraphCache};
use crate::map_controller::{MapInteractionController, PlaceStopError};
use crate::model::network::{Route, RoutePatch, Stop, StopPatch, ValidationError};
use crate::repository::{NetworkRepository, RepositoryError};
use crate::route_builder::{RouteBuilder, RouteSubmitError};

#[derive(Debug)]
pub enum Command {
    SignIn { email: String, password: String },
    SignOut,
    /// Issued by the session refresher shortly before token expiry.
    RefreshSession,

    StageStopName { name: String },
    MapClick { lat: f64, lng: f64 },

    SetRouteFrom { stop_id: Uuid },
    SetRouteTo { stop_id: Uuid },
    SetRouteFare { fare: f64 },
    AddIntermediate { stop_id: Uuid },
    RemoveIntermediate { index: usize },
    SubmitRoute,

    SelectStopEdit { id: Uuid },
    SaveStopEdit { id: Uuid, name: String },
    CancelStopEdit,
    DeleteStop { id: Uuid },

    SelectRouteEdit { id: Uuid },
    SaveRouteEdit { id: Uuid, fare: f64 },
    CancelRouteEdit,
    DeleteRoute { id: Uuid },

    Refresh,
}

pub struct CommandEnvelope {
    pub command: Command,
    pub reply: oneshot::Sender<Result<(), AppError>>,
}

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("you must be signed in to do that")]
    NotSignedIn,

    #[error("no staged edit for that entry")]
    NothingStaged,

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("route {route_id} was created but its intermediate stops were not saved: {source}")]
    PartialCommit {
        route_id: Uuid,
        source: RepositoryError,
    },
}

impl From<RouteSubmitError> for AppError {
    fn from(e: RouteSubmitError) -> Self {
        match e {
            RouteSubmitError::Validation(e) => AppError::Validation(e),
            RouteSubmitError::Repository(e) => AppError::Repository(e),
            RouteSubmitError::PartialCommit { route_id, source } => {
                AppError::PartialCommit { route_id, source }
            }
        }
    }
}

impl From<PlaceStopError> for AppError {
    fn from(e: PlaceStopError) -> Self {
        match e {
            PlaceStopError::Validation(e) => AppError::Validation(e),
            PlaceStopError::NotSignedIn => AppError::NotSignedIn,
            PlaceStopError::Repository(e) => AppError::Repository(e),
        }
    }
}

pub struct AdminApp<R, A> {
    repo: R,
    provider: A,
    auth: AuthGate,
    cache: LocalGraphCache,
    map: MapInteractionController,
    route_builder: RouteBuilder,
    stop_edit: EditSession<Stop>,
    route_edit: EditSession<Route>,
}

impl<R: NetworkRepository, A: AuthProvider> AdminApp<R, A> {
    pub fn new(repo: R, provider: A) -> Self {
        Self {
            repo,
            provider,
            auth: AuthGate::new(),
            cache: LocalGraphCache::new(),
            map: MapInteractionController::new(),
            route_builder: RouteBuilder::new(),
            stop_edit: EditSession::new(),
            route_edit: EditSession::new(),
        }
    }

    pub fn graph(&self) -> watch::Receiver<GraphSnapshot> {
        self.cache.watch()
    }

    pub fn sessions(&self) -> watch::Receiver<Option<Session>> {
        self.auth.subscribe()
    }

    /// Initial load before serving: stops land first so route endpoint
    /// names resolve against a complete stop set.
    pub async fn load_initial(&mut self) -> Result<(), AppError> {
        self.resync().await?;
        info!(
            "loaded {} stops and {} routes",
            self.cache.stops().len(),
            self.cache.routes().len()
        );
        Ok(())
    }

    pub async fn run(mut self, mut commands: Receiver<CommandEnvelope>) {
        while let Some(envelope) = commands.recv().await {
            let result = self.handle(envelope.command).await;
            if let Err(e) = &result {
                warn!("command failed: {e}");
            }
            _ = envelope.reply.send(result);
        }

        info!("Channel closed");
    }

    async fn handle(&mut self, command: Command) -> Result<(), AppError> {
        match command {
            Command::SignIn { email, password } => {
                self.auth
                    .sign_in(&self.provider, &email, &password)
                    .await?;
                // membership visible to this principal may differ
                self.resync().await?;
                Ok(())
            }
            Command::SignOut => {
                self.auth.sign_out(&self.provider).await?;
                Ok(())
            }
            Command::RefreshSession => {
                let Some(session) = self.auth.session() else {
                    return Ok(());
                };
                let refreshed = self.provider.refresh(&session.refresh_token).await?;
                self.auth.set_session(Some(refreshed));
                Ok(())
            }

            Command::StageStopName { name } => {
                self.map.stage_name(name);
                Ok(())
            }
            Command::MapClick { lat, lng } => {
                self.map
                    .handle_click(&self.auth, &self.repo, &mut self.cache, lat, lng)
                    .await?;
                Ok(())
            }

            Command::SetRouteFrom { stop_id } => {
                self.route_builder.set_from(stop_id);
                Ok(())
            }
            Command::SetRouteTo { stop_id } => {
                self.route_builder.set_to(stop_id);
                Ok(())
            }
            Command::SetRouteFare { fare } => {
                self.route_builder.set_fare(fare);
                Ok(())
            }
            Command::AddIntermediate { stop_id } => {
                self.route_builder.add_intermediate(stop_id);
                Ok(())
            }
            Command::RemoveIntermediate { index } => {
                self.route_builder.remove_intermediate(index);
                Ok(())
            }
            Command::SubmitRoute => {
                self.require_signed_in()?;
                self.route_builder.submit(&self.repo).await?;
                self.resync().await?;
                Ok(())
            }

            Command::SelectStopEdit { id } => {
                let stop = self
                    .cache
                    .stops()
                    .iter()
                    .find(|s| s.id == id)
                    .cloned()
                    .ok_or(RepositoryError::NotFoundOrDenied)?;
                self.stop_edit.select(id, stop);
                Ok(())
            }
            Command::SaveStopEdit { id, name } => {
                if name.trim().is_empty() {
                    return Err(ValidationError::EmptyName.into());
                }
                // a save addressed to anything but the staged entry is a
                // stale or misdirected request
                if !self.stop_edit.is_editing(id) {
                    return Err(AppError::NothingStaged);
                }
                self.require_signed_in()?;

                let staged = self.stop_edit.staged_mut().expect("checked above");
                staged.name = name.trim().to_string();

                let (id, staged) = self.stop_edit.begin_submit().expect("state is Editing");
                let patch = StopPatch {
                    name: Some(staged.name),
                    lat: Some(staged.lat),
                    lng: Some(staged.lng),
                };

                let result = self.repo.update_stop(id, &patch).await;
                self.stop_edit.finish();

                // merge back only a non-empty confirmed result
                result?;
                self.resync().await?;
                Ok(())
            }
            Command::CancelStopEdit => {
                self.stop_edit.cancel();
                Ok(())
            }
            Command::DeleteStop { id } => {
                self.require_signed_in()?;
                self.repo.delete_stop(id).await?;
                // cascades can take routes with it, so resync both
                self.resync().await?;
                Ok(())
            }

            Command::SelectRouteEdit { id } => {
                let route = self
                    .cache
                    .routes()
                    .iter()
                    .find(|r| r.id == id)
                    .cloned()
                    .ok_or(RepositoryError::NotFoundOrDenied)?;
                self.route_edit.select(id, route);
                Ok(())
            }
            Command::SaveRouteEdit { id, fare } => {
                if !(fare.is_finite() && fare > 0.0) {
                    return Err(ValidationError::NonPositiveFare.into());
                }
                if !self.route_edit.is_editing(id) {
                    return Err(AppError::NothingStaged);
                }
                self.require_signed_in()?;

                self.route_edit.staged_mut().expect("checked above").fare = fare;

                let (id, staged) = self.route_edit.begin_submit().expect("state is Editing");
                let patch = RoutePatch {
                    fare: Some(staged.fare),
                };

                let result = self.repo.update_route(id, &patch).await;
                self.route_edit.finish();

                result?;
                self.resync().await?;
                Ok(())
            }
            Command::CancelRouteEdit => {
                self.route_edit.cancel();
                Ok(())
            }
            Command::DeleteRoute { id } => {
                self.require_signed_in()?;
                self.repo.delete_route(id).await?;
                self.resync().await?;
                Ok(())
            }

            Command::Refresh => {
                self.resync().await?;
                Ok(())
            }
        }
    }

    fn require_signed_in(&self) -> Result<(), AppError> {
        if self.auth.is_signed_in() {
            Ok(())
        } else {
            Err(AppError::NotSignedIn)
        }
    }

    /// Full reconciliation from the authoritative store. Stops are fetched
    /// and applied before routes so endpoint identifiers always resolve
    /// against the stop set they were read with.
    async fn resync(&mut self) -> Result<(), RepositoryError> {
        let stops = self.repo.list_stops().await?;
        let routes = self.repo.list_routes().await?;
        self.cache.replace_all(stops, routes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use tokio::sync::mpsc;

    use crate::auth::test_provider::StaticProvider;
    use crate::repository::memory::MemoryRepository;

    use super::*;

    async fn signed_in_app() -> AdminApp<MemoryRepository, StaticProvider> {
        let mut app = AdminApp::new(MemoryRepository::new(), StaticProvider::default());
        app.handle(Command::SignIn {
            email: "admin@example.com".to_string(),
            password: "correct horse".to_string(),
        })
        .await
        .unwrap();
        app
    }

    async fn place_stop(
        app: &mut AdminApp<MemoryRepository, StaticProvider>,
        name: &str,
        lat: f64,
        lng: f64,
    ) -> Stop {
        app.handle(Command::StageStopName {
            name: name.to_string(),
        })
        .await
        .unwrap();
        app.handle(Command::MapClick { lat, lng }).await.unwrap();
        app.cache.stops().last().cloned().unwrap()
    }

    #[tokio::test]
    async fn created_stop_shows_up_in_the_listed_stops() {
        let mut app = signed_in_app().await;
        place_stop(&mut app, "Kaneshie Market", 5.0, -0.1).await;

        let listed = app.repo.list_stops().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "Kaneshie Market");
        assert_eq!((listed[0].lat, listed[0].lng), (5.0, -0.1));

        // confirm-then-append: the cache holds the canonical record
        assert_eq!(app.cache.stops(), listed.as_slice());
    }

    #[tokio::test]
    async fn route_with_one_intermediate_commits_waypoint_at_rank_one() {
        let mut app = signed_in_app().await;
        let a = place_stop(&mut app, "A", 5.0, -0.1).await;
        let b = place_stop(&mut app, "B", 5.1, -0.2).await;
        let c = place_stop(&mut app, "C", 5.05, -0.15).await;

        app.handle(Command::SetRouteFrom { stop_id: a.id }).await.unwrap();
        app.handle(Command::SetRouteTo { stop_id: b.id }).await.unwrap();
        app.handle(Command::SetRouteFare { fare: 2.5 }).await.unwrap();
        app.handle(Command::AddIntermediate { stop_id: c.id }).await.unwrap();
        app.handle(Command::SubmitRoute).await.unwrap();

        // reconciled into the cache after the round trip
        assert_eq!(app.cache.routes().len(), 1);
        let route = &app.cache.routes()[0];
        assert_eq!(route.from_name, "A");
        assert_eq!(route.to_name, "B");
        assert_eq!(route.fare, 2.5);
        assert_eq!(route.waypoints.len(), 1);
        assert_eq!(route.waypoints[0].stop_id, c.id);
        assert_eq!(route.waypoints[0].rank, 1);
    }

    #[tokio::test]
    async fn submit_requires_sign_in() {
        let mut app = AdminApp::new(MemoryRepository::new(), StaticProvider::default());
        app.route_builder.set_from(Uuid::new_v4());
        app.route_builder.set_to(Uuid::new_v4());
        app.route_builder.set_fare(2.5);

        let err = app.handle(Command::SubmitRoute).await.unwrap_err();
        assert!(matches!(err, AppError::NotSignedIn));
        assert_eq!(app.repo.calls(), 0);
    }

    #[tokio::test]
    async fn partial_commit_is_surfaced_distinctly() {
        let mut app = signed_in_app().await;
        let a = place_stop(&mut app, "A", 5.0, -0.1).await;
        let b = place_stop(&mut app, "B", 5.1, -0.2).await;
        let c = place_stop(&mut app, "C", 5.05, -0.15).await;

        app.repo.fail_route_stop_insert.store(true, Ordering::SeqCst);

        app.handle(Command::SetRouteFrom { stop_id: a.id }).await.unwrap();
        app.handle(Command::SetRouteTo { stop_id: b.id }).await.unwrap();
        app.handle(Command::SetRouteFare { fare: 2.5 }).await.unwrap();
        app.handle(Command::AddIntermediate { stop_id: c.id }).await.unwrap();

        let err = app.handle(Command::SubmitRoute).await.unwrap_err();
        let AppError::PartialCommit { route_id, .. } = err else {
            panic!("expected PartialCommit, got {err:?}");
        };

        // the orphaned route is persisted with zero waypoints
        let routes = app.repo.list_routes().await.unwrap();
        let orphan = routes.iter().find(|r| r.id == route_id).unwrap();
        assert!(orphan.waypoints.is_empty());
    }

    #[tokio::test]
    async fn zero_row_update_leaves_cache_unchanged() {
        let mut app = signed_in_app().await;
        let stop = place_stop(&mut app, "High Street", 5.0, -0.1).await;
        app.handle(Command::Refresh).await.unwrap();

        app.handle(Command::SelectStopEdit { id: stop.id }).await.unwrap();
        // the entry disappears remotely while staged
        app.repo.delete_stop(stop.id).await.unwrap();
        let before_calls = app.repo.calls();

        let err = app
            .handle(Command::SaveStopEdit {
                id: stop.id,
                name: "High St".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Repository(RepositoryError::NotFoundOrDenied)
        ));

        // the failed save made exactly one store call and no resync
        assert_eq!(app.repo.calls(), before_calls + 1);
        // edit session surfaced the outcome and returned to Viewing
        assert_eq!(app.stop_edit, EditSession::Viewing);
        // cache still shows the stale entry until the next reconciliation
        assert!(app.cache.stops().iter().any(|s| s.id == stop.id));
    }

    #[tokio::test]
    async fn saved_stop_edit_is_merged_back_via_resync() {
        let mut app = signed_in_app().await;
        let stop = place_stop(&mut app, "High Street", 5.0, -0.1).await;

        app.handle(Command::SelectStopEdit { id: stop.id }).await.unwrap();
        app.handle(Command::SaveStopEdit {
            id: stop.id,
            name: "High Street Terminal".to_string(),
        })
        .await
        .unwrap();

        assert_eq!(app.stop_edit, EditSession::Viewing);
        assert_eq!(app.cache.stops()[0].name, "High Street Terminal");
    }

    #[tokio::test]
    async fn cancel_discards_edit_without_store_call() {
        let mut app = signed_in_app().await;
        let stop = place_stop(&mut app, "High Street", 5.0, -0.1).await;
        let calls = app.repo.calls();

        app.handle(Command::SelectStopEdit { id: stop.id }).await.unwrap();
        app.handle(Command::CancelStopEdit).await.unwrap();

        assert_eq!(app.repo.calls(), calls);
        assert_eq!(app.cache.stops()[0].name, "High Street");
    }

    #[tokio::test]
    async fn save_addressed_to_a_different_stop_is_rejected() {
        let mut app = signed_in_app().await;
        let first = place_stop(&mut app, "First", 5.0, -0.1).await;
        let second = place_stop(&mut app, "Second", 5.1, -0.2).await;

        app.handle(Command::SelectStopEdit { id: first.id }).await.unwrap();
        let calls = app.repo.calls();

        let err = app
            .handle(Command::SaveStopEdit {
                id: second.id,
                name: "Renamed".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NothingStaged));

        // no store call; neither entry changed and the staged edit for
        // the selected entry survives
        assert_eq!(app.repo.calls(), calls);
        assert!(app.stop_edit.is_editing(first.id));
        let names: Vec<_> = app.cache.stops().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["First", "Second"]);
    }

    #[tokio::test]
    async fn route_save_addressed_to_a_different_route_is_rejected() {
        let mut app = signed_in_app().await;
        let a = place_stop(&mut app, "A", 5.0, -0.1).await;
        let b = place_stop(&mut app, "B", 5.1, -0.2).await;

        app.handle(Command::SetRouteFrom { stop_id: a.id }).await.unwrap();
        app.handle(Command::SetRouteTo { stop_id: b.id }).await.unwrap();
        app.handle(Command::SetRouteFare { fare: 2.5 }).await.unwrap();
        app.handle(Command::SubmitRoute).await.unwrap();

        let route_id = app.cache.routes()[0].id;
        app.handle(Command::SelectRouteEdit { id: route_id }).await.unwrap();

        let err = app
            .handle(Command::SaveRouteEdit {
                id: Uuid::new_v4(),
                fare: 9.0,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NothingStaged));
        assert!(app.route_edit.is_editing(route_id));
        assert_eq!(app.cache.routes()[0].fare, 2.5);
    }

    #[tokio::test]
    async fn routes_are_listed_in_creation_order() {
        let mut app = signed_in_app().await;
        let a = place_stop(&mut app, "A", 5.0, -0.1).await;
        let b = place_stop(&mut app, "B", 5.1, -0.2).await;
        let c = place_stop(&mut app, "C", 5.2, -0.3).await;

        for (from, to) in [(a.id, b.id), (b.id, c.id), (c.id, a.id)] {
            app.handle(Command::SetRouteFrom { stop_id: from }).await.unwrap();
            app.handle(Command::SetRouteTo { stop_id: to }).await.unwrap();
            app.handle(Command::SetRouteFare { fare: 2.5 }).await.unwrap();
            app.handle(Command::SubmitRoute).await.unwrap();
        }

        // the admin "recent" view relies on the cache holding routes in
        // creation order, the same as stops
        let from_names: Vec<_> = app
            .cache
            .routes()
            .iter()
            .map(|r| r.from_name.as_str())
            .collect();
        assert_eq!(from_names, ["A", "B", "C"]);
    }

    #[tokio::test]
    async fn route_fare_edit_round_trips() {
        let mut app = signed_in_app().await;
        let a = place_stop(&mut app, "A", 5.0, -0.1).await;
        let b = place_stop(&mut app, "B", 5.1, -0.2).await;

        app.handle(Command::SetRouteFrom { stop_id: a.id }).await.unwrap();
        app.handle(Command::SetRouteTo { stop_id: b.id }).await.unwrap();
        app.handle(Command::SetRouteFare { fare: 2.5 }).await.unwrap();
        app.handle(Command::SubmitRoute).await.unwrap();

        let route_id = app.cache.routes()[0].id;
        app.handle(Command::SelectRouteEdit { id: route_id }).await.unwrap();

        let err = app
            .handle(Command::SaveRouteEdit {
                id: route_id,
                fare: 0.0,
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Validation(ValidationError::NonPositiveFare)
        ));

        app.handle(Command::SaveRouteEdit {
            id: route_id,
            fare: 3.0,
        })
        .await
        .unwrap();
        assert_eq!(app.cache.routes()[0].fare, 3.0);
    }

    #[tokio::test]
    async fn deleting_a_stop_invalidates_referencing_routes() {
        let mut app = signed_in_app().await;
        let a = place_stop(&mut app, "A", 5.0, -0.1).await;
        let b = place_stop(&mut app, "B", 5.1, -0.2).await;

        app.handle(Command::SetRouteFrom { stop_id: a.id }).await.unwrap();
        app.handle(Command::SetRouteTo { stop_id: b.id }).await.unwrap();
        app.handle(Command::SetRouteFare { fare: 2.5 }).await.unwrap();
        app.handle(Command::SubmitRoute).await.unwrap();
        assert_eq!(app.cache.routes().len(), 1);

        app.handle(Command::DeleteStop { id: a.id }).await.unwrap();

        assert!(app.cache.stops().iter().all(|s| s.id != a.id));
        assert!(app.cache.routes().is_empty());
    }

    #[tokio::test]
    async fn dispatcher_replies_over_the_envelope_channel() {
        let mut app = AdminApp::new(MemoryRepository::new(), StaticProvider::default());
        app.load_initial().await.unwrap();

        let (tx, rx) = mpsc::channel(8);
        let dispatcher = tokio::spawn(app.run(rx));

        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(CommandEnvelope {
            command: Command::SignIn {
                email: "admin@example.com".to_string(),
                password: "correct horse".to_string(),
            },
            reply: reply_tx,
        })
        .await
        .unwrap();
        reply_rx.await.unwrap().unwrap();

        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(CommandEnvelope {
            command: Command::MapClick { lat: 5.0, lng: -0.1 },
            reply: reply_tx,
        })
        .await
        .unwrap();
        let err = reply_rx.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            AppError::Validation(ValidationError::EmptyName)
        ));

        drop(tx);
        dispatcher.await.unwrap();
    }
}
