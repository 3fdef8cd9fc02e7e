//! Turns a map click into a stop-creation intent.

use tracing::info;

use crate::auth::AuthGate;
use crate::cache::LocalGraphCache;
use crate::model::network::{Stop, ValidationError};
use crate::repository::{NetworkRepository, RepositoryError};

#[derive(thiserror::Error, Debug)]
pub enum PlaceStopError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("you must be signed in to add stops")]
    NotSignedIn,

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Holds the staged stop name the next map click will use.
#[derive(Default)]
pub struct MapInteractionController {
    draft_name: String,
}

impl MapInteractionController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn draft_name(&self) -> &str {
        &self.draft_name
    }

    pub fn stage_name(&mut self, name: String) {
        self.draft_name = name;
    }

    /// Preconditions are checked in order: a staged name first, then an
    /// authenticated caller. Either failure aborts before any store call.
    /// On the store's confirmation the canonical record is appended to the
    /// cache; nothing is shown speculatively.
    pub async fn handle_click<R: NetworkRepository>(
        &mut self,
        auth: &AuthGate,
        repo: &R,
        cache: &mut LocalGraphCache,
        lat: f64,
        lng: f64,
    ) -> Result<Stop, PlaceStopError> {
        let name = self.draft_name.trim();
        if name.is_empty() {
            return Err(ValidationError::EmptyName.into());
        }
        if !auth.is_signed_in() {
            return Err(PlaceStopError::NotSignedIn);
        }
        if !(lat.is_finite() && lng.is_finite()) {
            return Err(ValidationError::NonFiniteCoordinate.into());
        }

        let stop = repo.create_stop(name, lat, lng).await?;
        info!("placed stop {} at ({lat}, {lng})", stop.name);

        cache.append_stop(stop.clone());
        self.draft_name.clear();

        Ok(stop)
    }
}

#[cfg(test)]
mod tests {
    use crate::auth::test_provider;
    use crate::repository::memory::MemoryRepository;

    use super::*;

    fn signed_in_gate() -> AuthGate {
        let gate = AuthGate::new();
        gate.set_session(Some(test_provider::session("admin@example.com")));
        gate
    }

    #[tokio::test]
    async fn click_without_staged_name_makes_no_store_call() {
        let repo = MemoryRepository::new();
        let mut cache = LocalGraphCache::new();
        let mut controller = MapInteractionController::new();

        let err = controller
            .handle_click(&signed_in_gate(), &repo, &mut cache, 5.0, -0.1)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PlaceStopError::Validation(ValidationError::EmptyName)
        ));
        assert_eq!(repo.calls(), 0);
        assert!(cache.stops().is_empty());
    }

    #[tokio::test]
    async fn name_precondition_is_checked_before_authentication() {
        let repo = MemoryRepository::new();
        let mut cache = LocalGraphCache::new();
        let mut controller = MapInteractionController::new();

        // signed out AND no name staged: the name message wins
        let err = controller
            .handle_click(&AuthGate::new(), &repo, &mut cache, 5.0, -0.1)
            .await
            .unwrap_err();
        assert!(matches!(err, PlaceStopError::Validation(_)));

        controller.stage_name("Circle Interchange".to_string());
        let err = controller
            .handle_click(&AuthGate::new(), &repo, &mut cache, 5.0, -0.1)
            .await
            .unwrap_err();
        assert!(matches!(err, PlaceStopError::NotSignedIn));
        assert_eq!(repo.calls(), 0);
    }

    #[tokio::test]
    async fn non_finite_coordinates_are_rejected() {
        let repo = MemoryRepository::new();
        let mut cache = LocalGraphCache::new();
        let mut controller = MapInteractionController::new();
        controller.stage_name("Kaneshie Market".to_string());

        let err = controller
            .handle_click(&signed_in_gate(), &repo, &mut cache, f64::NAN, -0.1)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PlaceStopError::Validation(ValidationError::NonFiniteCoordinate)
        ));
        assert_eq!(repo.calls(), 0);
    }

    #[tokio::test]
    async fn confirmed_creation_appends_canonical_record_and_clears_name() {
        let repo = MemoryRepository::new();
        let mut cache = LocalGraphCache::new();
        let mut controller = MapInteractionController::new();
        controller.stage_name("  Kaneshie Market  ".to_string());

        let stop = controller
            .handle_click(&signed_in_gate(), &repo, &mut cache, 5.0, -0.1)
            .await
            .unwrap();

        assert_eq!(stop.name, "Kaneshie Market");
        assert_eq!(cache.stops(), &[stop.clone()]);
        assert!(controller.draft_name().is_empty());

        // and the store agrees
        let listed = repo.list_stops().await.unwrap();
        assert_eq!(listed, vec![stop]);
    }
}
