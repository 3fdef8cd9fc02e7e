//! Draft-route assembly and the two-step submission protocol.

use tracing::error;
use uuid::Uuid;

use crate::model::network::ValidationError;
use crate::repository::{NetworkRepository, RepositoryError};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RouteDraft {
    pub from_stop: Option<Uuid>,
    pub to_stop: Option<Uuid>,
    pub fare: f64,
    pub intermediates: Vec<Uuid>,
}

#[derive(thiserror::Error, Debug)]
pub enum RouteSubmitError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// The route row was persisted but its waypoint rows were not. The
    /// store is left inconsistent; there is no automatic compensation, so
    /// the orphaned route id is carried for manual correction.
    #[error("route {route_id} was created but its intermediate stops were not saved: {source}")]
    PartialCommit {
        route_id: Uuid,
        source: RepositoryError,
    },
}

struct ValidDraft<'a> {
    from_stop: Uuid,
    to_stop: Uuid,
    fare: f64,
    intermediates: &'a [Uuid],
}

#[derive(Default)]
pub struct RouteBuilder {
    draft: RouteDraft,
}

impl RouteBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn draft(&self) -> &RouteDraft {
        &self.draft
    }

    pub fn set_from(&mut self, stop_id: Uuid) {
        self.draft.from_stop = Some(stop_id);
    }

    pub fn set_to(&mut self, stop_id: Uuid) {
        self.draft.to_stop = Some(stop_id);
    }

    pub fn set_fare(&mut self, fare: f64) {
        self.draft.fare = fare;
    }

    pub fn add_intermediate(&mut self, stop_id: Uuid) {
        self.draft.intermediates.push(stop_id);
    }

    /// Out-of-range indices are ignored, matching remove controls that can
    /// race a concurrent edit of the list.
    pub fn remove_intermediate(&mut self, index: usize) {
        if index < self.draft.intermediates.len() {
            self.draft.intermediates.remove(index);
        }
    }

    fn validate(&self) -> Result<ValidDraft<'_>, ValidationError> {
        let from_stop = self.draft.from_stop.ok_or(ValidationError::MissingFrom)?;
        let to_stop = self.draft.to_stop.ok_or(ValidationError::MissingTo)?;

        if from_stop == to_stop {
            return Err(ValidationError::EqualEndpoints);
        }

        if !(self.draft.fare.is_finite() && self.draft.fare > 0.0) {
            return Err(ValidationError::NonPositiveFare);
        }

        for (idx, stop_id) in self.draft.intermediates.iter().enumerate() {
            if *stop_id == from_stop || *stop_id == to_stop {
                return Err(ValidationError::EndpointAsIntermediate);
            }
            if self.draft.intermediates[..idx].contains(stop_id) {
                return Err(ValidationError::DuplicateIntermediate);
            }
        }

        Ok(ValidDraft {
            from_stop,
            to_stop,
            fare: self.draft.fare,
            intermediates: &self.draft.intermediates,
        })
    }

    /// Two sequential store operations with no transaction between them:
    /// the route row first, then the ranked waypoint rows. A step-2 failure
    /// after step 1 succeeded leaves a persisted route with no waypoints
    /// and surfaces as `PartialCommit`. On full success the draft is
    /// cleared; the caller is expected to resynchronize the cache.
    pub async fn submit<R: NetworkRepository>(
        &mut self,
        repo: &R,
    ) -> Result<Uuid, RouteSubmitError> {
        let valid = self.validate()?;

        let route_id = repo
            .insert_route(valid.from_stop, valid.to_stop, valid.fare)
            .await?;

        if !valid.intermediates.is_empty() {
            if let Err(source) = repo.insert_route_stops(route_id, valid.intermediates).await {
                error!(%route_id, "route persisted without its waypoints, manual correction needed");
                return Err(RouteSubmitError::PartialCommit { route_id, source });
            }
        }

        self.draft = RouteDraft::default();

        Ok(route_id)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use crate::repository::memory::MemoryRepository;

    use super::*;

    fn builder_with(from: Uuid, to: Uuid, fare: f64) -> RouteBuilder {
        let mut builder = RouteBuilder::new();
        builder.set_from(from);
        builder.set_to(to);
        builder.set_fare(fare);
        builder
    }

    #[tokio::test]
    async fn equal_endpoints_rejected_before_any_store_call() {
        let repo = MemoryRepository::new();
        let stop = Uuid::new_v4();
        let mut builder = builder_with(stop, stop, 2.5);

        let err = builder.submit(&repo).await.unwrap_err();
        assert!(matches!(
            err,
            RouteSubmitError::Validation(ValidationError::EqualEndpoints)
        ));
        assert_eq!(repo.calls(), 0);
    }

    #[tokio::test]
    async fn non_positive_fare_rejected_before_any_store_call() {
        let repo = MemoryRepository::new();

        for fare in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let mut builder = builder_with(Uuid::new_v4(), Uuid::new_v4(), fare);
            let err = builder.submit(&repo).await.unwrap_err();
            assert!(matches!(
                err,
                RouteSubmitError::Validation(ValidationError::NonPositiveFare)
            ));
        }

        assert_eq!(repo.calls(), 0);
    }

    #[tokio::test]
    async fn missing_endpoints_rejected() {
        let repo = MemoryRepository::new();

        let mut builder = RouteBuilder::new();
        builder.set_fare(2.5);
        let err = builder.submit(&repo).await.unwrap_err();
        assert!(matches!(
            err,
            RouteSubmitError::Validation(ValidationError::MissingFrom)
        ));

        builder.set_from(Uuid::new_v4());
        let err = builder.submit(&repo).await.unwrap_err();
        assert!(matches!(
            err,
            RouteSubmitError::Validation(ValidationError::MissingTo)
        ));
    }

    #[tokio::test]
    async fn intermediates_must_not_repeat_endpoints_or_each_other() {
        let repo = MemoryRepository::new();
        let (from, to, via) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        let mut builder = builder_with(from, to, 2.5);
        builder.add_intermediate(from);
        let err = builder.submit(&repo).await.unwrap_err();
        assert!(matches!(
            err,
            RouteSubmitError::Validation(ValidationError::EndpointAsIntermediate)
        ));

        let mut builder = builder_with(from, to, 2.5);
        builder.add_intermediate(via);
        builder.add_intermediate(via);
        let err = builder.submit(&repo).await.unwrap_err();
        assert!(matches!(
            err,
            RouteSubmitError::Validation(ValidationError::DuplicateIntermediate)
        ));
    }

    #[tokio::test]
    async fn successful_submit_ranks_waypoints_in_input_order_and_clears_draft() {
        let repo = MemoryRepository::new();
        let (from, to) = (Uuid::new_v4(), Uuid::new_v4());
        let vias = [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];

        let mut builder = builder_with(from, to, 2.5);
        for via in vias {
            builder.add_intermediate(via);
        }

        let route_id = builder.submit(&repo).await.unwrap();
        assert_eq!(*builder.draft(), RouteDraft::default());

        let routes = repo.list_routes().await.unwrap();
        let route = routes.iter().find(|r| r.id == route_id).unwrap();
        assert_eq!(
            route
                .waypoints
                .iter()
                .map(|w| (w.stop_id, w.rank))
                .collect::<Vec<_>>(),
            vec![(vias[0], 1), (vias[1], 2), (vias[2], 3)]
        );
    }

    #[tokio::test]
    async fn waypoint_insert_failure_yields_partial_commit_with_orphaned_route() {
        let repo = MemoryRepository::new();
        repo.fail_route_stop_insert.store(true, Ordering::SeqCst);
        let (from, to) = (Uuid::new_v4(), Uuid::new_v4());

        let mut builder = builder_with(from, to, 2.5);
        builder.add_intermediate(Uuid::new_v4());

        let err = builder.submit(&repo).await.unwrap_err();
        let RouteSubmitError::PartialCommit { route_id, .. } = err else {
            panic!("expected PartialCommit, got {err:?}");
        };

        // the route row exists with zero waypoints, and the draft is kept
        // so the user can retry or correct
        let routes = repo.list_routes().await.unwrap();
        let route = routes.iter().find(|r| r.id == route_id).unwrap();
        assert!(route.waypoints.is_empty());
        assert!(builder.draft().from_stop.is_some());
    }

    #[tokio::test]
    async fn remove_intermediate_ignores_out_of_range_index() {
        let mut builder = RouteBuilder::new();
        let via = Uuid::new_v4();
        builder.add_intermediate(via);

        builder.remove_intermediate(5);
        assert_eq!(builder.draft().intermediates, vec![via]);

        builder.remove_intermediate(0);
        assert!(builder.draft().intermediates.is_empty());
    }
}
