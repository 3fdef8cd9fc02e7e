//! Local mirror of the network graph. The remote store is the sole source
//! of truth; this cache holds the last-reconciled copy used for rendering
//! and editing, and publishes immutable snapshots so reads never block on
//! in-flight writes.

use serde::Serialize;
use tokio::sync::watch;

use crate::model::network::{Route, Stop};

#[derive(Clone, Debug, Default, Serialize)]
pub struct GraphSnapshot {
    pub stops: Vec<Stop>,
    pub routes: Vec<Route>,
}

pub struct LocalGraphCache {
    stops: Vec<Stop>,
    routes: Vec<Route>,
    snapshot: watch::Sender<GraphSnapshot>,
}

impl LocalGraphCache {
    pub fn new() -> Self {
        Self {
            stops: vec![],
            routes: vec![],
            snapshot: watch::Sender::new(GraphSnapshot::default()),
        }
    }

    pub fn watch(&self) -> watch::Receiver<GraphSnapshot> {
        self.snapshot.subscribe()
    }

    pub fn stops(&self) -> &[Stop] {
        &self.stops
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Full resynchronization from a fresh store read. Used after every
    /// round trip that changes membership; replacing wholesale instead of
    /// patching keeps the mirror from drifting against itself.
    pub fn replace_all(&mut self, stops: Vec<Stop>, routes: Vec<Route>) {
        self.stops = stops;
        self.routes = routes;
        self.publish();
    }

    /// Appends a stop the store has already confirmed and returned in
    /// canonical form. Never called speculatively.
    pub fn append_stop(&mut self, stop: Stop) {
        self.stops.push(stop);
        self.publish();
    }

    fn publish(&self) {
        self.snapshot.send_replace(GraphSnapshot {
            stops: self.stops.clone(),
            routes: self.routes.clone(),
        });
    }
}

impl Default for LocalGraphCache {
    fn default() -> Self {
        Self::new()
    }
}
