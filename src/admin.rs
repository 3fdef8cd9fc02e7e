//! Admin-panel filtering and the per-entry inline-edit state machine.

use uuid::Uuid;

use crate::model::network::{Route, Stop};

/// With an empty query the panel shows a "recent" view of the first
/// entries in cache order.
pub const RECENT_LIMIT: usize = 10;

pub fn filter_stops<'a>(stops: &'a [Stop], query: &str) -> Vec<&'a Stop> {
    if query.is_empty() {
        return stops.iter().take(RECENT_LIMIT).collect();
    }

    let query = query.to_lowercase();
    stops
        .iter()
        .filter(|s| s.name.to_lowercase().contains(&query))
        .collect()
}

/// Routes match on either resolved endpoint name. No ranking; cache order
/// is preserved.
pub fn filter_routes<'a>(routes: &'a [Route], query: &str) -> Vec<&'a Route> {
    if query.is_empty() {
        return routes.iter().take(RECENT_LIMIT).collect();
    }

    let query = query.to_lowercase();
    routes
        .iter()
        .filter(|r| {
            r.from_name.to_lowercase().contains(&query)
                || r.to_name.to_lowercase().contains(&query)
        })
        .collect()
}

/// Inline-edit lifecycle for one entry kind:
/// `Viewing → Editing (select) → { Viewing (cancel), Submitting (save) →
/// Viewing (after the outcome is surfaced) }`.
///
/// Selecting stages a mutable copy; cancel discards it without a store
/// call. The staged copy is only merged back through a full cache
/// resynchronization after the store confirms the update.
#[derive(Clone, Debug, PartialEq)]
pub enum EditSession<T> {
    Viewing,
    Editing { id: Uuid, staged: T },
    Submitting { id: Uuid, staged: T },
}

impl<T: Clone> EditSession<T> {
    pub fn new() -> Self {
        EditSession::Viewing
    }

    /// Selecting while another entry is being edited replaces the staged
    /// copy, the same as cancelling first.
    pub fn select(&mut self, id: Uuid, staged: T) {
        *self = EditSession::Editing { id, staged };
    }

    pub fn cancel(&mut self) {
        *self = EditSession::Viewing;
    }

    pub fn staged_mut(&mut self) -> Option<&mut T> {
        match self {
            EditSession::Editing { staged, .. } => Some(staged),
            _ => None,
        }
    }

    /// Moves `Editing → Submitting` and hands out the staged copy for the
    /// repository call. Returns `None` from any other state.
    pub fn begin_submit(&mut self) -> Option<(Uuid, T)> {
        match self {
            EditSession::Editing { id, staged } => {
                let (id, staged) = (*id, staged.clone());
                *self = EditSession::Submitting {
                    id,
                    staged: staged.clone(),
                };
                Some((id, staged))
            }
            _ => None,
        }
    }

    /// Back to `Viewing` once the submission outcome has been surfaced,
    /// success or failure alike.
    pub fn finish(&mut self) {
        *self = EditSession::Viewing;
    }

    pub fn is_editing(&self, entry: Uuid) -> bool {
        matches!(self, EditSession::Editing { id, .. } if *id == entry)
    }
}

impl<T: Clone> Default for EditSession<T> {
    fn default() -> Self {
        Self::new()
    }
}
