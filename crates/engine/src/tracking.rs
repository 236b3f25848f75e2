//! Involved-elements tracking
//!
//! Folds the events recorded by a session into one state per element, then
//! freezes the set of elements constraint validation has to look at.
//!
//! | Sequence | Result |
//! |----------|--------|
//! | add | `Added` |
//! | add, remove | forgotten |
//! | remove, add | `Updated` |
//! | property change | owner `Updated` (unless added or removed) |

use hyperstore_core::{Event, EventKind, Identity};
use serde::Serialize;
use std::collections::BTreeMap;

/// What happened to an element during the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TrackingState {
    /// Created in this session
    Added,
    /// Existed before and was changed
    Updated,
    /// Existed before and was removed
    Removed,
}

/// An element touched by the session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackedElement {
    /// Element identity
    pub id: Identity,
    /// Schema of the element
    pub schema: Identity,
    /// Domain the change was applied to
    pub domain: String,
    /// Net change
    pub state: TrackingState,
}

/// Per-session tracking collector
#[derive(Debug, Default)]
pub struct SessionTrackingData {
    elements: BTreeMap<Identity, TrackedElement>,
    involved: Option<Vec<TrackedElement>>,
}

impl SessionTrackingData {
    /// Create an empty collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event into the element states
    pub fn on_event(&mut self, event: &Event) {
        match &event.kind {
            EventKind::EntityAdded { id, schema } | EventKind::RelationshipAdded { id, schema, .. } => {
                let state = match self.elements.get(id).map(|e| e.state) {
                    None => TrackingState::Added,
                    Some(TrackingState::Removed) => TrackingState::Updated,
                    Some(state) => state,
                };
                self.set(id, schema, &event.domain, state);
            }
            EventKind::EntityRemoved { id, schema } | EventKind::RelationshipRemoved { id, schema, .. } => {
                match self.elements.get(id).map(|e| e.state) {
                    Some(TrackingState::Added) => {
                        self.elements.remove(id);
                    }
                    _ => self.set(id, schema, &event.domain, TrackingState::Removed),
                }
            }
            EventKind::PropertyChanged { owner, schema, .. } => {
                if !self.elements.contains_key(owner) {
                    self.set(owner, schema, &event.domain, TrackingState::Updated);
                }
            }
        }
    }

    fn set(&mut self, id: &Identity, schema: &Identity, domain: &str, state: TrackingState) {
        self.elements.insert(
            id.clone(),
            TrackedElement {
                id: id.clone(),
                schema: schema.clone(),
                domain: domain.to_string(),
                state,
            },
        );
    }

    /// Freeze the involved-elements set
    ///
    /// The set is empty when the session is aborted or loading schema, and
    /// never contains removed elements. Only the first call computes it.
    /// Returns true when there is at least one involved element.
    pub fn prepare_model_elements(&mut self, aborted: bool, loading_schema: bool) -> bool {
        let elements = &self.elements;
        let involved = self.involved.get_or_insert_with(|| {
            if aborted || loading_schema {
                return Vec::new();
            }
            elements
                .values()
                .filter(|e| e.state != TrackingState::Removed)
                .cloned()
                .collect()
        });
        !involved.is_empty()
    }

    /// Frozen involved elements; empty until prepared
    pub fn involved_elements(&self) -> &[TrackedElement] {
        self.involved.as_deref().unwrap_or(&[])
    }

    /// Every tracked element, removed ones included
    pub fn involved(&self) -> impl Iterator<Item = &TrackedElement> {
        self.elements.values()
    }

    /// Net state of one element
    pub fn element_state(&self, id: &Identity) -> Option<TrackingState> {
        self.elements.get(id).map(|e| e.state)
    }

    /// Number of tracked elements
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// True when nothing was tracked
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyperstore_core::SessionId;
    use serde_json::json;

    fn id(key: &str) -> Identity {
        Identity::new("hr", key)
    }

    fn schema() -> Identity {
        Identity::new("hr", "Employee")
    }

    fn event(kind: EventKind) -> Event {
        Event::new("hr", SessionId(1), kind)
    }

    fn added(key: &str) -> Event {
        event(EventKind::EntityAdded {
            id: id(key),
            schema: schema(),
        })
    }

    fn removed(key: &str) -> Event {
        event(EventKind::EntityRemoved {
            id: id(key),
            schema: schema(),
        })
    }

    fn changed(key: &str) -> Event {
        event(EventKind::PropertyChanged {
            owner: id(key),
            schema: schema(),
            property: "name".into(),
            value: Some(json!("x")),
            old_value: None,
        })
    }

    // ===== State Folding Tests =====

    #[test]
    fn test_add_then_remove_forgets() {
        let mut tracking = SessionTrackingData::new();
        tracking.on_event(&added("e1"));
        tracking.on_event(&changed("e1"));
        assert_eq!(tracking.element_state(&id("e1")), Some(TrackingState::Added));

        tracking.on_event(&removed("e1"));
        assert_eq!(tracking.element_state(&id("e1")), None);
        assert!(tracking.is_empty());
    }

    #[test]
    fn test_remove_then_add_is_update() {
        let mut tracking = SessionTrackingData::new();
        tracking.on_event(&removed("e1"));
        assert_eq!(tracking.element_state(&id("e1")), Some(TrackingState::Removed));
        tracking.on_event(&added("e1"));
        assert_eq!(tracking.element_state(&id("e1")), Some(TrackingState::Updated));
    }

    #[test]
    fn test_property_change_marks_owner_updated() {
        let mut tracking = SessionTrackingData::new();
        tracking.on_event(&changed("e1"));
        assert_eq!(tracking.element_state(&id("e1")), Some(TrackingState::Updated));

        tracking.on_event(&removed("e2"));
        tracking.on_event(&changed("e2"));
        assert_eq!(tracking.element_state(&id("e2")), Some(TrackingState::Removed));
    }

    // ===== Involved Set Tests =====

    #[test]
    fn test_involved_excludes_removed() {
        let mut tracking = SessionTrackingData::new();
        tracking.on_event(&added("e2"));
        tracking.on_event(&changed("e1"));
        tracking.on_event(&removed("e3"));

        assert!(tracking.involved_elements().is_empty());
        assert!(tracking.prepare_model_elements(false, false));

        let keys: Vec<&str> = tracking.involved_elements().iter().map(|e| e.id.key()).collect();
        assert_eq!(keys, vec!["e1", "e2"]);
        assert_eq!(tracking.involved().count(), 3);
    }

    #[test]
    fn test_involved_empty_when_aborted_or_loading_schema() {
        let mut tracking = SessionTrackingData::new();
        tracking.on_event(&added("e1"));
        assert!(!tracking.prepare_model_elements(true, false));
        assert!(tracking.involved_elements().is_empty());

        let mut tracking = SessionTrackingData::new();
        tracking.on_event(&added("e1"));
        assert!(!tracking.prepare_model_elements(false, true));
    }

    #[test]
    fn test_prepare_only_once() {
        let mut tracking = SessionTrackingData::new();
        tracking.on_event(&added("e1"));
        assert!(tracking.prepare_model_elements(false, false));

        tracking.on_event(&added("e2"));
        assert!(tracking.prepare_model_elements(true, false));
        assert_eq!(tracking.involved_elements().len(), 1);
    }
}
