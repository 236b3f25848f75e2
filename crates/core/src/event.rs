//! Graph events
//!
//! Every mutation applied by a domain is recorded in the session as an
//! [`Event`]. Events drive the involved-elements tracking and are delivered to
//! event notifiers as they happen and again, as a batch, when the session
//! completes.

use crate::identity::Identity;
use crate::types::SessionId;
use serde::{Deserialize, Serialize};

/// What happened to the graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventKind {
    /// An entity was created
    EntityAdded {
        /// New entity
        id: Identity,
        /// Schema of the entity
        schema: Identity,
    },
    /// An entity was removed
    EntityRemoved {
        /// Removed entity
        id: Identity,
        /// Schema of the entity
        schema: Identity,
    },
    /// A relationship was created
    RelationshipAdded {
        /// New relationship
        id: Identity,
        /// Schema of the relationship
        schema: Identity,
        /// Source element
        start: Identity,
        /// Target element
        end: Identity,
    },
    /// A relationship was removed
    RelationshipRemoved {
        /// Removed relationship
        id: Identity,
        /// Schema of the relationship
        schema: Identity,
        /// Source element
        start: Identity,
        /// Target element
        end: Identity,
    },
    /// A property value was set or cleared
    PropertyChanged {
        /// Element owning the property
        owner: Identity,
        /// Schema of the owner
        schema: Identity,
        /// Property name
        property: String,
        /// New value, `None` when cleared
        value: Option<serde_json::Value>,
        /// Previous value, `None` when unset
        old_value: Option<serde_json::Value>,
    },
}

impl EventKind {
    /// Element the event is about (the owner for property changes)
    pub fn element(&self) -> &Identity {
        match self {
            EventKind::EntityAdded { id, .. }
            | EventKind::EntityRemoved { id, .. }
            | EventKind::RelationshipAdded { id, .. }
            | EventKind::RelationshipRemoved { id, .. } => id,
            EventKind::PropertyChanged { owner, .. } => owner,
        }
    }

    /// Schema identity of the element the event is about
    pub fn schema(&self) -> &Identity {
        match self {
            EventKind::EntityAdded { schema, .. }
            | EventKind::EntityRemoved { schema, .. }
            | EventKind::RelationshipAdded { schema, .. }
            | EventKind::RelationshipRemoved { schema, .. }
            | EventKind::PropertyChanged { schema, .. } => schema,
        }
    }

    /// Short name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::EntityAdded { .. } => "entity_added",
            EventKind::EntityRemoved { .. } => "entity_removed",
            EventKind::RelationshipAdded { .. } => "relationship_added",
            EventKind::RelationshipRemoved { .. } => "relationship_removed",
            EventKind::PropertyChanged { .. } => "property_changed",
        }
    }
}

/// One recorded graph change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// What happened
    pub kind: EventKind,
    /// Domain the change was applied to
    pub domain: String,
    /// Session lineage that produced the change
    pub session_id: SessionId,
    /// True when raised directly by a command rather than by a handler
    /// reacting to another event
    pub top_level: bool,
}

impl Event {
    /// Create an event; `top_level` is set by the session when recorded
    pub fn new(domain: impl Into<String>, session_id: SessionId, kind: EventKind) -> Self {
        Self {
            kind,
            domain: domain.into(),
            session_id,
            top_level: false,
        }
    }

    /// Element the event is about
    pub fn element(&self) -> &Identity {
        self.kind.element()
    }
}
