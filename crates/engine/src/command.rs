//! Domain commands
//!
//! A command names the domain it targets; `Session::execute` groups commands
//! by that name and hands each group to the resolved domain. Domains
//! downcast through [`DomainCommand::as_any`] to the command types they know.

use hyperstore_core::Identity;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::fmt::Debug;

/// A unit of work for a domain
pub trait DomainCommand: Debug + Send + Sync {
    /// Name of the target domain
    fn domain_name(&self) -> &str;

    /// Downcast support
    fn as_any(&self) -> &dyn Any;
}

/// Built-in graph mutations understood by the in-memory domain
///
/// The target domain is the domain model of the element being written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GraphCommand {
    /// Create an entity
    AddEntity {
        /// New entity identity
        id: Identity,
        /// Schema of the entity
        schema: Identity,
    },
    /// Delete an entity and its properties
    RemoveEntity {
        /// Entity to delete
        id: Identity,
    },
    /// Create a relationship between two existing elements
    AddRelationship {
        /// New relationship identity
        id: Identity,
        /// Schema of the relationship
        schema: Identity,
        /// Source element
        start: Identity,
        /// Target element
        end: Identity,
    },
    /// Delete a relationship
    RemoveRelationship {
        /// Relationship to delete
        id: Identity,
    },
    /// Set or clear a property value
    SetProperty {
        /// Element owning the property
        owner: Identity,
        /// Property name
        property: String,
        /// New value; `None` clears the property
        value: Option<Value>,
    },
}

impl GraphCommand {
    /// Create an entity
    pub fn add_entity(id: Identity, schema: Identity) -> Self {
        GraphCommand::AddEntity { id, schema }
    }

    /// Delete an entity
    pub fn remove_entity(id: Identity) -> Self {
        GraphCommand::RemoveEntity { id }
    }

    /// Create a relationship
    pub fn add_relationship(id: Identity, schema: Identity, start: Identity, end: Identity) -> Self {
        GraphCommand::AddRelationship { id, schema, start, end }
    }

    /// Delete a relationship
    pub fn remove_relationship(id: Identity) -> Self {
        GraphCommand::RemoveRelationship { id }
    }

    /// Set a property
    pub fn set_property(owner: Identity, property: impl Into<String>, value: Value) -> Self {
        GraphCommand::SetProperty {
            owner,
            property: property.into(),
            value: Some(value),
        }
    }

    /// Clear a property
    pub fn clear_property(owner: Identity, property: impl Into<String>) -> Self {
        GraphCommand::SetProperty {
            owner,
            property: property.into(),
            value: None,
        }
    }

    /// Element the command writes
    pub fn target(&self) -> &Identity {
        match self {
            GraphCommand::AddEntity { id, .. }
            | GraphCommand::RemoveEntity { id }
            | GraphCommand::AddRelationship { id, .. }
            | GraphCommand::RemoveRelationship { id } => id,
            GraphCommand::SetProperty { owner, .. } => owner,
        }
    }
}

impl DomainCommand for GraphCommand {
    fn domain_name(&self) -> &str {
        self.target().domain_model()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl From<GraphCommand> for Box<dyn DomainCommand> {
    fn from(command: GraphCommand) -> Self {
        Box::new(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_domain_name_follows_target() {
        let cmd = GraphCommand::set_property(Identity::new("hr", "e1"), "name", json!("Ada"));
        assert_eq!(cmd.domain_name(), "hr");
        assert_eq!(cmd.target(), &Identity::new("hr", "e1"));

        let cmd = GraphCommand::add_relationship(
            Identity::new("org", "r1"),
            Identity::new("org", "WorksIn"),
            Identity::new("hr", "e1"),
            Identity::new("org", "d1"),
        );
        assert_eq!(cmd.domain_name(), "org");
    }

    #[test]
    fn test_downcast_through_box() {
        let boxed: Box<dyn DomainCommand> = GraphCommand::remove_entity(Identity::new("hr", "e1")).into();
        let cmd = boxed.as_any().downcast_ref::<GraphCommand>().unwrap();
        assert!(matches!(cmd, GraphCommand::RemoveEntity { .. }));
    }
}
