//! Values stored in slots

use hyperstore_core::{Identity, NodeType};
use serde::{Deserialize, Serialize};

/// One version of a graph node
///
/// Entities carry only their identity and schema. Relationships add their
/// start and end elements. Property values are nodes of their own, keyed by
/// the owner's attribute identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    /// Node identity
    pub id: Identity,
    /// Schema element describing the node
    pub schema: Identity,
    /// Kind of node
    pub node_type: NodeType,
    /// Property value (property nodes only)
    pub value: Option<serde_json::Value>,
    /// Source element (relationships only)
    pub start: Option<Identity>,
    /// Target element (relationships only)
    pub end: Option<Identity>,
    /// Owning element (property nodes only)
    pub owner: Option<Identity>,
    /// Property name (property nodes only)
    pub property: Option<String>,
}

impl GraphNode {
    /// Entity node
    pub fn entity(id: Identity, schema: Identity) -> Self {
        Self {
            id,
            schema,
            node_type: NodeType::Entity,
            value: None,
            start: None,
            end: None,
            owner: None,
            property: None,
        }
    }

    /// Relationship node from `start` to `end`
    pub fn relationship(id: Identity, schema: Identity, start: Identity, end: Identity) -> Self {
        Self {
            id,
            schema,
            node_type: NodeType::Relationship,
            value: None,
            start: Some(start),
            end: Some(end),
            owner: None,
            property: None,
        }
    }

    /// Property value node owned by `owner`
    pub fn property(
        owner: Identity,
        schema: Identity,
        property: impl Into<String>,
        value: serde_json::Value,
    ) -> Self {
        let property = property.into();
        Self {
            id: owner.create_attribute_identity(&property),
            schema,
            node_type: NodeType::Property,
            value: Some(value),
            start: None,
            end: None,
            owner: Some(owner),
            property: Some(property),
        }
    }

    /// Check whether this relationship touches `element` at either end
    pub fn connects(&self, element: &Identity) -> bool {
        self.start.as_ref() == Some(element) || self.end.as_ref() == Some(element)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_property_node_identity() {
        let owner = Identity::new("hr", "emp-1");
        let node = GraphNode::property(owner.clone(), Identity::new("hr", "Employee"), "name", json!("Ada"));
        assert_eq!(node.id, owner.create_attribute_identity("name"));
        assert_eq!(node.owner.as_ref(), Some(&owner));
        assert_eq!(node.node_type, NodeType::Property);
    }

    #[test]
    fn test_relationship_connects() {
        let a = Identity::new("hr", "a");
        let b = Identity::new("hr", "b");
        let rel = GraphNode::relationship(
            Identity::new("hr", "r"),
            Identity::new("hr", "Knows"),
            a.clone(),
            b.clone(),
        );
        assert!(rel.connects(&a));
        assert!(rel.connects(&b));
        assert!(!rel.connects(&Identity::new("hr", "c")));
    }
}
