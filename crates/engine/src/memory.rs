//! In-memory data domain
//!
//! [`MemoryDomain`] applies [`GraphCommand`]s to the store's shared
//! [`GraphStore`]. Every write takes an exclusive lock on the element (or the
//! attribute) first, goes through the session's [`MemoryTransaction`], and
//! records one event. The transaction is enlisted in the session scope, so
//! it commits or rolls back with the session.
//!
//! Reads use the session snapshot. Under `Serializable` isolation they also
//! take shared locks on what they read.

use crate::command::{DomainCommand, GraphCommand};
use crate::constraints::ConstraintManager;
use crate::domain::DomainModel;
use crate::scope::Enlistment;
use crate::session::SessionHandle;
use hyperstore_core::{
    Error, Event, EventKind, ExecutionResult, Identity, IsolationLevel, LockMode, NodeType, Result, Version,
};
use hyperstore_storage::{GraphNode, GraphStore, Snapshot, StoreTransaction};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Pending writes of one session against one memory domain
pub struct MemoryTransaction {
    domain: String,
    graph: Arc<GraphStore>,
    txn: Mutex<Option<StoreTransaction>>,
}

impl MemoryTransaction {
    fn new(domain: &str, graph: Arc<GraphStore>, version: Version) -> Self {
        Self {
            domain: domain.to_string(),
            graph,
            txn: Mutex::new(Some(StoreTransaction::new(version))),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&GraphStore, &mut StoreTransaction) -> Result<R>) -> Result<R> {
        let mut guard = self.txn.lock();
        let txn = guard
            .as_mut()
            .ok_or_else(|| Error::InvalidState(format!("transaction on '{}' already completed", self.domain)))?;
        f(&self.graph, txn)
    }

    /// Number of changes not yet committed or rolled back
    pub fn pending(&self) -> usize {
        self.txn.lock().as_ref().map_or(0, |t| t.pending())
    }
}

impl Enlistment for MemoryTransaction {
    fn commit(&self) -> Result<()> {
        if let Some(txn) = self.txn.lock().take() {
            let changes = txn.commit();
            debug!(domain = %self.domain, changes, "memory transaction committed");
        }
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        if let Some(txn) = self.txn.lock().take() {
            let changes = self.graph.rollback(txn);
            debug!(domain = %self.domain, changes, "memory transaction rolled back");
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.domain
    }
}

/// Data domain backed by the store's graph
pub struct MemoryDomain {
    name: String,
    graph: Arc<GraphStore>,
    constraints: Option<Arc<dyn ConstraintManager>>,
}

impl MemoryDomain {
    /// Create a domain writing to `graph`
    pub fn new(name: impl Into<String>, graph: Arc<GraphStore>) -> Self {
        Self {
            name: name.into(),
            graph,
            constraints: None,
        }
    }

    /// Validate this domain's elements with `constraints` at commit
    pub fn with_constraints(mut self, constraints: Arc<dyn ConstraintManager>) -> Self {
        self.constraints = Some(constraints);
        self
    }

    /// The backing graph
    pub fn graph(&self) -> &Arc<GraphStore> {
        &self.graph
    }

    fn resource_key(&self) -> String {
        format!("memory:{}", self.name)
    }

    fn transaction(&self, session: &SessionHandle) -> Result<Arc<MemoryTransaction>> {
        let version = session.write_version().ok_or(Error::ReadOnly)?;
        let graph = Arc::clone(&self.graph);
        session.domain_resource(&self.resource_key(), || Ok(MemoryTransaction::new(&self.name, graph, version)))
    }

    fn read_lock(&self, session: &SessionHandle, id: &Identity, property: Option<&str>) -> Result<()> {
        if session.isolation_level() == IsolationLevel::Serializable {
            session.acquire_lock(LockMode::Shared, id, property)?;
        }
        Ok(())
    }

    fn visible(&self, snapshot: &Snapshot, id: &Identity) -> Result<GraphNode> {
        self.graph
            .get(id, snapshot)
            .ok_or_else(|| Error::ElementNotFound(id.clone()))
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Visible version of an element
    pub fn get_element(&self, session: &SessionHandle, id: &Identity) -> Result<Option<GraphNode>> {
        self.read_lock(session, id, None)?;
        Ok(self.graph.get(id, &session.command_snapshot()))
    }

    /// Visible value of a property
    pub fn get_property(&self, session: &SessionHandle, owner: &Identity, property: &str) -> Result<Option<Value>> {
        self.read_lock(session, owner, Some(property))?;
        let attribute = owner.create_attribute_identity(property);
        Ok(self
            .graph
            .get(&attribute, &session.command_snapshot())
            .and_then(|node| node.value))
    }

    /// Visible relationships starting or ending at `id`
    pub fn relationships(&self, session: &SessionHandle, id: &Identity) -> Result<Vec<GraphNode>> {
        self.read_lock(session, id, None)?;
        let snapshot = session.command_snapshot();
        Ok(self
            .graph
            .scan(&self.name, &snapshot, |node| {
                node.node_type == NodeType::Relationship && node.connects(id)
            }))
    }

    /// Visible entities of this domain, sorted by identity
    pub fn elements(&self, session: &SessionHandle) -> Result<Vec<GraphNode>> {
        let entities = self
            .graph
            .nodes_of_type(&self.name, &session.command_snapshot(), NodeType::Entity);
        for entity in &entities {
            self.read_lock(session, &entity.id, None)?;
        }
        Ok(entities)
    }

    // ========================================================================
    // Writes
    // ========================================================================

    fn apply(&self, session: &SessionHandle, txn: &MemoryTransaction, command: &GraphCommand) -> Result<EventKind> {
        let snapshot = session.command_snapshot();
        match command {
            GraphCommand::AddEntity { id, schema } => {
                session.acquire_lock(LockMode::Exclusive, id, None)?;
                txn.with(|graph, t| graph.insert(t, &snapshot, GraphNode::entity(id.clone(), schema.clone())))?;
                Ok(EventKind::EntityAdded {
                    id: id.clone(),
                    schema: schema.clone(),
                })
            }
            GraphCommand::RemoveEntity { id } => {
                session.acquire_lock(LockMode::Exclusive, id, None)?;
                let properties = self.graph.scan(id.domain_model(), &snapshot, |node| {
                    node.node_type == NodeType::Property && node.owner.as_ref() == Some(id)
                });
                for property in &properties {
                    session.acquire_lock(LockMode::Exclusive, id, property.property.as_deref())?;
                    txn.with(|graph, t| graph.remove(t, &snapshot, &property.id))?;
                }
                let removed = txn.with(|graph, t| graph.remove(t, &snapshot, id))?;
                Ok(EventKind::EntityRemoved {
                    id: id.clone(),
                    schema: removed.schema,
                })
            }
            GraphCommand::AddRelationship { id, schema, start, end } => {
                session.acquire_lock(LockMode::Exclusive, id, None)?;
                self.visible(&snapshot, start)?;
                self.visible(&snapshot, end)?;
                let node = GraphNode::relationship(id.clone(), schema.clone(), start.clone(), end.clone());
                txn.with(|graph, t| graph.insert(t, &snapshot, node))?;
                Ok(EventKind::RelationshipAdded {
                    id: id.clone(),
                    schema: schema.clone(),
                    start: start.clone(),
                    end: end.clone(),
                })
            }
            GraphCommand::RemoveRelationship { id } => {
                session.acquire_lock(LockMode::Exclusive, id, None)?;
                let removed = txn.with(|graph, t| graph.remove(t, &snapshot, id))?;
                let (Some(start), Some(end)) = (removed.start, removed.end) else {
                    return Err(Error::InvalidState(format!("{} is not a relationship", id)));
                };
                Ok(EventKind::RelationshipRemoved {
                    id: id.clone(),
                    schema: removed.schema,
                    start,
                    end,
                })
            }
            GraphCommand::SetProperty { owner, property, value } => {
                session.acquire_lock(LockMode::Exclusive, owner, Some(property))?;
                let owner_node = self.visible(&snapshot, owner)?;
                let attribute = owner.create_attribute_identity(property);
                let old_value = match value {
                    Some(value) => {
                        let node = GraphNode::property(owner.clone(), owner_node.schema.clone(), property.as_str(), value.clone());
                        txn.with(|graph, t| graph.put(t, &snapshot, node))?
                            .and_then(|previous| previous.value)
                    }
                    None if self.graph.contains(&attribute, &snapshot) => {
                        txn.with(|graph, t| graph.remove(t, &snapshot, &attribute))?.value
                    }
                    None => None,
                };
                Ok(EventKind::PropertyChanged {
                    owner: owner.clone(),
                    schema: owner_node.schema,
                    property: property.clone(),
                    value: value.clone(),
                    old_value,
                })
            }
        }
    }
}

impl DomainModel for MemoryDomain {
    fn name(&self) -> &str {
        &self.name
    }

    fn process_commands(&self, session: &SessionHandle, commands: &[Box<dyn DomainCommand>]) -> Result<ExecutionResult> {
        let txn = self.transaction(session)?;
        let session_id = session.session_id();
        for command in commands {
            let command = command
                .as_any()
                .downcast_ref::<GraphCommand>()
                .ok_or_else(|| Error::UnsupportedCommand(format!("{:?}", command)))?;
            let kind = self.apply(session, &txn, command)?;
            session.add_event(Event::new(self.name.as_str(), session_id, kind))?;
        }
        Ok(ExecutionResult::new())
    }

    fn constraints(&self) -> Option<Arc<dyn ConstraintManager>> {
        self.constraints.clone()
    }
}

impl std::fmt::Debug for MemoryDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryDomain")
            .field("name", &self.name)
            .field("constraints", &self.constraints.is_some())
            .finish()
    }
}
