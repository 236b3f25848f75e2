//! Core types for the in-memory graph store
//!
//! This module defines the fundamental types used throughout the system:
//! - [`StoreId`]: Unique identifier of a store instance
//! - [`SessionId`]: Identifier of one session lineage
//! - [`SessionIndex`]: Reusable slot handle binding a lineage to a thread
//! - [`Version`]: Transaction ordinal used for MVCC visibility
//! - [`NodeType`], [`IsolationLevel`], [`LockMode`]

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Transaction ordinal
///
/// Versions are handed out in increasing order, one per writing session.
/// Zero is reserved and never assigned.
pub type Version = u64;

/// Unique identifier for a store instance
///
/// Used as the default origin of sessions opened against the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoreId(Uuid);

impl StoreId {
    /// Create a new random StoreId using UUID v4
    ///
    /// # Examples
    ///
    /// ```
    /// use hyperstore_core::StoreId;
    ///
    /// let a = StoreId::new();
    /// let b = StoreId::new();
    /// assert_ne!(a, b);
    /// ```
    pub fn new() -> Self {
        StoreId(Uuid::new_v4())
    }

    /// Create StoreId from raw bytes
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        StoreId(Uuid::from_bytes(bytes))
    }

    /// Get raw bytes representation
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for StoreId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a session lineage
///
/// Shared by a top-level session and every nested session opened inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl SessionId {
    /// Raw numeric value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reusable handle into the session registry
///
/// Indices are drawn from a bounded pool and recycled once the owning
/// top-level session has been disposed. Zero is never handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionIndex(pub u16);

impl SessionIndex {
    /// Raw numeric value
    pub fn get(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for SessionIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Kind of graph node held by a slot list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    /// An entity
    Entity,
    /// A relationship between two elements
    Relationship,
    /// A property value owned by an element
    Property,
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeType::Entity => write!(f, "entity"),
            NodeType::Relationship => write!(f, "relationship"),
            NodeType::Property => write!(f, "property"),
        }
    }
}

/// Isolation level of a session
///
/// | Level | Snapshot | Read locks |
/// |-------|----------|------------|
/// | `ReadCommitted` | refreshed before each command | no |
/// | `Snapshot` | fixed at session start | no |
/// | `Serializable` | fixed at session start | shared locks on reads |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    /// Each command sees the latest committed data
    ReadCommitted,
    /// The whole session sees one consistent snapshot
    #[default]
    Snapshot,
    /// Snapshot reads plus shared locks on everything read
    Serializable,
}

/// Lock acquisition mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockMode {
    /// Many concurrent holders
    Shared,
    /// A single holder, no concurrent holder of any mode
    Exclusive,
}

impl LockMode {
    /// Check whether a holder in `self` mode allows a new holder in `other`
    pub fn is_compatible_with(self, other: LockMode) -> bool {
        matches!((self, other), (LockMode::Shared, LockMode::Shared))
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockMode::Shared => write!(f, "shared"),
            LockMode::Exclusive => write!(f, "exclusive"),
        }
    }
}
