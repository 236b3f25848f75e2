//! Convenient imports for Hyperstore.
//!
//! ```ignore
//! use hyperstore::prelude::*;
//!
//! let db = Hyperstore::ephemeral()?;
//! let hr = db.create_domain("hr")?;
//! ```

// Main entry point
pub use crate::database::{Hyperstore, HyperstoreBuilder};

// Error handling
pub use hyperstore_core::{Error, Result};

// Core types
pub use hyperstore_core::{
    CancellationToken, DiagnosticMessage, Event, EventKind, ExecutionResult, Identity, IsolationLevel, LockMode,
    MessageType, NodeType, SessionId, SessionIndex, SessionMode, StoreId,
};

// Sessions and store
pub use hyperstore_engine::{
    BorrowedSession, Session, SessionConfiguration, SessionHandle, SessionResult, Store, StoreBuilder, StoreConfig,
};

// Domains, constraints and observers
pub use hyperstore_engine::{
    ConstraintManager, DomainCommand, DomainModel, Enlistment, EventNotifier, GraphCommand, ImplicitConstraints,
    MemoryDomain, SessionInformation, TrackedElement, TrackingState,
};

// Re-export serde_json for convenience
pub use serde_json::json;
