//! # Hyperstore
//!
//! In-process graph store with MVCC slot storage and nested transactional
//! sessions.
//!
//! Hyperstore keeps entities, relationships and properties of one or more
//! domain models in a versioned in-memory graph. Work happens in sessions:
//! a session sees a consistent snapshot, records changes through commands,
//! validates the elements it touched, then commits or rolls back as a unit.
//!
//! ## Quick Start
//!
//! ```ignore
//! use hyperstore::prelude::*;
//!
//! let db = Hyperstore::builder().domain("hr").open()?;
//! let alice = Identity::new("hr", "alice");
//!
//! // One-shot session, committed when the closure succeeds
//! db.transact(|session| {
//!     session.execute(vec![
//!         GraphCommand::add_entity(alice.clone(), Identity::new("hr", "Employee")),
//!         GraphCommand::set_property(alice.clone(), "name", json!("Alice")),
//!     ])
//! })?;
//!
//! // Explicit session, nested sessions share its outcome
//! let outer = db.begin_session(SessionConfiguration::new())?;
//! {
//!     let inner = db.begin_session(SessionConfiguration::new())?;
//!     inner.execute(vec![GraphCommand::clear_property(alice.clone(), "name")])?;
//!     inner.accept_changes();
//!     inner.close()?;
//! }
//! outer.accept_changes();
//! outer.close()?;
//! ```
//!
//! ## Layers
//!
//! - `hyperstore-core`: identities, events, diagnostics, errors
//! - `hyperstore-storage`: slot lists, snapshots, the sharded graph store
//! - `hyperstore-concurrency`: locks, session indices, MVCC versions
//! - `hyperstore-engine`: sessions, domains, constraints, notifiers, the store

#![warn(missing_docs)]
#![warn(clippy::all)]

mod database;

pub mod prelude;

pub use hyperstore_concurrency;
pub use hyperstore_core;
pub use hyperstore_engine;
pub use hyperstore_storage;

// Re-export main entry points
pub use database::{Hyperstore, HyperstoreBuilder};
pub use hyperstore_core::{Error, Result};
pub use hyperstore_engine::{Session, SessionConfiguration, SessionHandle, Store, StoreBuilder, StoreConfig};
