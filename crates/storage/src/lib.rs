//! Storage layer for Hyperstore
//!
//! This crate implements the versioned in-memory graph storage:
//! - Slot / SlotList: append-only versions of one node
//! - Snapshot: transaction-version visibility
//! - GraphStore: DashMap-sharded node store with first-updater-wins writes
//! - StoreTransaction: undo log for rollback
//! - Vacuum of versions no snapshot can see anymore

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod graph_store;
pub mod node;
pub mod slot;
pub mod slot_list;
pub mod snapshot;
pub mod transaction;

pub use graph_store::{GraphStore, Shard, VacuumStats};
pub use node::GraphNode;
pub use slot::Slot;
pub use slot_list::SlotList;
pub use snapshot::{Snapshot, SnapshotContext};
pub use transaction::StoreTransaction;
