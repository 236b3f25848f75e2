//! Concurrency layer for Hyperstore
//!
//! This crate implements the concurrency control shared by all sessions:
//! - LockManager: shared/exclusive element locks with timeout and cancellation
//! - SessionIndexPool: lock-free bitmap allocator for session indices
//! - TransactionManager: MVCC version allocation, snapshots, vacuum horizon

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod lock_manager;
pub mod manager;
pub mod session_index;

pub use lock_manager::{LockEntry, LockManager, ResourceKey, DEFAULT_LOCK_TIMEOUT, DEFAULT_POLL_INTERVAL};
pub use manager::{TransactionManager, TransactionMetrics, TxnHandle};
pub use session_index::{SessionIndexPool, MAX_CAPACITY};
