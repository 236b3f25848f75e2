//! Core types for Hyperstore
//!
//! This crate contains the foundational types shared by every layer of the
//! store:
//! - [`Identity`]: structural key of a graph node
//! - [`StoreId`], [`SessionId`], [`SessionIndex`], [`Version`]
//! - [`SessionMode`]: behavior flags of a session level
//! - [`CancellationToken`]: cooperative cancellation
//! - [`Event`]: recorded graph change
//! - [`DiagnosticMessage`] and [`ExecutionResult`]
//! - [`Error`]: the unified error type

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cancel;
pub mod diagnostics;
pub mod error;
pub mod event;
pub mod identity;
pub mod mode;
pub mod types;

pub use cancel::CancellationToken;
pub use diagnostics::{DiagnosticMessage, ExecutionResult, MessageType};
pub use error::{Error, Result};
pub use event::{Event, EventKind};
pub use identity::Identity;
pub use mode::SessionMode;
pub use types::{IsolationLevel, LockMode, NodeType, SessionId, SessionIndex, StoreId, Version};
