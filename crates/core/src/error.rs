//! Unified error type for Hyperstore
//!
//! Every layer (storage, concurrency, engine) returns this error so callers
//! deal with a single, stable type. Failures raised by domain code inside a
//! session are usually converted into [`DiagnosticMessage`]s and surfaced as
//! [`Error::Session`] when the session decides to raise.

use crate::diagnostics::{DiagnosticMessage, MessageType};
use crate::identity::Identity;
use crate::types::Version;
use std::time::Duration;
use thiserror::Error;

/// All Hyperstore errors.
#[derive(Debug, Error)]
pub enum Error {
    /// A caller passed an argument the operation cannot accept
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation is not allowed in the current state
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A session was opened while the enclosing one is tearing down
    #[error("cannot open a nested session while the enclosing session is being disposed")]
    NestedInDisposingSession,

    /// No data or schema domain is registered under this name
    #[error("domain not found: {0}")]
    DomainNotFound(String),

    /// A mutation was attempted in a read-only session
    #[error("session is read-only")]
    ReadOnly,

    /// The operation requires an active session on this thread
    #[error("no active session")]
    NotInTransaction,

    /// Every session index is in use
    #[error("session limit reached ({capacity} concurrent sessions)")]
    SessionLimitReached {
        /// Configured pool capacity
        capacity: usize,
    },

    /// The element does not exist in the session's snapshot
    #[error("element not found: {0}")]
    ElementNotFound(Identity),

    /// An element with this identity already exists
    #[error("element already exists: {0}")]
    ElementExists(Identity),

    /// Another transaction changed the element after this snapshot was taken
    #[error("write conflict on {identity} (version {version})")]
    WriteConflict {
        /// Element being written
        identity: Identity,
        /// Version of the writer that lost
        version: Version,
    },

    /// The domain does not know how to process a command
    #[error("unsupported command: {0}")]
    UnsupportedCommand(String),

    /// The session produced error diagnostics
    #[error("session failed: {}", summarize(.0))]
    Session(Vec<DiagnosticMessage>),

    /// A lock could not be acquired in time
    #[error("timed out after {elapsed:?} waiting for {mode} lock on {resource}")]
    LockTimeout {
        /// Canonical resource key
        resource: String,
        /// Requested mode
        mode: String,
        /// Time spent waiting
        elapsed: Duration,
    },

    /// The session's cancellation token fired
    #[error("operation cancelled")]
    Cancelled,

    /// An internal invariant was broken; the store may be inconsistent
    #[error("critical: {0}")]
    Critical(String),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type for Hyperstore operations.
pub type Result<T> = std::result::Result<T, Error>;

fn summarize(messages: &[DiagnosticMessage]) -> String {
    let errors: Vec<&str> = messages
        .iter()
        .filter(|m| m.message_type == MessageType::Error)
        .map(|m| m.message.as_str())
        .collect();
    match errors.len() {
        0 => "no error diagnostics".to_string(),
        1 => errors[0].to_string(),
        n => format!("{} (and {} more)", errors[0], n - 1),
    }
}

impl Error {
    /// Check if this error is retryable.
    ///
    /// Conflicts and lock timeouts may succeed when the session is retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::WriteConflict { .. } | Error::LockTimeout { .. })
    }

    /// Check if this is a not-found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::ElementNotFound(_) | Error::DomainNotFound(_))
    }

    /// Check if this is a conflict error.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::WriteConflict { .. })
    }

    /// Check if this is a fatal, unrecoverable error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Critical(_))
    }

    /// Diagnostics carried by a [`Error::Session`] error
    pub fn messages(&self) -> &[DiagnosticMessage] {
        match self {
            Error::Session(messages) => messages,
            _ => &[],
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}
