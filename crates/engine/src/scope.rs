//! Transaction scope
//!
//! A session owns one [`TransactionScope`] for its whole lineage. Resources
//! that take part in the session's outcome enlist into it; at teardown the
//! scope commits them all if it was completed, otherwise rolls them back.
//!
//! Stores create scopes through a [`ScopeFactory`], so an application can
//! plug in its own coordinator.

use crate::config::SessionConfiguration;
use hyperstore_core::{Error, Result};
use std::sync::Arc;
use tracing::{debug, warn};

/// A resource that commits or rolls back with the session
pub trait Enlistment: Send + Sync {
    /// Make the resource's changes permanent
    fn commit(&self) -> Result<()>;

    /// Discard the resource's changes
    fn rollback(&self) -> Result<()>;

    /// Name used in logs and error messages
    fn name(&self) -> &str {
        "enlistment"
    }
}

/// Outcome coordinator of one session lineage
pub trait TransactionScope: Send {
    /// Add a resource
    fn enlist(&mut self, resource: Arc<dyn Enlistment>);

    /// Vote to commit; without this call `dispose` rolls back
    fn complete(&mut self);

    /// True once `complete` was called
    fn is_completed(&self) -> bool;

    /// Commit or roll back every enlisted resource
    fn dispose(self: Box<Self>) -> Result<()>;
}

/// Builds the scope of each new session lineage
pub trait ScopeFactory: Send + Sync {
    /// Create a scope for a top-level session
    fn create_scope(&self, config: &SessionConfiguration) -> Box<dyn TransactionScope>;
}

/// Default scope: commit-all or rollback-all over the enlisted resources
#[derive(Default)]
pub struct EnlistedTransactionScope {
    enlisted: Vec<Arc<dyn Enlistment>>,
    completed: bool,
}

impl EnlistedTransactionScope {
    /// Create an empty scope
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of enlisted resources
    pub fn len(&self) -> usize {
        self.enlisted.len()
    }

    /// True when nothing is enlisted
    pub fn is_empty(&self) -> bool {
        self.enlisted.is_empty()
    }
}

impl TransactionScope for EnlistedTransactionScope {
    fn enlist(&mut self, resource: Arc<dyn Enlistment>) {
        self.enlisted.push(resource);
    }

    fn complete(&mut self) {
        self.completed = true;
    }

    fn is_completed(&self) -> bool {
        self.completed
    }

    fn dispose(self: Box<Self>) -> Result<()> {
        let mut failures = Vec::new();
        if self.completed {
            for resource in &self.enlisted {
                if let Err(e) = resource.commit() {
                    warn!(resource = resource.name(), error = %e, "enlisted resource failed to commit");
                    failures.push(format!("{}: {}", resource.name(), e));
                }
            }
        } else {
            for resource in self.enlisted.iter().rev() {
                if let Err(e) = resource.rollback() {
                    warn!(resource = resource.name(), error = %e, "enlisted resource failed to roll back");
                    failures.push(format!("{}: {}", resource.name(), e));
                }
            }
        }
        debug!(
            enlisted = self.enlisted.len(),
            committed = self.completed,
            failed = failures.len(),
            "transaction scope disposed"
        );

        if failures.is_empty() {
            Ok(())
        } else if self.completed {
            // Some resources may already be committed
            Err(Error::Critical(format!("commit failed: {}", failures.join("; "))))
        } else {
            Err(Error::InvalidState(format!("rollback failed: {}", failures.join("; "))))
        }
    }
}

impl std::fmt::Debug for EnlistedTransactionScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnlistedTransactionScope")
            .field("enlisted", &self.enlisted.len())
            .field("completed", &self.completed)
            .finish()
    }
}

/// Factory for [`EnlistedTransactionScope`]
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultScopeFactory;

impl ScopeFactory for DefaultScopeFactory {
    fn create_scope(&self, _config: &SessionConfiguration) -> Box<dyn TransactionScope> {
        Box::new(EnlistedTransactionScope::new())
    }
}
