//! Main entry point for Hyperstore.
//!
//! This module provides the `Hyperstore` struct, a store plus the in-memory
//! domains opened with it, and closure-style helpers for one-shot sessions.

use hyperstore_core::{Error, IsolationLevel, Result, StoreId};
use hyperstore_engine::{
    ConstraintManager, DomainModel, EventNotifier, MemoryDomain, ScopeFactory, SessionConfiguration,
    SessionHandle, Store, StoreBuilder, StoreConfig,
};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// The Hyperstore graph store.
///
/// Create one with [`Hyperstore::ephemeral`], [`Hyperstore::load`] or
/// [`Hyperstore::builder`]. Dereferences to the engine [`Store`].
///
/// # Example
///
/// ```ignore
/// use hyperstore::prelude::*;
///
/// let db = Hyperstore::builder().domain("hr").open()?;
/// let alice = Identity::new("hr", "alice");
///
/// db.transact(|session| {
///     session.execute(vec![
///         GraphCommand::add_entity(alice.clone(), Identity::new("hr", "Employee")),
///         GraphCommand::set_property(alice.clone(), "name", json!("Alice")),
///     ])
/// })?;
///
/// let name = db.read(|session| db.domain("hr").unwrap().get_property(session, &alice, "name"))?;
/// ```
#[derive(Clone)]
pub struct Hyperstore {
    store: Store,
    domains: Arc<RwLock<FxHashMap<String, Arc<MemoryDomain>>>>,
}

impl Hyperstore {
    /// Open a store with default settings.
    pub fn ephemeral() -> Result<Self> {
        Self::builder().open()
    }

    /// Open a store from a TOML configuration file.
    ///
    /// # Errors
    ///
    /// `Config` if the file cannot be read, parsed, or fails validation.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::builder().config(StoreConfig::load(path)?).open()
    }

    /// Create a builder for store configuration.
    pub fn builder() -> HyperstoreBuilder {
        HyperstoreBuilder::new()
    }

    /// Underlying engine store.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Create an in-memory domain on this store.
    pub fn create_domain(&self, name: &str) -> Result<Arc<MemoryDomain>> {
        self.add_domain(MemoryDomain::new(name, Arc::clone(self.store.graph())))
    }

    /// Create an in-memory domain checked by `constraints`.
    pub fn create_domain_with_constraints(
        &self,
        name: &str,
        constraints: Arc<dyn ConstraintManager>,
    ) -> Result<Arc<MemoryDomain>> {
        self.add_domain(MemoryDomain::new(name, Arc::clone(self.store.graph())).with_constraints(constraints))
    }

    fn add_domain(&self, domain: MemoryDomain) -> Result<Arc<MemoryDomain>> {
        let domain = self.store.register_memory_domain(domain)?;
        self.domains
            .write()
            .insert(domain.name().to_string(), Arc::clone(&domain));
        Ok(domain)
    }

    /// In-memory domain created through this handle.
    pub fn domain(&self, name: &str) -> Option<Arc<MemoryDomain>> {
        self.domains.read().get(name).cloned()
    }

    /// Run `f` in a writable session and commit if it succeeds.
    ///
    /// The session is rolled back when `f` returns an error; a session that
    /// ends with error diagnostics surfaces them as `Error::Session`.
    pub fn transact<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&SessionHandle) -> Result<T>,
    {
        self.transact_with(SessionConfiguration::new(), f)
    }

    /// Run `f` in a session opened with `config`.
    pub fn transact_with<T, F>(&self, config: SessionConfiguration, f: F) -> Result<T>
    where
        F: FnOnce(&SessionHandle) -> Result<T>,
    {
        let session = self.store.begin_session(config)?;
        match f(&session) {
            Ok(value) => {
                session.accept_changes();
                let result = session.close()?;
                if result.aborted && !result.nested {
                    debug!(session_id = %result.session_id, "transaction rolled back");
                    return Err(Error::Session(result.messages.into_messages()));
                }
                Ok(value)
            }
            Err(e) => {
                session.reject_changes();
                // the close error, if any, repeats what `f` reported
                let _ = session.close();
                Err(e)
            }
        }
    }

    /// Run `f` in a read-only session.
    ///
    /// Inside an active session on this thread, `f` runs in a nested
    /// read-only level: it sees that session's changes, its commands fail
    /// with `ReadOnly`, and it never rolls the enclosing session back.
    pub fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&SessionHandle) -> Result<T>,
    {
        let session = self.store.begin_session(SessionConfiguration::read_only())?;
        let value = f(&session);
        session.close()?;
        value
    }
}

impl Deref for Hyperstore {
    type Target = Store;

    fn deref(&self) -> &Store {
        &self.store
    }
}

impl std::fmt::Debug for Hyperstore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hyperstore")
            .field("store", &self.store)
            .field("domains", &self.domains.read().keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Builder for store configuration.
///
/// # Example
///
/// ```ignore
/// let db = Hyperstore::builder()
///     .max_sessions(64)
///     .lock_timeout(Duration::from_secs(1))
///     .domain("hr")
///     .open()?;
/// ```
pub struct HyperstoreBuilder {
    inner: StoreBuilder,
    domains: Vec<String>,
}

impl HyperstoreBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            inner: StoreBuilder::new(),
            domains: Vec::new(),
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: StoreConfig) -> Self {
        self.inner = self.inner.config(config);
        self
    }

    /// Fix the store id.
    pub fn store_id(mut self, id: StoreId) -> Self {
        self.inner = self.inner.store_id(id);
        self
    }

    /// Maximum number of concurrent top-level sessions.
    pub fn max_sessions(mut self, max: usize) -> Self {
        self.inner = self.inner.max_sessions(max);
        self
    }

    /// How long a lock request may wait.
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.inner = self.inner.lock_timeout(timeout);
        self
    }

    /// Threads checking constraints; 0 means one per CPU.
    pub fn constraint_workers(mut self, workers: usize) -> Self {
        self.inner = self.inner.constraint_workers(workers);
        self
    }

    /// Isolation of sessions that do not choose one.
    pub fn default_isolation(mut self, level: IsolationLevel) -> Self {
        self.inner = self.inner.default_isolation(level);
        self
    }

    /// Observe session activity.
    pub fn notifier(mut self, notifier: Arc<dyn EventNotifier>) -> Self {
        self.inner = self.inner.notifier(notifier);
        self
    }

    /// Use a custom transaction scope coordinator.
    pub fn scope_factory(mut self, factory: Arc<dyn ScopeFactory>) -> Self {
        self.inner = self.inner.scope_factory(factory);
        self
    }

    /// Create an in-memory domain when the store opens.
    pub fn domain(mut self, name: impl Into<String>) -> Self {
        self.domains.push(name.into());
        self
    }

    /// Open the store.
    pub fn open(self) -> Result<Hyperstore> {
        let db = Hyperstore {
            store: self.inner.open()?,
            domains: Arc::new(RwLock::new(FxHashMap::default())),
        };
        for name in &self.domains {
            db.create_domain(name)?;
        }
        Ok(db)
    }
}

impl Default for HyperstoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyperstore_core::Identity;
    use hyperstore_engine::GraphCommand;
    use serde_json::json;

    fn employee() -> Identity {
        Identity::new("hr", "Employee")
    }

    #[test]
    fn test_builder_creates_domains() {
        let db = Hyperstore::builder().domain("hr").domain("org").open().unwrap();
        assert!(db.domain("hr").is_some());
        assert!(db.domain("org").is_some());
        assert!(db.get_domain("org").is_some());
        assert!(db.domain("nope").is_none());
    }

    #[test]
    fn test_transact_commits_and_read_sees_it() {
        let db = Hyperstore::builder().domain("hr").open().unwrap();
        let alice = Identity::new("hr", "alice");

        db.transact(|s| {
            s.execute(vec![
                GraphCommand::add_entity(alice.clone(), employee()),
                GraphCommand::set_property(alice.clone(), "name", json!("Alice")),
            ])
        })
        .unwrap();

        let hr = db.domain("hr").unwrap();
        let name = db.read(|s| hr.get_property(s, &alice, "name")).unwrap();
        assert_eq!(name, Some(json!("Alice")));
        assert_eq!(db.active_sessions(), 0);
    }

    #[test]
    fn test_transact_error_rolls_back() {
        let db = Hyperstore::builder().domain("hr").open().unwrap();
        let bob = Identity::new("hr", "bob");

        let err = db
            .transact(|s| {
                s.execute(vec![GraphCommand::add_entity(bob.clone(), employee())])?;
                Err::<(), _>(Error::InvalidArgument("changed my mind".into()))
            })
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));

        let hr = db.domain("hr").unwrap();
        assert!(db.read(|s| hr.get_element(s, &bob)).unwrap().is_none());
    }

    #[test]
    fn test_nested_read_refuses_writes_without_vetoing() {
        let db = Hyperstore::builder().domain("hr").open().unwrap();
        let hr = db.domain("hr").unwrap();
        let alice = Identity::new("hr", "alice");
        let bob = Identity::new("hr", "bob");

        db.transact(|s| {
            s.execute(vec![GraphCommand::add_entity(alice.clone(), employee())])?;
            let seen = db.read(|r| {
                assert!(r.is_read_only());
                assert!(matches!(
                    r.execute(vec![GraphCommand::add_entity(bob.clone(), employee())]),
                    Err(Error::ReadOnly)
                ));
                hr.get_element(r, &alice)
            })?;
            assert!(seen.is_some());
            assert!(!s.is_read_only());
            Ok(())
        })
        .unwrap();

        assert!(db.read(|s| hr.get_element(s, &alice)).unwrap().is_some());
        assert!(db.read(|s| hr.get_element(s, &bob)).unwrap().is_none());
    }

    #[test]
    fn test_load_rejects_missing_file() {
        assert!(matches!(
            Hyperstore::load("/nonexistent/hyperstore.toml"),
            Err(Error::Config(_))
        ));
    }
}
