//! Store: engine lifecycle owner
//!
//! A [`Store`] ties together everything sessions need: the graph, the lock
//! manager, the MVCC transaction manager, the session registry, the domain
//! registry and the notifiers. Cloning a store is cheap; clones share state.
//!
//! # Example
//!
//! ```ignore
//! let store = Store::builder()
//!     .max_sessions(64)
//!     .lock_timeout(Duration::from_secs(2))
//!     .open()?;
//! let hr = store.create_domain("hr")?;
//!
//! let session = store.begin_session(SessionConfiguration::new())?;
//! session.execute(vec![GraphCommand::add_entity(id, schema)])?;
//! session.accept_changes();
//! session.close()?;
//! ```

use crate::config::{SessionConfiguration, StoreConfig};
use crate::domain::{DomainKind, DomainModel, DomainRegistry};
use crate::memory::MemoryDomain;
use crate::notify::EventNotifier;
use crate::registry::SessionRegistry;
use crate::scope::{DefaultScopeFactory, ScopeFactory};
use crate::session::{Session, SessionHandle};
use hyperstore_concurrency::{LockManager, TransactionManager, TransactionMetrics};
use hyperstore_core::{Error, IsolationLevel, Result, SessionId, StoreId};
use hyperstore_storage::{GraphStore, VacuumStats};
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

struct StoreInner {
    id: StoreId,
    config: StoreConfig,
    registry: SessionRegistry,
    locks: LockManager,
    transactions: TransactionManager,
    graph: Arc<GraphStore>,
    domains: DomainRegistry,
    notifiers: RwLock<Vec<Arc<dyn EventNotifier>>>,
    scope_factory: Arc<dyn ScopeFactory>,
    /// Built on first validation; a build failure is cached too
    constraint_pool: OnceCell<std::result::Result<Arc<ThreadPool>, String>>,
    next_session_id: AtomicU64,
}

/// In-process graph store
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    /// Open a store with `config`
    pub fn open(config: StoreConfig) -> Result<Self> {
        StoreBuilder::new().config(config).open()
    }

    /// Start configuring a store
    pub fn builder() -> StoreBuilder {
        StoreBuilder::new()
    }

    /// Store id
    pub fn id(&self) -> StoreId {
        self.inner.id
    }

    /// Effective configuration
    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    // ========================================================================
    // Sessions
    // ========================================================================

    /// Open a session on the calling thread
    ///
    /// Nests inside the thread's active session of this store, if any.
    ///
    /// # Errors
    ///
    /// - `Cancelled` if the configuration's token is already cancelled
    /// - `NestedInDisposingSession` if the active session is tearing down
    /// - `SessionLimitReached` if every session index is in use
    pub fn begin_session(&self, config: SessionConfiguration) -> Result<Session> {
        Session::begin(self, config)
    }

    /// Session bound to the calling thread
    pub fn current_session(&self) -> Option<SessionHandle> {
        self.inner
            .registry
            .current()
            .map(|(index, ctx)| SessionHandle::new(self.clone(), index, ctx))
    }

    /// Number of live top-level sessions
    pub fn active_sessions(&self) -> usize {
        self.inner.registry.active()
    }

    pub(crate) fn registry(&self) -> &SessionRegistry {
        &self.inner.registry
    }

    pub(crate) fn next_session_id(&self) -> SessionId {
        SessionId(self.inner.next_session_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn scope_factory(&self) -> &Arc<dyn ScopeFactory> {
        &self.inner.scope_factory
    }

    // ========================================================================
    // Domains and notifiers
    // ========================================================================

    /// Domain registry
    pub fn domains(&self) -> &DomainRegistry {
        &self.inner.domains
    }

    /// Register a data domain
    pub fn register_domain(&self, domain: Arc<dyn DomainModel>) -> Result<()> {
        self.inner.domains.register_domain(domain)
    }

    /// Register a schema domain
    pub fn register_schema(&self, schema: Arc<dyn DomainModel>) -> Result<()> {
        self.inner.domains.register_schema(schema)
    }

    /// Resolve a domain by name
    pub fn get_domain(&self, name: &str) -> Option<DomainKind> {
        self.inner.domains.resolve(name)
    }

    /// Create and register an in-memory data domain
    pub fn create_domain(&self, name: &str) -> Result<Arc<MemoryDomain>> {
        self.register_memory_domain(MemoryDomain::new(name, Arc::clone(&self.inner.graph)))
    }

    /// Register a configured in-memory domain
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the domain writes to another store's graph or the
    /// name is taken.
    pub fn register_memory_domain(&self, domain: MemoryDomain) -> Result<Arc<MemoryDomain>> {
        if !Arc::ptr_eq(domain.graph(), &self.inner.graph) {
            return Err(Error::InvalidArgument(format!(
                "domain '{}' is bound to another store",
                domain.name()
            )));
        }
        let domain = Arc::new(domain);
        self.inner.domains.register_domain(domain.clone())?;
        Ok(domain)
    }

    /// Add an observer of session activity
    pub fn add_notifier(&self, notifier: Arc<dyn EventNotifier>) {
        self.inner.notifiers.write().push(notifier);
    }

    pub(crate) fn notifiers(&self) -> Vec<Arc<dyn EventNotifier>> {
        self.inner.notifiers.read().clone()
    }

    // ========================================================================
    // Engine components
    // ========================================================================

    /// Shared graph
    pub fn graph(&self) -> &Arc<GraphStore> {
        &self.inner.graph
    }

    /// Lock manager
    pub fn lock_manager(&self) -> &LockManager {
        &self.inner.locks
    }

    /// MVCC transaction manager
    pub fn transaction_manager(&self) -> &TransactionManager {
        &self.inner.transactions
    }

    /// Pool running constraint checks
    pub(crate) fn constraint_pool(&self) -> Result<Arc<ThreadPool>> {
        let workers = self.inner.config.constraint_workers;
        self.inner
            .constraint_pool
            .get_or_init(|| {
                let mut builder = ThreadPoolBuilder::new().thread_name(|i| format!("hyperstore-constraints-{}", i));
                if workers > 0 {
                    builder = builder.num_threads(workers);
                }
                let pool = builder.build().map(Arc::new).map_err(|e| e.to_string())?;
                debug!(threads = pool.current_num_threads(), "constraint pool started");
                Ok(pool)
            })
            .clone()
            .map_err(|e| Error::InvalidState(format!("constraint pool: {}", e)))
    }

    /// Drop slot versions no snapshot can see anymore
    pub fn vacuum(&self) -> VacuumStats {
        let horizon = self.inner.transactions.vacuum_horizon();
        self.inner.graph.vacuum(horizon)
    }

    /// Point-in-time counters
    pub fn metrics(&self) -> StoreMetrics {
        StoreMetrics {
            transactions: self.inner.transactions.metrics(),
            active_sessions: self.inner.registry.active(),
            nodes: self.inner.graph.node_count(),
            locked_resources: self.inner.locks.locked_resources().len(),
        }
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("id", &self.inner.id)
            .field("registry", &self.inner.registry)
            .field("domains", &self.inner.domains)
            .finish()
    }
}

/// Store counters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoreMetrics {
    /// MVCC transaction counters
    pub transactions: TransactionMetrics,
    /// Live top-level sessions
    pub active_sessions: usize,
    /// Nodes held by the graph, all versions
    pub nodes: usize,
    /// Resources currently locked
    pub locked_resources: usize,
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for store configuration
///
/// # Example
///
/// ```ignore
/// let store = Store::builder()
///     .max_sessions(16)
///     .default_isolation(IsolationLevel::Serializable)
///     .notifier(Arc::new(AuditLog::default()))
///     .open()?;
/// ```
pub struct StoreBuilder {
    config: StoreConfig,
    notifiers: Vec<Arc<dyn EventNotifier>>,
    scope_factory: Arc<dyn ScopeFactory>,
}

impl StoreBuilder {
    /// Builder with default settings
    pub fn new() -> Self {
        Self {
            config: StoreConfig::default(),
            notifiers: Vec::new(),
            scope_factory: Arc::new(DefaultScopeFactory),
        }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Fix the store id
    pub fn store_id(mut self, id: StoreId) -> Self {
        self.config.store_id = Some(id);
        self
    }

    /// Maximum number of concurrent top-level sessions
    pub fn max_sessions(mut self, max: usize) -> Self {
        self.config.max_sessions = max;
        self
    }

    /// Lock wait budget
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.config.lock_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Constraint worker threads; 0 means one per CPU
    pub fn constraint_workers(mut self, workers: usize) -> Self {
        self.config.constraint_workers = workers;
        self
    }

    /// Isolation of sessions that do not choose one
    pub fn default_isolation(mut self, level: IsolationLevel) -> Self {
        self.config.default_isolation = level;
        self
    }

    /// Add a notifier
    pub fn notifier(mut self, notifier: Arc<dyn EventNotifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    /// Use a custom transaction scope coordinator
    pub fn scope_factory(mut self, factory: Arc<dyn ScopeFactory>) -> Self {
        self.scope_factory = factory;
        self
    }

    /// Open the store
    ///
    /// # Errors
    ///
    /// `Config` when the configuration fails validation.
    pub fn open(self) -> Result<Store> {
        self.config.validate()?;
        let id = self.config.store_id.unwrap_or_default();
        let registry = SessionRegistry::new(self.config.max_sessions)?;
        let locks = LockManager::with_timeouts(self.config.lock_timeout(), self.config.lock_poll_interval());

        info!(
            store_id = %id,
            max_sessions = self.config.max_sessions,
            isolation = ?self.config.default_isolation,
            "store opened"
        );
        Ok(Store {
            inner: Arc::new(StoreInner {
                id,
                registry,
                locks,
                transactions: TransactionManager::default(),
                graph: Arc::new(GraphStore::new()),
                domains: DomainRegistry::new(),
                notifiers: RwLock::new(self.notifiers),
                scope_factory: self.scope_factory,
                constraint_pool: OnceCell::new(),
                next_session_id: AtomicU64::new(1),
                config: self.config,
            }),
        })
    }
}

impl Default for StoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}
