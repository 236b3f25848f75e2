//! Shared test harness
//!
//! `TestStore` opens a store with an "hr" memory domain and exposes
//! recorders for notifications and transaction scopes.

#![allow(dead_code)]

use hyperstore_engine::{EnlistedTransactionScope, ScopeFactory, TransactionScope};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub use hyperstore::prelude::*;

/// Install a subscriber once; `RUST_LOG` selects the level
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Store plus recorders
pub struct TestStore {
    pub db: Hyperstore,
    pub hr: Arc<MemoryDomain>,
    pub notifier: Arc<RecordingNotifier>,
    pub scopes: Arc<RecordingScopeFactory>,
}

impl TestStore {
    pub fn new() -> Self {
        Self::with(|b| b)
    }

    /// Customize the builder before opening
    pub fn with(configure: impl FnOnce(HyperstoreBuilder) -> HyperstoreBuilder) -> Self {
        init_tracing();
        let notifier = Arc::new(RecordingNotifier::default());
        let scopes = Arc::new(RecordingScopeFactory::default());
        let builder = Hyperstore::builder()
            .max_sessions(16)
            .lock_timeout(Duration::from_millis(500))
            .constraint_workers(2)
            .notifier(notifier.clone())
            .scope_factory(scopes.clone());
        let db = configure(builder).open().unwrap();
        let hr = db.create_domain("hr").unwrap();
        Self {
            db,
            hr,
            notifier,
            scopes,
        }
    }

    /// Store whose "hr" domain is validated by `constraints`
    pub fn with_constraints(constraints: Arc<dyn ConstraintManager>) -> Self {
        init_tracing();
        let notifier = Arc::new(RecordingNotifier::default());
        let scopes = Arc::new(RecordingScopeFactory::default());
        let db = Hyperstore::builder()
            .max_sessions(16)
            .lock_timeout(Duration::from_millis(500))
            .constraint_workers(2)
            .notifier(notifier.clone())
            .scope_factory(scopes.clone())
            .open()
            .unwrap();
        let hr = db.create_domain_with_constraints("hr", constraints).unwrap();
        Self {
            db,
            hr,
            notifier,
            scopes,
        }
    }

    pub fn begin(&self) -> Session {
        self.db.begin_session(SessionConfiguration::new()).unwrap()
    }

    /// Commit an employee entity with a name in its own session
    pub fn seed(&self, key: &str, name: &str) -> Identity {
        let id = employee_id(key);
        self.db
            .transact(|s| {
                s.execute(vec![
                    GraphCommand::add_entity(id.clone(), employee_schema()),
                    GraphCommand::set_property(id.clone(), "name", json!(name)),
                ])
            })
            .unwrap();
        id
    }

    /// Committed name of an employee, read in a fresh read-only session
    pub fn name_of(&self, id: &Identity) -> Option<serde_json::Value> {
        let hr = Arc::clone(&self.hr);
        self.db.read(|s| hr.get_property(s, id, "name")).unwrap()
    }

    /// Whether an element is visible to a fresh read-only session
    pub fn exists(&self, id: &Identity) -> bool {
        let hr = Arc::clone(&self.hr);
        self.db.read(|s| hr.get_element(s, id)).unwrap().is_some()
    }
}

pub fn employee_id(key: &str) -> Identity {
    Identity::new("hr", key)
}

pub fn employee_schema() -> Identity {
    Identity::new("hr", "Employee")
}

pub fn add_employee(key: &str) -> GraphCommand {
    GraphCommand::add_entity(employee_id(key), employee_schema())
}

// ============================================================================
// Recorders
// ============================================================================

/// Counts every notification it receives
#[derive(Default)]
pub struct RecordingNotifier {
    pub events: AtomicUsize,
    pub completed: Mutex<Vec<SessionInformation>>,
    pub messages: Mutex<Vec<ExecutionResult>>,
}

impl RecordingNotifier {
    pub fn completed_count(&self) -> usize {
        self.completed.lock().len()
    }

    pub fn messages_count(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn last_completed(&self) -> Option<SessionInformation> {
        self.completed.lock().last().cloned()
    }
}

impl EventNotifier for RecordingNotifier {
    fn notify_event(&self, _session: &SessionHandle, _event: &Event) {
        self.events.fetch_add(1, Ordering::SeqCst);
    }

    fn notify_session_completed(&self, info: &SessionInformation) {
        self.completed.lock().push(info.clone());
    }

    fn notify_messages(&self, _info: &SessionInformation, messages: &ExecutionResult) {
        self.messages.lock().push(messages.clone());
    }
}

/// Scope factory counting scope outcomes
#[derive(Default)]
pub struct RecordingScopeFactory {
    pub created: AtomicUsize,
    pub completed: Arc<AtomicUsize>,
    pub disposed: Arc<AtomicUsize>,
}

impl RecordingScopeFactory {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn disposed(&self) -> usize {
        self.disposed.load(Ordering::SeqCst)
    }
}

impl ScopeFactory for RecordingScopeFactory {
    fn create_scope(&self, _config: &SessionConfiguration) -> Box<dyn TransactionScope> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Box::new(RecordingScope {
            inner: EnlistedTransactionScope::new(),
            completed: Arc::clone(&self.completed),
            disposed: Arc::clone(&self.disposed),
        })
    }
}

struct RecordingScope {
    inner: EnlistedTransactionScope,
    completed: Arc<AtomicUsize>,
    disposed: Arc<AtomicUsize>,
}

impl TransactionScope for RecordingScope {
    fn enlist(&mut self, resource: Arc<dyn Enlistment>) {
        self.inner.enlist(resource);
    }

    fn complete(&mut self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
        self.inner.complete();
    }

    fn is_completed(&self) -> bool {
        self.inner.is_completed()
    }

    fn dispose(self: Box<Self>) -> Result<()> {
        self.disposed.fetch_add(1, Ordering::SeqCst);
        let this = *self;
        Box::new(this.inner).dispose()
    }
}
