//! Sessions
//!
//! A session is the unit of work against a store. The first session opened
//! on a thread creates a lineage context; sessions opened while it is active
//! nest inside it and share that context. Only the outermost session decides
//! the outcome.
//!
//! # Lifecycle
//!
//! ```text
//! begin_session ──► active ──► close / drop
//!                                 │
//!                   nested: pop level, done
//!                                 │
//!                   outermost:
//!                     1. validate involved elements (constraint pool)
//!                     2. completion notification
//!                     3. complete scope (if not aborted and no errors)
//!                     4. dispose scope, finish MVCC transaction
//!                     5. release locks
//!                     6. unregister context, unbind thread, release index
//!                     7. notify messages, raise errors unless silent
//! ```
//!
//! # Handles
//!
//! - [`Session`]: owning, thread-affine RAII handle
//! - [`SessionHandle`]: cloneable view used by domains, constraints and
//!   `Store::current_session()`
//! - [`BorrowedSession`]: binds an existing lineage to a worker thread

use crate::command::DomainCommand;
use crate::config::SessionConfiguration;
use crate::constraints::ConstraintManager;
use crate::context::{DomainResource, SessionDataContext, SessionLocalInfo};
use crate::notify::{panic_message, EventNotifier, SessionInformation};
use crate::registry::SharedContext;
use crate::scope::Enlistment;
use crate::store::Store;
use crate::tracking::{TrackedElement, TrackingState};
use hyperstore_concurrency::ResourceKey;
use hyperstore_core::{
    CancellationToken, DiagnosticMessage, Error, Event, ExecutionResult, Identity, IsolationLevel, LockMode, Result,
    SessionId, SessionIndex, SessionMode, StoreId, Version,
};
use hyperstore_storage::Snapshot;
use parking_lot::Mutex;
use rayon::prelude::*;
use serde_json::Value;
use std::any::Any;
use std::marker::PhantomData;
use std::ops::Deref;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use tracing::{debug, error, warn};

// ============================================================================
// SessionHandle
// ============================================================================

/// Non-owning view of a session lineage
///
/// Cheap to clone and usable from any thread. Every query reflects the
/// innermost open nesting level.
#[derive(Clone)]
pub struct SessionHandle {
    store: Store,
    index: SessionIndex,
    ctx: SharedContext,
}

impl SessionHandle {
    pub(crate) fn new(store: Store, index: SessionIndex, ctx: SharedContext) -> Self {
        Self { store, index, ctx }
    }

    /// Store the session runs against
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Registry index of the lineage
    pub fn index(&self) -> SessionIndex {
        self.index
    }

    /// Lineage id
    pub fn session_id(&self) -> SessionId {
        self.ctx.lock().session_id
    }

    /// Number of open nesting levels
    pub fn depth(&self) -> usize {
        self.ctx.lock().depth()
    }

    /// True inside a nested session
    pub fn is_nested(&self) -> bool {
        self.depth() > 1
    }

    /// True when the lineage or the innermost level was opened read-only
    pub fn is_read_only(&self) -> bool {
        let ctx = self.ctx.lock();
        ctx.configured_read_only || ctx.top().map_or(false, |f| f.read_only)
    }

    /// True once the lineage is going to roll back
    pub fn is_aborted(&self) -> bool {
        self.ctx.lock().aborted
    }

    /// True while the outermost session is tearing down
    pub fn is_disposing(&self) -> bool {
        self.ctx.lock().disposing
    }

    /// True while constraint validation runs
    pub fn is_in_validation(&self) -> bool {
        self.ctx.lock().in_validation
    }

    /// Mode of the innermost level
    pub fn mode(&self) -> SessionMode {
        self.ctx.lock().mode()
    }

    /// Origin of the innermost level; the store id unless overridden
    pub fn origin_store_id(&self) -> Option<StoreId> {
        self.ctx.lock().origin_store_id()
    }

    /// Default domain of the innermost level
    pub fn default_domain(&self) -> Option<String> {
        self.ctx.lock().default_domain().map(str::to_string)
    }

    /// Isolation level of the lineage
    pub fn isolation_level(&self) -> IsolationLevel {
        self.ctx.lock().isolation
    }

    /// Cancellation token of the lineage
    pub fn cancellation_token(&self) -> CancellationToken {
        self.ctx.lock().cancellation.clone()
    }

    /// Events recorded so far
    pub fn events(&self) -> Vec<Event> {
        self.ctx.lock().events.clone()
    }

    /// Elements frozen for validation; empty before teardown
    pub fn involved_elements(&self) -> Vec<TrackedElement> {
        self.ctx.lock().tracking.involved_elements().to_vec()
    }

    /// Net tracked state of an element
    pub fn element_state(&self, id: &Identity) -> Option<TrackingState> {
        self.ctx.lock().tracking.element_state(id)
    }

    /// Diagnostics collected so far
    pub fn result(&self) -> ExecutionResult {
        self.ctx.lock().messages.clone()
    }

    /// True when an error diagnostic was recorded
    pub fn has_errors(&self) -> bool {
        self.ctx.lock().messages.has_errors()
    }

    /// True when a warning diagnostic was recorded
    pub fn has_warnings(&self) -> bool {
        self.ctx.lock().messages.has_warnings()
    }

    /// No errors, no warnings, not aborted
    pub fn succeeded(&self) -> bool {
        let ctx = self.ctx.lock();
        !(ctx.messages.has_errors() || ctx.messages.has_warnings() || ctx.aborted)
    }

    /// Snapshot reads go through
    pub fn snapshot(&self) -> Snapshot {
        let ctx = self.ctx.lock();
        match ctx.txn.as_ref() {
            Some(txn) => txn.snapshot().clone(),
            None => Snapshot::at(self.store.transaction_manager().current_version()),
        }
    }

    /// Snapshot for the next command; read-committed lineages get a fresh one
    pub fn command_snapshot(&self) -> Snapshot {
        let mut guard = self.ctx.lock();
        let ctx = &mut *guard;
        match ctx.txn.as_mut() {
            Some(txn) => {
                if ctx.isolation == IsolationLevel::ReadCommitted {
                    self.store.transaction_manager().refresh(txn);
                }
                txn.snapshot().clone()
            }
            None => Snapshot::at(self.store.transaction_manager().current_version()),
        }
    }

    /// Version stamped on this lineage's writes
    pub fn write_version(&self) -> Option<Version> {
        self.ctx.lock().txn.as_ref().and_then(|t| t.version())
    }

    // ========================================================================
    // Outcome
    // ========================================================================

    /// Vote to commit the innermost level
    pub fn accept_changes(&self) {
        if let Some(frame) = self.ctx.lock().top_mut() {
            frame.committed = true;
        }
    }

    /// Force the whole lineage to roll back
    pub fn reject_changes(&self) {
        self.ctx.lock().aborted = true;
    }

    /// Record a diagnostic; an error aborts the lineage
    pub fn log(&self, message: DiagnosticMessage) {
        let mut ctx = self.ctx.lock();
        if message.is_error() {
            ctx.aborted = true;
        }
        ctx.messages.add(message);
    }

    /// Run `callback` once when the top-level session completes
    ///
    /// Not called when the session is cancelled.
    pub fn on_completing<F>(&self, callback: F)
    where
        F: FnOnce(&SessionInformation) + Send + 'static,
    {
        self.ctx.lock().completing.push(Box::new(callback));
    }

    // ========================================================================
    // Context infos, mode, trackers
    // ========================================================================

    /// Look up a context value, innermost level first
    pub fn get_context_info(&self, key: &str) -> Option<Value> {
        self.ctx.lock().context_info(key).cloned()
    }

    /// Set a context value on the innermost level; `None` removes it
    pub fn set_context_info(&self, key: impl Into<String>, value: Option<Value>) {
        let key = key.into();
        if let Some(frame) = self.ctx.lock().top_mut() {
            match value {
                Some(value) => {
                    frame.infos.insert(key, value);
                }
                None => {
                    frame.infos.remove(&key);
                }
            }
        }
    }

    /// Add flags to the innermost level
    pub fn set_mode(&self, mode: SessionMode) {
        if let Some(frame) = self.ctx.lock().top_mut() {
            frame.mode |= mode;
        }
    }

    /// Make `tracker` the current calculated-property tracker
    ///
    /// The tracker is popped when the guard drops.
    pub fn push_tracker<T: Any + Send + Sync>(&self, tracker: Arc<T>) -> TrackerGuard {
        self.ctx.lock().trackers.push(tracker);
        TrackerGuard {
            session: self.clone(),
        }
    }

    /// Innermost tracker, if it has type `T`
    pub fn current_tracker<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let tracker = self.ctx.lock().trackers.last().cloned()?;
        tracker.downcast::<T>().ok()
    }

    // ========================================================================
    // Resources and locks
    // ========================================================================

    /// Enlist a resource into the lineage's transaction scope
    pub fn enlist(&self, resource: Arc<dyn Enlistment>) -> Result<()> {
        let mut ctx = self.ctx.lock();
        let scope = ctx
            .scope
            .as_mut()
            .ok_or_else(|| Error::InvalidState("transaction scope already disposed".into()))?;
        scope.enlist(resource);
        Ok(())
    }

    /// Get the per-session resource stored under `key`, creating and
    /// enlisting it on first use
    ///
    /// `init` runs with the session context locked and must not call back
    /// into the session.
    pub fn domain_resource<T, F>(&self, key: &str, init: F) -> Result<Arc<T>>
    where
        T: Enlistment + 'static,
        F: FnOnce() -> Result<T>,
    {
        let mut ctx = self.ctx.lock();
        if let Some(existing) = ctx.resources.get(key) {
            return Arc::clone(existing)
                .downcast::<T>()
                .map_err(|_| Error::InvalidState(format!("domain resource '{}' has another type", key)));
        }

        let scope = ctx
            .scope
            .as_mut()
            .ok_or_else(|| Error::InvalidState("transaction scope already disposed".into()))?;
        let resource = Arc::new(init()?);
        let enlisted: Arc<dyn Enlistment> = resource.clone();
        scope.enlist(enlisted);
        let stored: DomainResource = resource.clone();
        ctx.resources.insert(key.to_string(), stored);
        Ok(resource)
    }

    /// Lock an element, or one of its properties
    pub fn acquire_lock(&self, mode: LockMode, id: &Identity, property: Option<&str>) -> Result<()> {
        self.acquire_resource_lock(mode, ResourceKey::for_element(id, property))
    }

    /// Lock several elements in canonical order
    pub fn acquire_locks<I>(&self, mode: LockMode, ids: I) -> Result<()>
    where
        I: IntoIterator<Item = Identity>,
    {
        let (session_id, cancel) = self.lock_owner();
        let entries = self.store.lock_manager().acquire_all(
            session_id,
            ids.into_iter().map(ResourceKey::Element),
            mode,
            &cancel,
            None,
        )?;
        self.ctx.lock().locks.extend(entries);
        Ok(())
    }

    /// Lock an arbitrary resource
    ///
    /// Blocks until granted, cancelled, or timed out. The lock is held until
    /// the top-level session is disposed.
    pub fn acquire_resource_lock(&self, mode: LockMode, resource: ResourceKey) -> Result<()> {
        let (session_id, cancel) = self.lock_owner();
        let entry = self
            .store
            .lock_manager()
            .acquire(session_id, resource, mode, &cancel, None)?;
        self.ctx.lock().locks.push(entry);
        Ok(())
    }

    fn lock_owner(&self) -> (SessionId, CancellationToken) {
        let ctx = self.ctx.lock();
        (ctx.session_id, ctx.cancellation.clone())
    }

    /// Number of lock entries held by the lineage
    pub fn lock_count(&self) -> usize {
        self.ctx.lock().locks.len()
    }

    // ========================================================================
    // Events and commands
    // ========================================================================

    /// Record an event
    ///
    /// Marks it top-level when raised directly by a command, feeds the
    /// tracking collector and tells every notifier. Notifier panics are
    /// logged and swallowed.
    ///
    /// # Errors
    ///
    /// `ReadOnly` on read-only or disposing sessions.
    pub fn add_event(&self, mut event: Event) -> Result<()> {
        {
            let mut ctx = self.ctx.lock();
            if !ctx.is_writable() {
                return Err(Error::ReadOnly);
            }
            event.top_level = ctx.execution_scope == 1;
            ctx.tracking.on_event(&event);
            ctx.events.push(event.clone());
        }

        for notifier in self.store.notifiers() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| notifier.notify_event(self, &event)));
            if let Err(payload) = outcome {
                warn!(
                    index = %self.index,
                    event = event.kind.name(),
                    error = %panic_message(payload.as_ref()),
                    "event notifier panicked"
                );
            }
        }
        Ok(())
    }

    /// Run commands through their domains
    ///
    /// Commands are grouped by domain name, groups in order of first
    /// appearance and commands in source order within a group. A domain
    /// failure aborts the session and is reported as a "Command aborted"
    /// error diagnostic.
    ///
    /// # Errors
    ///
    /// - `ReadOnly` on read-only sessions
    /// - `DomainNotFound` if a domain name does not resolve
    /// - `Session` when the result has errors and the mode is not silent
    pub fn execute<I, C>(&self, commands: I) -> Result<ExecutionResult>
    where
        I: IntoIterator<Item = C>,
        C: Into<Box<dyn DomainCommand>>,
    {
        let commands: Vec<Box<dyn DomainCommand>> = commands.into_iter().map(Into::into).collect();
        if commands.is_empty() {
            return Ok(ExecutionResult::new());
        }

        let mode = {
            let mut ctx = self.ctx.lock();
            if !ctx.is_writable() {
                return Err(Error::ReadOnly);
            }
            ctx.execution_scope += 1;
            ctx.mode()
        };

        let mut groups: Vec<(String, Vec<Box<dyn DomainCommand>>)> = Vec::new();
        for command in commands {
            let name = command.domain_name().to_string();
            match groups.iter_mut().find(|(n, _)| *n == name) {
                Some((_, group)) => group.push(command),
                None => groups.push((name, vec![command])),
            }
        }

        let mut result = ExecutionResult::new();
        for (name, group) in &groups {
            let Some(domain) = self.store.domains().resolve(name) else {
                let mut ctx = self.ctx.lock();
                ctx.aborted = true;
                ctx.execution_scope -= 1;
                return Err(Error::DomainNotFound(name.clone()));
            };

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| domain.model().process_commands(self, group)));
            let failure = match outcome {
                Ok(Ok(messages)) => {
                    let failed = messages.has_errors();
                    result.merge(messages);
                    if failed {
                        self.reject_changes();
                    }
                    None
                }
                Ok(Err(e)) => Some(e.to_string()),
                Err(payload) => Some(panic_message(payload.as_ref())),
            };

            if let Some(reason) = failure {
                warn!(index = %self.index, domain = %name, error = %reason, "command aborted");
                result.add(DiagnosticMessage::error(format!("Command aborted: {}", reason)));
                self.reject_changes();
                break;
            }
        }

        {
            let mut ctx = self.ctx.lock();
            ctx.execution_scope -= 1;
            ctx.messages.extend(result.errors().cloned());
        }

        if result.has_errors() && !mode.is_silent() {
            return Err(Error::Session(result.into_messages()));
        }
        Ok(result)
    }

    // ========================================================================
    // Teardown helpers
    // ========================================================================

    /// Validate involved elements on the constraint pool
    fn check_constraints(&self, elements: &[TrackedElement]) -> ExecutionResult {
        let domains = self.store.domains();
        let mut groups: Vec<(Arc<dyn ConstraintManager>, Vec<TrackedElement>)> = Vec::new();
        for element in elements {
            let Some(manager) = domains.constraint_manager(element.schema.domain_model(), &element.domain) else {
                continue;
            };
            match groups.iter_mut().find(|(m, _)| same_manager(m, &manager)) {
                Some((_, group)) => group.push(element.clone()),
                None => groups.push((manager, vec![element.clone()])),
            }
        }
        if groups.is_empty() {
            return ExecutionResult::new();
        }

        let pool = match self.store.constraint_pool() {
            Ok(pool) => pool,
            Err(e) => {
                error!(index = %self.index, error = %e, "constraint pool unavailable");
                return ExecutionResult::from_messages(vec![DiagnosticMessage::error(format!(
                    "constraint validation unavailable: {}",
                    e
                ))]);
            }
        };

        debug!(index = %self.index, groups = groups.len(), elements = elements.len(), "checking constraints");
        let results: Vec<ExecutionResult> = pool.install(|| {
            groups
                .par_iter()
                .map(|(manager, group)| {
                    let borrowed = BorrowedSession::enter(self);
                    let outcome =
                        panic::catch_unwind(AssertUnwindSafe(|| manager.check_elements(borrowed.handle(), group)));
                    match outcome {
                        Ok(result) => result,
                        Err(payload) => {
                            let reason = panic_message(payload.as_ref());
                            error!(index = %self.index, error = %reason, "constraint check panicked");
                            ExecutionResult::from_messages(vec![DiagnosticMessage::error(format!(
                                "constraint check failed: {}",
                                reason
                            ))])
                        }
                    }
                })
                .collect()
        });

        let mut merged = ExecutionResult::new();
        for result in results {
            merged.merge(result);
        }
        merged
    }

    /// Tell notifiers and completing callbacks; failures become warnings
    fn fire_completed(&self, notifiers: &[Arc<dyn EventNotifier>]) -> SessionInformation {
        let (info, callbacks) = {
            let mut ctx = self.ctx.lock();
            (ctx.information(self.index), std::mem::take(&mut ctx.completing))
        };

        let mut failures = Vec::new();
        for notifier in notifiers {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| notifier.notify_session_completed(&info)));
            if let Err(payload) = outcome {
                failures.push(panic_message(payload.as_ref()));
            }
        }
        let info_ref = &info;
        for callback in callbacks {
            let outcome = panic::catch_unwind(AssertUnwindSafe(move || callback(info_ref)));
            if let Err(payload) = outcome {
                failures.push(panic_message(payload.as_ref()));
            }
        }

        if !failures.is_empty() {
            let mut ctx = self.ctx.lock();
            for reason in failures {
                warn!(index = %self.index, error = %reason, "completion listener failed");
                ctx.messages
                    .add(DiagnosticMessage::warning(format!("completion listener failed: {}", reason)));
            }
        }
        info
    }
}

fn same_manager(a: &Arc<dyn ConstraintManager>, b: &Arc<dyn ConstraintManager>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("index", &self.index)
            .field("context", &*self.ctx.lock())
            .finish()
    }
}

// ============================================================================
// TrackerGuard
// ============================================================================

/// Pops a calculated-property tracker on drop
#[must_use = "the tracker is popped when the guard drops"]
pub struct TrackerGuard {
    session: SessionHandle,
}

impl Drop for TrackerGuard {
    fn drop(&mut self) {
        self.session.ctx.lock().trackers.pop();
    }
}

// ============================================================================
// Session
// ============================================================================

/// Outcome of closing a session
#[derive(Debug, Clone)]
pub struct SessionResult {
    /// Lineage id
    pub session_id: SessionId,
    /// True for a nested level; the outcome is decided by the outermost one
    pub nested: bool,
    /// Whether the lineage is (or was) rolled back
    pub aborted: bool,
    /// Whether the changes were committed
    pub committed: bool,
    /// Final diagnostics (top-level only)
    pub messages: ExecutionResult,
}

impl SessionResult {
    /// True when an error diagnostic was recorded
    pub fn has_errors(&self) -> bool {
        self.messages.has_errors()
    }
}

/// Owning handle of one nesting level
///
/// Thread-affine: it must be closed on the thread that opened it, and
/// sessions of one lineage must be closed in reverse order of creation.
/// Dropping without [`close`](Session::close) runs the same teardown and
/// logs failures.
///
/// # Example
///
/// ```ignore
/// let session = store.begin_session(SessionConfiguration::new())?;
/// session.execute(vec![GraphCommand::add_entity(id, schema)])?;
/// session.accept_changes();
/// let result = session.close()?;
/// assert!(result.committed);
/// ```
pub struct Session {
    handle: SessionHandle,
    depth: usize,
    closed: bool,
    _thread_bound: PhantomData<*const ()>,
}

impl Session {
    pub(crate) fn begin(store: &Store, config: SessionConfiguration) -> Result<Session> {
        if let Some(token) = &config.cancellation {
            token.check()?;
        }
        let registry = store.registry();

        if let Some((index, ctx)) = registry.current() {
            let (session_id, depth) = {
                let mut c = ctx.lock();
                if c.stack.is_empty() || c.disposing {
                    return Err(Error::NestedInDisposingSession);
                }
                let frame = SessionLocalInfo::new(&config, c.top());
                c.stack.push(frame);
                (c.session_id, c.stack.len())
            };
            debug!(session_id = %session_id, index = %index, depth, "nested session started");
            return Ok(Session {
                handle: SessionHandle::new(store.clone(), index, ctx),
                depth,
                closed: false,
                _thread_bound: PhantomData,
            });
        }

        let index = registry.acquire_index()?;
        let session_id = config.session_id.unwrap_or_else(|| store.next_session_id());
        let isolation = config.isolation.unwrap_or(store.config().default_isolation);
        let txn = store.transaction_manager().begin(config.read_only);
        let scope = store.scope_factory().create_scope(&config);
        let ctx = Arc::new(Mutex::new(SessionDataContext::new(
            session_id,
            &config,
            isolation,
            store.id(),
            scope,
            txn,
        )));
        registry.register(index, Arc::clone(&ctx));
        registry.bind(index);
        debug!(
            session_id = %session_id,
            index = %index,
            read_only = config.read_only,
            ?isolation,
            "session started"
        );

        Ok(Session {
            handle: SessionHandle::new(store.clone(), index, ctx),
            depth: 1,
            closed: false,
            _thread_bound: PhantomData,
        })
    }

    /// Cloneable view of this session
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Close this level
    ///
    /// Nested levels only pop their frame. The outermost level validates,
    /// commits or rolls back, and releases everything the lineage holds.
    ///
    /// # Errors
    ///
    /// - `InvalidState` when closed out of creation order; the lineage is
    ///   aborted and this level is popped when its inner levels close
    /// - `Session` when the lineage ends with errors and is not silent or
    ///   cancelled
    /// - `Critical` when the lock table was found inconsistent
    pub fn close(mut self) -> Result<SessionResult> {
        self.dispose()
    }

    fn dispose(&mut self) -> Result<SessionResult> {
        self.closed = true;
        let (mode, remaining, cancelled, session_id, aborted) = {
            let mut ctx = self.handle.ctx.lock();
            let open = ctx.stack.len();
            if open < self.depth {
                return Err(Error::InvalidState("session already disposed".into()));
            }
            if open > self.depth {
                // the lineage rolls back; this level is popped with the last inner one
                ctx.aborted = true;
                ctx.stack[self.depth - 1].closed_early = true;
                warn!(index = %self.handle.index, depth = self.depth, open, "session closed out of order");
                return Err(Error::InvalidState(format!(
                    "session at depth {} closed while {} levels are open",
                    self.depth, open
                )));
            }

            let mut frame = ctx
                .stack
                .pop()
                .ok_or_else(|| Error::InvalidState("session already disposed".into()))?;
            let cancelled = ctx.cancellation.is_cancelled();
            if (!frame.committed && !ctx.read_only && !frame.read_only) || cancelled {
                ctx.aborted = true;
            }
            while ctx.top().map_or(false, |f| f.closed_early) {
                if let Some(outer) = ctx.stack.pop() {
                    frame = outer;
                }
            }
            (frame.mode, ctx.stack.len(), cancelled, ctx.session_id, ctx.aborted)
        };

        if remaining > 0 {
            debug!(session_id = %session_id, depth = self.depth, aborted, "nested session closed");
            return Ok(SessionResult {
                session_id,
                nested: true,
                aborted,
                committed: false,
                messages: ExecutionResult::new(),
            });
        }
        self.complete_top_level(mode, cancelled)
    }

    fn complete_top_level(&mut self, mode: SessionMode, cancelled: bool) -> Result<SessionResult> {
        let handle = self.handle.clone();
        let store = handle.store.clone();

        // 1. validation
        let to_check = {
            let mut ctx = handle.ctx.lock();
            ctx.disposing = true;
            if ctx.read_only {
                None
            } else {
                ctx.read_only = true;
                let aborted = ctx.aborted;
                let involved = ctx
                    .tracking
                    .prepare_model_elements(aborted, mode.contains(SessionMode::LOADING_SCHEMA));
                if involved && mode.checks_constraints() {
                    ctx.in_validation = true;
                    Some(ctx.tracking.involved_elements().to_vec())
                } else {
                    None
                }
            }
        };
        if let Some(elements) = to_check {
            let result = handle.check_constraints(&elements);
            let mut ctx = handle.ctx.lock();
            ctx.in_validation = false;
            if result.has_errors() {
                ctx.aborted = true;
            }
            ctx.messages.merge(result);
        }

        // 2. completion notification
        let notifiers = store.notifiers();
        let info = if cancelled {
            None
        } else {
            Some(handle.fire_completed(&notifiers))
        };

        // 3. + 4. scope outcome, then MVCC
        let (scope, txn, complete) = {
            let mut ctx = handle.ctx.lock();
            let complete = !ctx.aborted && !ctx.messages.has_errors();
            (ctx.scope.take(), ctx.txn.take(), complete)
        };
        let mut committed = false;
        if let Some(mut scope) = scope {
            if complete {
                scope.complete();
            }
            match scope.dispose() {
                Ok(()) => committed = complete,
                Err(e) => {
                    error!(index = %handle.index, error = %e, "transaction scope failed");
                    let mut ctx = handle.ctx.lock();
                    ctx.aborted = true;
                    ctx.messages
                        .add(DiagnosticMessage::error(format!("transaction scope failed: {}", e)));
                }
            }
        }
        if let Some(txn) = txn {
            store.transaction_manager().finish(txn, committed);
        }

        // 5. locks
        let locks = {
            let mut ctx = handle.ctx.lock();
            ctx.resources.clear();
            ctx.trackers.clear();
            std::mem::take(&mut ctx.locks)
        };
        let critical = store.lock_manager().release_locks(&locks, !committed).err();
        if let Some(e) = &critical {
            error!(index = %handle.index, error = %e, "lock release failed");
        }

        // 6. registry
        let registry = store.registry();
        registry.remove(handle.index);
        registry.unbind();
        if let Err(e) = registry.release_index(handle.index) {
            error!(index = %handle.index, error = %e, "session index release failed");
        }

        // 7. final messages
        let (messages, session_id, aborted) = {
            let ctx = handle.ctx.lock();
            (ctx.messages.clone(), ctx.session_id, ctx.aborted)
        };
        if let Some(info) = &info {
            for notifier in &notifiers {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| notifier.notify_messages(info, &messages)));
                if let Err(payload) = outcome {
                    warn!(index = %handle.index, error = %panic_message(payload.as_ref()), "message notifier panicked");
                }
            }
        }
        debug!(
            session_id = %session_id,
            index = %handle.index,
            committed,
            aborted,
            cancelled,
            messages = messages.len(),
            "session closed"
        );

        if let Some(e) = critical {
            return Err(e);
        }
        if messages.has_errors() && !mode.is_silent() && !cancelled {
            return Err(Error::Session(messages.into_messages()));
        }
        Ok(SessionResult {
            session_id,
            nested: false,
            aborted,
            committed,
            messages,
        })
    }
}

impl Deref for Session {
    type Target = SessionHandle;

    fn deref(&self) -> &SessionHandle {
        &self.handle
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.dispose() {
            match &e {
                Error::Session(_) => debug!(error = %e, "session dropped with errors"),
                _ if e.is_fatal() => error!(error = %e, "session teardown failed"),
                _ => warn!(error = %e, "session teardown failed"),
            }
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("index", &self.handle.index)
            .field("depth", &self.depth)
            .field("closed", &self.closed)
            .finish()
    }
}

// ============================================================================
// BorrowedSession
// ============================================================================

/// A lineage bound to a worker thread for the duration of a task
///
/// On drop the worker's previous binding is restored, unless the worker is
/// the thread that owns the session.
pub struct BorrowedSession {
    handle: SessionHandle,
    owner: ThreadId,
    previous: Option<SessionIndex>,
}

impl BorrowedSession {
    /// Bind `session` to the calling thread
    pub fn enter(session: &SessionHandle) -> Self {
        let owner = session.ctx.lock().owner_thread;
        let previous = session.store.registry().bind(session.index);
        Self {
            handle: session.clone(),
            owner,
            previous,
        }
    }

    /// The borrowed session
    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }
}

impl Deref for BorrowedSession {
    type Target = SessionHandle;

    fn deref(&self) -> &SessionHandle {
        &self.handle
    }
}

impl Drop for BorrowedSession {
    fn drop(&mut self) {
        if thread::current().id() == self.owner {
            return;
        }
        let registry = self.handle.store.registry();
        match self.previous {
            Some(previous) => {
                registry.bind(previous);
            }
            None => {
                registry.unbind();
            }
        }
    }
}
