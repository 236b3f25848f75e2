//! Shared state of one session lineage
//!
//! A top-level session creates a [`SessionDataContext`]; nested sessions and
//! worker-thread handles of the same lineage share it through the store's
//! registry. Each nesting level pushes a [`SessionLocalInfo`] frame.

use crate::config::SessionConfiguration;
use crate::notify::SessionInformation;
use crate::scope::TransactionScope;
use crate::tracking::SessionTrackingData;
use hyperstore_concurrency::{LockEntry, TxnHandle};
use hyperstore_core::{
    CancellationToken, Event, ExecutionResult, IsolationLevel, SessionId, SessionMode, StoreId,
};
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::any::Any;
use std::sync::Arc;
use std::thread::ThreadId;

/// Callback run once when the top-level session completes
pub type CompletingCallback = Box<dyn FnOnce(&SessionInformation) + Send>;

/// Per-session resource shared by a domain across commands
pub(crate) type DomainResource = Arc<dyn Any + Send + Sync>;

/// One nesting level
#[derive(Debug, Clone, Default)]
pub struct SessionLocalInfo {
    /// Domain used when none is named
    pub default_domain: Option<String>,
    /// Flags of this level, including the enclosing level's
    pub mode: SessionMode,
    /// Store the changes originate from
    pub origin_store_id: Option<StoreId>,
    /// Set by `accept_changes`
    pub committed: bool,
    /// Caller-defined key/value bag
    pub infos: FxHashMap<String, Value>,
    /// Commands are refused at this level and the levels it encloses
    pub read_only: bool,
    /// Closed while inner levels were still open; popped with them
    pub(crate) closed_early: bool,
}

impl SessionLocalInfo {
    /// Frame for a new level, inheriting from the enclosing one
    pub(crate) fn new(config: &SessionConfiguration, parent: Option<&SessionLocalInfo>) -> Self {
        let (mode, default_domain, origin, read_only) = match parent {
            Some(p) => (
                config.mode | p.mode,
                config.default_domain.clone().or_else(|| p.default_domain.clone()),
                config.origin.or(p.origin_store_id),
                config.read_only || p.read_only,
            ),
            None => (config.mode, config.default_domain.clone(), config.origin, config.read_only),
        };
        Self {
            default_domain,
            mode,
            origin_store_id: origin,
            committed: false,
            infos: FxHashMap::default(),
            read_only,
            closed_early: false,
        }
    }
}

/// State shared by every handle of one session lineage
pub struct SessionDataContext {
    pub(crate) session_id: SessionId,
    pub(crate) isolation: IsolationLevel,
    /// Configured read-only status
    pub(crate) configured_read_only: bool,
    /// Live flag; flipped on at disposal
    pub(crate) read_only: bool,
    pub(crate) aborted: bool,
    pub(crate) disposing: bool,
    pub(crate) in_validation: bool,
    pub(crate) execution_scope: usize,
    pub(crate) stack: Vec<SessionLocalInfo>,
    pub(crate) locks: Vec<LockEntry>,
    pub(crate) tracking: SessionTrackingData,
    pub(crate) events: Vec<Event>,
    pub(crate) messages: ExecutionResult,
    pub(crate) scope: Option<Box<dyn TransactionScope>>,
    pub(crate) resources: FxHashMap<String, DomainResource>,
    pub(crate) txn: Option<TxnHandle>,
    pub(crate) store_id: StoreId,
    pub(crate) cancellation: CancellationToken,
    pub(crate) trackers: Vec<Arc<dyn Any + Send + Sync>>,
    pub(crate) completing: Vec<CompletingCallback>,
    pub(crate) owner_thread: ThreadId,
}

impl SessionDataContext {
    pub(crate) fn new(
        session_id: SessionId,
        config: &SessionConfiguration,
        isolation: IsolationLevel,
        store_id: StoreId,
        scope: Box<dyn TransactionScope>,
        txn: TxnHandle,
    ) -> Self {
        Self {
            session_id,
            isolation,
            configured_read_only: config.read_only,
            read_only: config.read_only,
            aborted: false,
            disposing: false,
            in_validation: false,
            execution_scope: 0,
            stack: vec![SessionLocalInfo::new(config, None)],
            locks: Vec::new(),
            tracking: SessionTrackingData::new(),
            events: Vec::new(),
            messages: ExecutionResult::new(),
            scope: Some(scope),
            resources: FxHashMap::default(),
            txn: Some(txn),
            store_id,
            cancellation: config.cancellation.clone().unwrap_or_default(),
            trackers: Vec::new(),
            completing: Vec::new(),
            owner_thread: std::thread::current().id(),
        }
    }

    /// Nesting depth; 0 once the last level was popped
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Innermost frame
    pub fn top(&self) -> Option<&SessionLocalInfo> {
        self.stack.last()
    }

    pub(crate) fn top_mut(&mut self) -> Option<&mut SessionLocalInfo> {
        self.stack.last_mut()
    }

    /// Whether commands may run at the innermost level
    pub fn is_writable(&self) -> bool {
        !self.read_only && !self.top().map_or(false, |f| f.read_only)
    }

    /// Mode of the innermost level
    pub fn mode(&self) -> SessionMode {
        self.top().map(|f| f.mode).unwrap_or_default()
    }

    /// Origin of the innermost level, defaulting to the store
    pub fn origin_store_id(&self) -> Option<StoreId> {
        self.top().map(|f| f.origin_store_id.unwrap_or(self.store_id))
    }

    /// Default domain of the innermost level
    pub fn default_domain(&self) -> Option<&str> {
        self.top().and_then(|f| f.default_domain.as_deref())
    }

    /// Search context infos from the innermost level outwards
    pub fn context_info(&self, key: &str) -> Option<&Value> {
        self.stack.iter().rev().find_map(|f| f.infos.get(key))
    }

    /// Build the completion summary
    pub(crate) fn information(&self, index: hyperstore_core::SessionIndex) -> SessionInformation {
        let outer = self.stack.first();
        SessionInformation {
            session_id: self.session_id,
            index,
            store_id: self.store_id,
            origin_store_id: outer.and_then(|f| f.origin_store_id).unwrap_or(self.store_id),
            mode: outer.map(|f| f.mode).unwrap_or_default(),
            read_only: self.configured_read_only,
            aborted: self.aborted,
            events: self.events.clone(),
            involved_elements: self.tracking.involved_elements().to_vec(),
            messages: self.messages.clone(),
            context_infos: outer.map(|f| f.infos.clone()).unwrap_or_default(),
            default_domain: outer.and_then(|f| f.default_domain.clone()),
            completed_at: chrono::Utc::now(),
        }
    }
}

impl std::fmt::Debug for SessionDataContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionDataContext")
            .field("session_id", &self.session_id)
            .field("depth", &self.stack.len())
            .field("read_only", &self.read_only)
            .field("aborted", &self.aborted)
            .field("disposing", &self.disposing)
            .field("locks", &self.locks.len())
            .field("events", &self.events.len())
            .finish()
    }
}
