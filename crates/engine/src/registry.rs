//! Session registry and thread binding
//!
//! Each store owns a registry mapping session indices to the shared context
//! of the lineage holding that index. A per-thread table records which index
//! the thread is working under, keyed by registry so that two stores used on
//! one thread never see each other's sessions.
//!
//! # Contract
//!
//! - An entry is inserted right after its index is acquired and removed
//!   right before the index is released, both by the owning thread.
//! - Bindings change only at session creation and teardown, and while a
//!   constraint worker runs under a borrowed session.

use crate::context::SessionDataContext;
use dashmap::DashMap;
use hyperstore_concurrency::SessionIndexPool;
use hyperstore_core::{Result, SessionIndex};
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Shared handle on a lineage's context
pub type SharedContext = Arc<Mutex<SessionDataContext>>;

static NEXT_REGISTRY_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static BINDINGS: RefCell<SmallVec<[(u64, SessionIndex); 2]>> = RefCell::new(SmallVec::new());
}

/// Index pool plus index-to-context map of one store
pub struct SessionRegistry {
    id: u64,
    pool: SessionIndexPool,
    contexts: DashMap<u16, SharedContext>,
}

impl SessionRegistry {
    /// Create a registry for at most `capacity` concurrent lineages
    pub fn new(capacity: usize) -> Result<Self> {
        Ok(Self {
            id: NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed),
            pool: SessionIndexPool::new(capacity)?,
            contexts: DashMap::new(),
        })
    }

    /// Capacity of the index pool
    pub fn capacity(&self) -> usize {
        self.pool.capacity()
    }

    /// Number of live lineages
    pub fn active(&self) -> usize {
        self.pool.in_use()
    }

    pub(crate) fn acquire_index(&self) -> Result<SessionIndex> {
        self.pool.acquire()
    }

    pub(crate) fn release_index(&self, index: SessionIndex) -> Result<()> {
        self.pool.release(index)
    }

    pub(crate) fn register(&self, index: SessionIndex, context: SharedContext) {
        self.contexts.insert(index.get(), context);
    }

    pub(crate) fn remove(&self, index: SessionIndex) -> Option<SharedContext> {
        self.contexts.remove(&index.get()).map(|(_, ctx)| ctx)
    }

    /// Context registered under an index
    pub fn get(&self, index: SessionIndex) -> Option<SharedContext> {
        self.contexts.get(&index.get()).map(|entry| Arc::clone(entry.value()))
    }

    // ========================================================================
    // Thread binding
    // ========================================================================

    /// Index bound to the calling thread
    pub fn bound_index(&self) -> Option<SessionIndex> {
        BINDINGS.with(|b| b.borrow().iter().find(|(id, _)| *id == self.id).map(|(_, idx)| *idx))
    }

    /// Bind the calling thread to `index`; returns the previous binding
    pub(crate) fn bind(&self, index: SessionIndex) -> Option<SessionIndex> {
        BINDINGS.with(|b| {
            let mut bindings = b.borrow_mut();
            match bindings.iter_mut().find(|(id, _)| *id == self.id) {
                Some(slot) => Some(std::mem::replace(&mut slot.1, index)),
                None => {
                    bindings.push((self.id, index));
                    None
                }
            }
        })
    }

    /// Remove the calling thread's binding
    pub(crate) fn unbind(&self) -> Option<SessionIndex> {
        BINDINGS.with(|b| {
            let mut bindings = b.borrow_mut();
            let pos = bindings.iter().position(|(id, _)| *id == self.id)?;
            Some(bindings.remove(pos).1)
        })
    }

    /// Context of the session bound to the calling thread
    pub fn current(&self) -> Option<(SessionIndex, SharedContext)> {
        let index = self.bound_index()?;
        self.get(index).map(|ctx| (index, ctx))
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("id", &self.id)
            .field("capacity", &self.pool.capacity())
            .field("active", &self.pool.in_use())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_bindings_are_per_registry() {
        let a = SessionRegistry::new(4).unwrap();
        let b = SessionRegistry::new(4).unwrap();

        let idx = a.acquire_index().unwrap();
        assert_eq!(a.bind(idx), None);
        assert_eq!(a.bound_index(), Some(idx));
        assert_eq!(b.bound_index(), None);

        assert_eq!(a.unbind(), Some(idx));
        assert_eq!(a.bound_index(), None);
        assert_eq!(a.unbind(), None);
    }

    #[test]
    fn test_bind_replaces_and_returns_previous() {
        let reg = SessionRegistry::new(4).unwrap();
        let first = reg.acquire_index().unwrap();
        let second = reg.acquire_index().unwrap();
        reg.bind(first);
        assert_eq!(reg.bind(second), Some(first));
        assert_eq!(reg.bound_index(), Some(second));
        reg.unbind();
    }

    #[test]
    fn test_bindings_are_per_thread() {
        let reg = Arc::new(SessionRegistry::new(4).unwrap());
        let idx = reg.acquire_index().unwrap();
        reg.bind(idx);

        let other = Arc::clone(&reg);
        let seen = thread::spawn(move || other.bound_index()).join().unwrap();
        assert_eq!(seen, None);
        assert_eq!(reg.bound_index(), Some(idx));
        reg.unbind();
    }

    #[test]
    fn test_current_requires_registered_context() {
        let reg = SessionRegistry::new(4).unwrap();
        let idx = reg.acquire_index().unwrap();
        reg.bind(idx);
        assert!(reg.current().is_none());
        assert!(reg.remove(idx).is_none());
        reg.unbind();
        reg.release_index(idx).unwrap();
        assert_eq!(reg.active(), 0);
    }
}
