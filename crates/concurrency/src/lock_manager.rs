//! Pessimistic element locks
//!
//! Sessions lock the elements they write (and, under serializable isolation,
//! the elements they read). Locks are held until the outermost session ends
//! and are then released together with [`LockManager::release_locks`].
//!
//! # Deadlocks
//!
//! There is no deadlock detection. [`LockManager::acquire_all`] acquires in
//! the canonical [`ResourceKey`] order, which rules out cycles between callers
//! that go through it; every other wait is bounded by the lock timeout.

use hyperstore_core::{CancellationToken, Error, Identity, LockMode, Result, SessionId};
use parking_lot::{Condvar, Mutex, MutexGuard};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Default time a session waits for a lock
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Default upper bound between two checks of the cancellation token
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Lockable resource
///
/// Keys compare structurally: an attribute key never equals the key of its
/// owning element, whatever the strings look like.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKey {
    /// A whole element
    Element(Identity),
    /// One property of an element
    Attribute(Identity, String),
    /// An application-defined resource
    Named(String),
}

impl ResourceKey {
    /// Key for an element, or for one of its properties
    pub fn for_element(id: &Identity, property: Option<&str>) -> Self {
        match property {
            Some(property) => ResourceKey::Attribute(id.clone(), property.to_string()),
            None => ResourceKey::Element(id.clone()),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKey::Element(id) => write!(f, "element {}", id),
            ResourceKey::Attribute(id, property) => write!(f, "attribute {}.{}", id, property),
            ResourceKey::Named(name) => write!(f, "resource {}", name),
        }
    }
}

/// A granted lock, owned by the session's lock list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockEntry {
    /// Locked resource
    pub resource: ResourceKey,
    /// Mode granted
    pub mode: LockMode,
    /// Owning session
    pub session: SessionId,
}

#[derive(Debug, Clone, Copy)]
struct Holder {
    session: SessionId,
    mode: LockMode,
    count: u32,
}

#[derive(Debug, Default)]
struct LockState {
    holders: SmallVec<[Holder; 2]>,
}

impl LockState {
    /// Grant the lock if compatible with current holders
    fn try_grant(&mut self, session: SessionId, mode: LockMode) -> bool {
        let sole_holder = self.holders.len() == 1;
        if let Some(own) = self.holders.iter_mut().find(|h| h.session == session) {
            match (own.mode, mode) {
                (LockMode::Exclusive, _) | (LockMode::Shared, LockMode::Shared) => {
                    own.count += 1;
                    true
                }
                (LockMode::Shared, LockMode::Exclusive) if sole_holder => {
                    own.mode = LockMode::Exclusive;
                    own.count += 1;
                    true
                }
                _ => false,
            }
        } else if self.holders.iter().all(|h| h.mode.is_compatible_with(mode)) {
            self.holders.push(Holder {
                session,
                mode,
                count: 1,
            });
            true
        } else {
            false
        }
    }

    fn release(&mut self, session: SessionId) -> bool {
        match self.holders.iter().position(|h| h.session == session) {
            Some(pos) => {
                self.holders[pos].count -= 1;
                if self.holders[pos].count == 0 {
                    self.holders.remove(pos);
                }
                true
            }
            None => false,
        }
    }
}

/// Table of element locks shared by all sessions of a store
pub struct LockManager {
    table: Mutex<FxHashMap<ResourceKey, LockState>>,
    released: Condvar,
    timeout: Duration,
    poll_interval: Duration,
}

impl LockManager {
    /// Create a lock manager with default timings
    pub fn new() -> Self {
        Self::with_timeouts(DEFAULT_LOCK_TIMEOUT, DEFAULT_POLL_INTERVAL)
    }

    /// Create a lock manager
    ///
    /// # Arguments
    ///
    /// * `timeout` - Default time to wait for a lock
    /// * `poll_interval` - Upper bound between cancellation checks while waiting
    pub fn with_timeouts(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            table: Mutex::new(FxHashMap::default()),
            released: Condvar::new(),
            timeout,
            poll_interval: poll_interval.max(Duration::from_millis(1)),
        }
    }

    /// Default time to wait for a lock
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn try_grant(
        table: &mut MutexGuard<'_, FxHashMap<ResourceKey, LockState>>,
        session: SessionId,
        resource: &ResourceKey,
        mode: LockMode,
    ) -> bool {
        match table.get_mut(resource) {
            Some(state) => state.try_grant(session, mode),
            None => {
                let mut state = LockState::default();
                state.try_grant(session, mode);
                table.insert(resource.clone(), state);
                true
            }
        }
    }

    /// Acquire one lock, waiting until it is compatible
    ///
    /// Re-entrant: a session already holding the resource is granted again
    /// immediately, and a sole shared holder may upgrade to exclusive.
    ///
    /// # Errors
    ///
    /// - `Cancelled` if `cancel` fires before the lock is granted
    /// - `LockTimeout` if the lock is not granted within `timeout` (or the
    ///   manager's default)
    pub fn acquire(
        &self,
        session: SessionId,
        resource: ResourceKey,
        mode: LockMode,
        cancel: &CancellationToken,
        timeout: Option<Duration>,
    ) -> Result<LockEntry> {
        let timeout = timeout.unwrap_or(self.timeout);
        let started = Instant::now();
        let deadline = started + timeout;
        let mut table = self.table.lock();
        let mut waited = false;

        loop {
            cancel.check()?;
            if Self::try_grant(&mut table, session, &resource, mode) {
                if waited {
                    debug!(
                        session_id = %session,
                        resource = %resource,
                        waited_ms = started.elapsed().as_millis() as u64,
                        "lock granted after wait"
                    );
                }
                return Ok(LockEntry {
                    resource,
                    mode,
                    session,
                });
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(session_id = %session, resource = %resource, %mode, "lock wait timed out");
                return Err(Error::LockTimeout {
                    resource: resource.to_string(),
                    mode: mode.to_string(),
                    elapsed: now - started,
                });
            }

            waited = true;
            let wait = (deadline - now).min(self.poll_interval);
            self.released.wait_for(&mut table, wait);
        }
    }

    /// Acquire several locks in canonical order
    ///
    /// Resources are sorted and de-duplicated before acquisition. On failure
    /// the locks granted by this call are released again.
    pub fn acquire_all<I>(
        &self,
        session: SessionId,
        resources: I,
        mode: LockMode,
        cancel: &CancellationToken,
        timeout: Option<Duration>,
    ) -> Result<Vec<LockEntry>>
    where
        I: IntoIterator<Item = ResourceKey>,
    {
        let mut resources: Vec<ResourceKey> = resources.into_iter().collect();
        resources.sort();
        resources.dedup();

        let mut granted = Vec::with_capacity(resources.len());
        for resource in resources {
            match self.acquire(session, resource, mode, cancel, timeout) {
                Ok(entry) => granted.push(entry),
                Err(e) => {
                    // Entries granted here are not in any lock list yet
                    let _ = self.release_locks(&granted, true);
                    return Err(e);
                }
            }
        }
        Ok(granted)
    }

    /// Release a session's locks
    ///
    /// Every entry is released even if an earlier one fails. An entry the
    /// table does not know about means the lock table is inconsistent and is
    /// reported as `Critical`.
    pub fn release_locks(&self, entries: &[LockEntry], aborted: bool) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut unknown = Vec::new();
        {
            let mut table = self.table.lock();
            for entry in entries {
                let released = match table.get_mut(&entry.resource) {
                    Some(state) => {
                        let ok = state.release(entry.session);
                        if state.holders.is_empty() {
                            table.remove(&entry.resource);
                        }
                        ok
                    }
                    None => false,
                };
                if !released {
                    unknown.push(entry.resource.to_string());
                }
            }
        }
        self.released.notify_all();

        debug!(count = entries.len(), aborted, "locks released");

        if unknown.is_empty() {
            Ok(())
        } else {
            error!(unknown = ?unknown, "released locks missing from the lock table");
            Err(Error::Critical(format!(
                "lock table inconsistent: {} lock(s) not held: {}",
                unknown.len(),
                unknown.join(", ")
            )))
        }
    }

    /// Current holders of a resource
    pub fn holders(&self, resource: &ResourceKey) -> Vec<(SessionId, LockMode)> {
        self.table
            .lock()
            .get(resource)
            .map(|state| state.holders.iter().map(|h| (h.session, h.mode)).collect())
            .unwrap_or_default()
    }

    /// Every resource with at least one holder, in canonical order
    pub fn locked_resources(&self) -> Vec<ResourceKey> {
        let mut keys: Vec<ResourceKey> = self.table.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Check whether any session holds the resource
    pub fn is_locked(&self, resource: &ResourceKey) -> bool {
        self.table.lock().contains_key(resource)
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LockManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockManager")
            .field("locked", &self.table.lock().len())
            .field("timeout", &self.timeout)
            .finish()
    }
}
