//! Transaction manager for MVCC version allocation
//!
//! Coordinates which versions exist and which are still running:
//! 1. `begin()` allocates a version for writers and takes a snapshot
//! 2. `refresh()` re-snapshots read-committed sessions between commands
//! 3. `finish()` retires the version, making its slots visible to every
//!    snapshot taken afterwards
//!
//! ## Ordering
//!
//! ```text
//! 1. storage commit (drop undo log) or rollback (replay undo log)
//! 2. finish(handle)          - version leaves the in-flight set
//! 3. release element locks   - next writer may proceed
//! ```
//!
//! Rolling back before finishing means no snapshot ever observes a
//! half-undone transaction as committed.

use hyperstore_core::Version;
use hyperstore_storage::Snapshot;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::debug;

/// Registration of one running transaction
///
/// Not `Clone`: a handle is finished exactly once.
#[derive(Debug)]
pub struct TxnHandle {
    ticket: u64,
    version: Option<Version>,
    snapshot: Snapshot,
}

impl TxnHandle {
    /// Version stamped on this transaction's writes, `None` for readers
    pub fn version(&self) -> Option<Version> {
        self.version
    }

    /// Current snapshot
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// True when the transaction cannot write
    pub fn is_read_only(&self) -> bool {
        self.version.is_none()
    }
}

/// Point-in-time counters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransactionMetrics {
    /// Transactions finished as committed
    pub committed: u64,
    /// Transactions finished as aborted
    pub aborted: u64,
    /// Transactions currently running
    pub active: usize,
    /// Highest version allocated
    pub current_version: Version,
    /// committed / (committed + aborted), 1.0 when nothing finished yet
    pub commit_rate: f64,
    /// Committed transactions per second since the manager was created
    pub commits_per_sec: f64,
}

#[derive(Debug, Default)]
struct ActiveSet {
    /// Oldest version each registered snapshot may still need
    floors: FxHashMap<u64, Version>,
    /// Writer versions not yet finished
    writers: BTreeSet<Version>,
}

/// Allocates versions and tracks running transactions
///
/// # Thread Safety
///
/// Version allocation and snapshot capture happen under one lock so that a
/// version is in the in-flight set before any other snapshot can observe the
/// new high-water mark.
pub struct TransactionManager {
    /// Highest allocated version
    version: AtomicU64,
    /// Next registration ticket
    next_ticket: AtomicU64,
    active: Mutex<ActiveSet>,
    committed: AtomicU64,
    aborted: AtomicU64,
    created: Instant,
}

impl TransactionManager {
    /// Create a new transaction manager
    ///
    /// # Arguments
    /// * `initial_version` - Versions handed out start after this one
    pub fn new(initial_version: Version) -> Self {
        TransactionManager {
            version: AtomicU64::new(initial_version),
            next_ticket: AtomicU64::new(1),
            active: Mutex::new(ActiveSet::default()),
            committed: AtomicU64::new(0),
            aborted: AtomicU64::new(0),
            created: Instant::now(),
        }
    }

    /// Highest version allocated so far
    pub fn current_version(&self) -> Version {
        self.version.load(Ordering::SeqCst)
    }

    fn take_snapshot(active: &ActiveSet, own: Option<Version>, high_water: Version) -> Snapshot {
        Snapshot::new(own, high_water, active.writers.iter().copied().collect())
    }

    /// Start a transaction
    ///
    /// Writers get a fresh version; readers share the current high-water mark.
    pub fn begin(&self, read_only: bool) -> TxnHandle {
        let mut active = self.active.lock();
        let version = if read_only {
            None
        } else {
            Some(self.version.fetch_add(1, Ordering::SeqCst) + 1)
        };
        let snapshot = Self::take_snapshot(&active, version, self.current_version());

        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        active.floors.insert(ticket, snapshot.xmin());
        if let Some(v) = version {
            active.writers.insert(v);
        }
        debug!(ticket, version = ?version, high_water = snapshot.high_water(), "transaction started");

        TxnHandle {
            ticket,
            version,
            snapshot,
        }
    }

    /// Replace the handle's snapshot with a current one
    pub fn refresh(&self, handle: &mut TxnHandle) {
        let mut active = self.active.lock();
        let snapshot = Self::take_snapshot(&active, handle.version, self.current_version());
        active.floors.insert(handle.ticket, snapshot.xmin());
        handle.snapshot = snapshot;
    }

    /// Retire a transaction
    ///
    /// Call after the storage commit or rollback of the transaction's writes.
    pub fn finish(&self, handle: TxnHandle, committed: bool) {
        {
            let mut active = self.active.lock();
            active.floors.remove(&handle.ticket);
            if let Some(v) = handle.version {
                active.writers.remove(&v);
            }
        }
        if committed {
            self.committed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.aborted.fetch_add(1, Ordering::Relaxed);
        }
        debug!(ticket = handle.ticket, version = ?handle.version, committed, "transaction finished");
    }

    /// Oldest version any registered snapshot may still need
    ///
    /// Slots deleted by a version below the horizon are invisible to every
    /// live and future snapshot.
    pub fn vacuum_horizon(&self) -> Version {
        let active = self.active.lock();
        active
            .floors
            .values()
            .copied()
            .min()
            .unwrap_or_else(|| self.current_version() + 1)
    }

    /// Number of running transactions
    pub fn active_count(&self) -> usize {
        self.active.lock().floors.len()
    }

    /// Current counters
    pub fn metrics(&self) -> TransactionMetrics {
        let committed = self.committed.load(Ordering::Relaxed);
        let aborted = self.aborted.load(Ordering::Relaxed);
        let finished = committed + aborted;
        let elapsed = self.created.elapsed().as_secs_f64();
        TransactionMetrics {
            committed,
            aborted,
            active: self.active_count(),
            current_version: self.current_version(),
            commit_rate: if finished == 0 {
                1.0
            } else {
                committed as f64 / finished as f64
            },
            commits_per_sec: if elapsed > 0.0 {
                committed as f64 / elapsed
            } else {
                0.0
            },
        }
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new(0)
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("version", &self.current_version())
            .field("active", &self.active_count())
            .finish()
    }
}
