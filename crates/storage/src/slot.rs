//! Versioned value record

use hyperstore_core::Version;
use std::sync::atomic::{AtomicU64, Ordering};

/// Sentinel stored in `xmax` when the slot has not been superseded.
/// Version 0 is never handed out by the transaction manager.
const NOT_DELETED: u64 = 0;

/// One immutable version of a node's value
///
/// `id` is the version of the transaction that created the slot. `xmax` is
/// the version of the transaction that superseded or deleted it. The value
/// itself never changes; only `xmax` is written after creation, atomically,
/// so readers scanning under a shard read guard always see a consistent
/// marker.
#[derive(Debug)]
pub struct Slot<T> {
    id: Version,
    xmax: AtomicU64,
    value: T,
}

impl<T> Slot<T> {
    /// Create a live slot
    pub fn new(id: Version, value: T) -> Self {
        debug_assert!(id != NOT_DELETED, "version 0 is reserved");
        Self {
            id,
            xmax: AtomicU64::new(NOT_DELETED),
            value,
        }
    }

    /// Creation version
    #[inline]
    pub fn id(&self) -> Version {
        self.id
    }

    /// Version that deleted this slot, if any
    #[inline]
    pub fn xmax(&self) -> Option<Version> {
        match self.xmax.load(Ordering::Acquire) {
            NOT_DELETED => None,
            v => Some(v),
        }
    }

    /// Check whether a deletion marker is set
    #[inline]
    pub fn is_deleted(&self) -> bool {
        self.xmax().is_some()
    }

    /// Set the deletion marker
    pub fn mark_deleted(&self, version: Version) {
        self.xmax.store(version, Ordering::Release);
    }

    /// Clear the deletion marker (rollback of a supersede)
    pub fn clear_deleted(&self) {
        self.xmax.store(NOT_DELETED, Ordering::Release);
    }

    /// Stored value
    #[inline]
    pub fn value(&self) -> &T {
        &self.value
    }
}
