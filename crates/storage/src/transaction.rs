//! Write-side transaction over the graph store
//!
//! A [`StoreTransaction`] carries the writer's version and an undo log of
//! every slot it touched. Commit simply forgets the log: the slots are already
//! in place and become visible once the version is reported finished.
//! Rollback replays the log newest first so that, by the time the version is
//! finished, no snapshot can observe anything the transaction wrote.

use crate::node::GraphNode;
use crate::slot::Slot;
use hyperstore_core::Version;
use std::sync::Arc;
use tracing::debug;

/// One reversible storage change
#[derive(Debug)]
pub(crate) enum UndoEntry {
    /// A slot appended by this transaction
    Inserted(Arc<Slot<GraphNode>>),
    /// A slot this transaction marked deleted
    Superseded(Arc<Slot<GraphNode>>),
}

/// Pending writes of one session
#[derive(Debug)]
pub struct StoreTransaction {
    version: Version,
    undo: Vec<UndoEntry>,
}

impl StoreTransaction {
    /// Start a transaction writing at `version`
    pub fn new(version: Version) -> Self {
        Self {
            version,
            undo: Vec::new(),
        }
    }

    /// Version stamped on every slot this transaction writes
    pub fn version(&self) -> Version {
        self.version
    }

    /// Number of recorded changes
    pub fn pending(&self) -> usize {
        self.undo.len()
    }

    /// True when nothing was written
    pub fn is_empty(&self) -> bool {
        self.undo.is_empty()
    }

    pub(crate) fn record(&mut self, entry: UndoEntry) {
        self.undo.push(entry);
    }

    /// Keep every change; returns the number of changes kept
    pub fn commit(self) -> usize {
        let count = self.undo.len();
        debug!(version = self.version, changes = count, "store transaction committed");
        count
    }

    /// Undo every change, newest first; returns the number of changes undone
    ///
    /// Superseded slots get their deletion marker cleared. Inserted slots are
    /// marked deleted by this transaction's own version, which makes them
    /// invisible to every snapshot once the version is finished.
    pub fn rollback(self) -> usize {
        let count = self.undo.len();
        for entry in self.undo.into_iter().rev() {
            match entry {
                UndoEntry::Inserted(slot) => slot.mark_deleted(self.version),
                UndoEntry::Superseded(slot) => slot.clear_deleted(),
            }
        }
        debug!(version = self.version, changes = count, "store transaction rolled back");
        count
    }
}
