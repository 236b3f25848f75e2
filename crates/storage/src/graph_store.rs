//! Sharded MVCC node storage
//!
//! # Design
//!
//! - DashMap keyed by domain-model name: domains never contend with each other
//! - FxHashMap per shard: O(1) lookup from [`Identity`] to its [`SlotList`]
//! - Reads select a version through a snapshot and never wait for writers
//!   beyond the shard read guard
//! - Writes append slots through a [`StoreTransaction`] so they can be undone
//!
//! # Vacuum
//!
//! Every read and write holds the vacuum gate in shared mode for the duration
//! of one call. [`GraphStore::vacuum`] takes the gate exclusively and removes
//! slots deleted before the horizon supplied by the transaction manager, then
//! drops emptied slot lists.

use crate::node::GraphNode;
use crate::slot::Slot;
use crate::slot_list::SlotList;
use crate::snapshot::{Snapshot, SnapshotContext};
use crate::transaction::{StoreTransaction, UndoEntry};
use dashmap::DashMap;
use hyperstore_core::{Error, Identity, NodeType, Result, Version};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Per-domain shard
#[derive(Debug, Default)]
pub struct Shard {
    pub(crate) nodes: FxHashMap<Identity, SlotList<GraphNode>>,
}

impl Shard {
    /// Create a new empty shard
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of slot lists in this shard
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if shard is empty
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Outcome of one vacuum pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VacuumStats {
    /// Horizon the pass ran with
    pub horizon: Version,
    /// Slot lists examined
    pub lists_scanned: usize,
    /// Slots removed
    pub slots_removed: usize,
    /// Slot lists dropped because they became empty
    pub lists_dropped: usize,
    /// Time spent holding the exclusive gate
    pub elapsed: Duration,
}

/// Sharded versioned node store
pub struct GraphStore {
    shards: DashMap<String, Shard>,
    vacuum_gate: RwLock<()>,
}

impl GraphStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            shards: DashMap::new(),
            vacuum_gate: RwLock::new(()),
        }
    }

    /// Create with expected number of domains
    pub fn with_capacity(domains: usize) -> Self {
        Self {
            shards: DashMap::with_capacity(domains),
            vacuum_gate: RwLock::new(()),
        }
    }

    /// Number of domain shards
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Total number of slot lists across all shards
    pub fn node_count(&self) -> usize {
        let _gate = self.vacuum_gate.read();
        self.shards.iter().map(|shard| shard.len()).sum()
    }

    /// Number of slots kept for one node
    pub fn slot_count(&self, id: &Identity) -> usize {
        let _gate = self.vacuum_gate.read();
        self.shards
            .get(id.domain_model())
            .and_then(|shard| shard.nodes.get(id).map(|list| list.len()))
            .unwrap_or(0)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Version of a node visible in `snapshot`
    pub fn get<C: SnapshotContext + ?Sized>(&self, id: &Identity, snapshot: &C) -> Option<GraphNode> {
        let _gate = self.vacuum_gate.read();
        let shard = self.shards.get(id.domain_model())?;
        let list = shard.nodes.get(id)?;
        list.get_in_snapshot(snapshot).map(|slot| slot.value().clone())
    }

    /// Newest version of a node that is not deleted, regardless of snapshot
    pub fn get_active(&self, id: &Identity) -> Option<GraphNode> {
        let _gate = self.vacuum_gate.read();
        let shard = self.shards.get(id.domain_model())?;
        let list = shard.nodes.get(id)?;
        list.get_active_slot().map(|slot| slot.value().clone())
    }

    /// Check whether a node is visible in `snapshot`
    pub fn contains<C: SnapshotContext + ?Sized>(&self, id: &Identity, snapshot: &C) -> bool {
        let _gate = self.vacuum_gate.read();
        self.shards
            .get(id.domain_model())
            .and_then(|shard| {
                shard
                    .nodes
                    .get(id)
                    .map(|list| list.get_in_snapshot(snapshot).is_some())
            })
            .unwrap_or(false)
    }

    /// Visible nodes of a domain accepted by `predicate`, sorted by identity
    ///
    /// NOTE: O(n) in the size of the shard. Not for hot paths.
    pub fn scan<C, F>(&self, domain: &str, snapshot: &C, mut predicate: F) -> Vec<GraphNode>
    where
        C: SnapshotContext + ?Sized,
        F: FnMut(&GraphNode) -> bool,
    {
        let _gate = self.vacuum_gate.read();
        let mut results: Vec<GraphNode> = self
            .shards
            .get(domain)
            .map(|shard| {
                shard
                    .nodes
                    .values()
                    .filter_map(|list| list.get_in_snapshot(snapshot))
                    .map(|slot| slot.value())
                    .filter(|node| predicate(*node))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        results.sort_by(|a, b| a.id.cmp(&b.id));
        results
    }

    /// Visible nodes of one kind in a domain
    pub fn nodes_of_type<C: SnapshotContext + ?Sized>(
        &self,
        domain: &str,
        snapshot: &C,
        node_type: NodeType,
    ) -> Vec<GraphNode> {
        self.scan(domain, snapshot, |node| node.node_type == node_type)
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Resolve the slot a writer is about to replace
    ///
    /// First updater wins: the version visible to the writer must also be the
    /// newest undeleted version, otherwise another transaction changed the
    /// node after the writer's snapshot was taken.
    fn current_for_write<'a>(
        list: &'a SlotList<GraphNode>,
        snapshot: &Snapshot,
        version: Version,
    ) -> Result<Option<&'a Arc<Slot<GraphNode>>>> {
        match (list.get_in_snapshot(snapshot), list.get_active_slot()) {
            (None, None) => Ok(None),
            (Some(visible), Some(active)) if Arc::ptr_eq(visible, active) => Ok(Some(active)),
            _ => Err(Error::WriteConflict {
                identity: list.id().clone(),
                version,
            }),
        }
    }

    fn new_list(node: &GraphNode) -> SlotList<GraphNode> {
        match (&node.node_type, &node.owner) {
            (NodeType::Property, Some(owner)) => SlotList::for_property(node.id.clone(), owner.clone()),
            (node_type, _) => SlotList::new(node.id.clone(), *node_type),
        }
    }

    /// Create a node
    ///
    /// # Errors
    ///
    /// - `ElementExists` if the node is visible in `snapshot`
    /// - `WriteConflict` if another transaction created it concurrently
    pub fn insert(&self, txn: &mut StoreTransaction, snapshot: &Snapshot, node: GraphNode) -> Result<()> {
        debug_assert_eq!(snapshot.own_version(), Some(txn.version()));
        let _gate = self.vacuum_gate.read();
        let mut shard = self
            .shards
            .entry(node.id.domain_model().to_string())
            .or_insert_with(Shard::new);

        if let Some(list) = shard.nodes.get(&node.id) {
            if Self::current_for_write(list, snapshot, txn.version())?.is_some() {
                return Err(Error::ElementExists(node.id));
            }
        }

        let list = shard
            .nodes
            .entry(node.id.clone())
            .or_insert_with(|| Self::new_list(&node));
        let slot = Arc::new(Slot::new(txn.version(), node));
        list.add(Arc::clone(&slot));
        txn.record(UndoEntry::Inserted(slot));
        Ok(())
    }

    /// Replace the visible version of a node; returns the previous value
    ///
    /// # Errors
    ///
    /// - `ElementNotFound` if the node is not visible in `snapshot`
    /// - `WriteConflict` if another transaction changed it concurrently
    pub fn update(
        &self,
        txn: &mut StoreTransaction,
        snapshot: &Snapshot,
        node: GraphNode,
    ) -> Result<GraphNode> {
        let _gate = self.vacuum_gate.read();
        let mut shard = self
            .shards
            .get_mut(node.id.domain_model())
            .ok_or_else(|| Error::ElementNotFound(node.id.clone()))?;
        let list = shard
            .nodes
            .get_mut(&node.id)
            .ok_or_else(|| Error::ElementNotFound(node.id.clone()))?;

        let previous = Self::current_for_write(list, snapshot, txn.version())?
            .cloned()
            .ok_or_else(|| Error::ElementNotFound(node.id.clone()))?;

        previous.mark_deleted(txn.version());
        let old_value = previous.value().clone();
        txn.record(UndoEntry::Superseded(previous));

        let slot = Arc::new(Slot::new(txn.version(), node));
        list.add(Arc::clone(&slot));
        txn.record(UndoEntry::Inserted(slot));
        Ok(old_value)
    }

    /// Insert or replace a node; returns the previous value if there was one
    pub fn put(
        &self,
        txn: &mut StoreTransaction,
        snapshot: &Snapshot,
        node: GraphNode,
    ) -> Result<Option<GraphNode>> {
        match self.update(txn, snapshot, node.clone()) {
            Ok(previous) => Ok(Some(previous)),
            Err(Error::ElementNotFound(_)) => self.insert(txn, snapshot, node).map(|_| None),
            Err(e) => Err(e),
        }
    }

    /// Delete the visible version of a node; returns the deleted value
    ///
    /// # Errors
    ///
    /// - `ElementNotFound` if the node is not visible in `snapshot`
    /// - `WriteConflict` if another transaction changed it concurrently
    pub fn remove(&self, txn: &mut StoreTransaction, snapshot: &Snapshot, id: &Identity) -> Result<GraphNode> {
        let _gate = self.vacuum_gate.read();
        let shard = self
            .shards
            .get(id.domain_model())
            .ok_or_else(|| Error::ElementNotFound(id.clone()))?;
        let list = shard
            .nodes
            .get(id)
            .ok_or_else(|| Error::ElementNotFound(id.clone()))?;

        let current = Self::current_for_write(list, snapshot, txn.version())?
            .cloned()
            .ok_or_else(|| Error::ElementNotFound(id.clone()))?;

        current.mark_deleted(txn.version());
        let value = current.value().clone();
        txn.record(UndoEntry::Superseded(current));
        Ok(value)
    }

    /// Roll back a transaction's writes under the shared gate
    pub fn rollback(&self, txn: StoreTransaction) -> usize {
        let _gate = self.vacuum_gate.read();
        txn.rollback()
    }

    // ========================================================================
    // Vacuum
    // ========================================================================

    /// Remove every slot deleted before `horizon`
    ///
    /// `horizon` must not exceed the oldest `xmin` of any live snapshot.
    pub fn vacuum(&self, horizon: Version) -> VacuumStats {
        let _gate = self.vacuum_gate.write();
        let started = Instant::now();
        let mut stats = VacuumStats {
            horizon,
            ..VacuumStats::default()
        };

        for mut shard in self.shards.iter_mut() {
            shard.nodes.retain(|_, list| {
                stats.lists_scanned += 1;
                stats.slots_removed += list.prune(horizon);
                if list.is_empty() {
                    stats.lists_dropped += 1;
                    false
                } else {
                    true
                }
            });
        }
        self.shards.retain(|_, shard| !shard.is_empty());

        stats.elapsed = started.elapsed();
        debug!(
            horizon,
            scanned = stats.lists_scanned,
            removed = stats.slots_removed,
            dropped = stats.lists_dropped,
            "vacuum pass complete"
        );
        stats
    }
}

impl Default for GraphStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for GraphStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphStore")
            .field("shard_count", &self.shard_count())
            .field("node_count", &self.node_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use static_assertions::assert_impl_all;

    assert_impl_all!(GraphStore: Send, Sync);

    fn id(key: &str) -> Identity {
        Identity::new("lib", key)
    }

    fn book(key: &str) -> GraphNode {
        GraphNode::entity(id(key), Identity::new("lib", "Book"))
    }

    fn title(key: &str, value: &str) -> GraphNode {
        GraphNode::property(id(key), Identity::new("lib", "Book"), "title", json!(value))
    }

    /// Writer snapshot with nothing else in flight
    fn writer(version: Version) -> (StoreTransaction, Snapshot) {
        (
            StoreTransaction::new(version),
            Snapshot::new(Some(version), version - 1, vec![]),
        )
    }

    fn commit_insert(store: &GraphStore, version: Version, node: GraphNode) {
        let (mut txn, snap) = writer(version);
        store.insert(&mut txn, &snap, node).unwrap();
        txn.commit();
    }

    // ===== Read/Write Tests =====

    #[test]
    fn test_insert_visible_to_owner_only() {
        let store = GraphStore::new();
        let (mut txn, snap) = writer(1);
        store.insert(&mut txn, &snap, book("b1")).unwrap();

        assert!(store.contains(&id("b1"), &snap));
        assert!(!store.contains(&id("b1"), &Snapshot::new(None, 1, vec![1])));
        assert!(!store.contains(&id("b1"), &Snapshot::at(0)));

        txn.commit();
        assert!(store.contains(&id("b1"), &Snapshot::at(1)));
        assert_eq!(store.shard_count(), 1);
    }

    #[test]
    fn test_insert_existing_fails() {
        let store = GraphStore::new();
        commit_insert(&store, 1, book("b1"));

        let (mut txn, snap) = writer(2);
        let err = store.insert(&mut txn, &snap, book("b1")).unwrap_err();
        assert!(matches!(err, Error::ElementExists(_)));
        assert!(txn.is_empty());
    }

    #[test]
    fn test_update_keeps_old_version_for_old_snapshots() {
        let store = GraphStore::new();
        commit_insert(&store, 1, title("b1", "Dune"));
        let old = Snapshot::at(1);

        let (mut txn, snap) = writer(2);
        let prev = store.update(&mut txn, &snap, title("b1", "Emma")).unwrap();
        assert_eq!(prev.value, Some(json!("Dune")));
        txn.commit();

        let attr = id("b1").create_attribute_identity("title");
        assert_eq!(store.get(&attr, &old).unwrap().value, Some(json!("Dune")));
        assert_eq!(store.get(&attr, &Snapshot::at(2)).unwrap().value, Some(json!("Emma")));
        assert_eq!(store.slot_count(&attr), 2);
    }

    #[test]
    fn test_update_missing_fails() {
        let store = GraphStore::new();
        let (mut txn, snap) = writer(1);
        let err = store.update(&mut txn, &snap, book("nope")).unwrap_err();
        assert!(matches!(err, Error::ElementNotFound(_)));
    }

    #[test]
    fn test_put_inserts_then_updates() {
        let store = GraphStore::new();
        let (mut txn, snap) = writer(1);
        assert!(store.put(&mut txn, &snap, title("b1", "a")).unwrap().is_none());
        assert!(store.put(&mut txn, &snap, title("b1", "b")).unwrap().is_some());
        txn.commit();

        let attr = id("b1").create_attribute_identity("title");
        assert_eq!(store.get(&attr, &Snapshot::at(1)).unwrap().value, Some(json!("b")));
    }

    #[test]
    fn test_remove_and_reinsert() {
        let store = GraphStore::new();
        commit_insert(&store, 1, book("b1"));

        let (mut txn, snap) = writer(2);
        store.remove(&mut txn, &snap, &id("b1")).unwrap();
        assert!(!store.contains(&id("b1"), &snap));
        store.insert(&mut txn, &snap, book("b1")).unwrap();
        assert!(store.contains(&id("b1"), &snap));
        txn.commit();

        assert!(store.contains(&id("b1"), &Snapshot::at(1)));
        assert!(store.contains(&id("b1"), &Snapshot::at(2)));
    }

    #[test]
    fn test_scan_sorted_and_filtered() {
        let store = GraphStore::new();
        let (mut txn, snap) = writer(1);
        store.insert(&mut txn, &snap, book("b2")).unwrap();
        store.insert(&mut txn, &snap, book("b1")).unwrap();
        store.insert(&mut txn, &snap, title("b1", "x")).unwrap();
        txn.commit();

        let books = store.nodes_of_type("lib", &Snapshot::at(1), NodeType::Entity);
        let keys: Vec<&str> = books.iter().map(|n| n.id.key()).collect();
        assert_eq!(keys, vec!["b1", "b2"]);
        assert!(store.scan("other", &Snapshot::at(1), |_| true).is_empty());
    }

    // ===== Conflict Tests =====

    #[test]
    fn test_first_updater_wins() {
        let store = GraphStore::new();
        commit_insert(&store, 1, book("b1"));

        // Both writers start from snapshot 1
        let mut t2 = StoreTransaction::new(2);
        let s2 = Snapshot::new(Some(2), 1, vec![3]);
        let mut t3 = StoreTransaction::new(3);
        let s3 = Snapshot::new(Some(3), 1, vec![2]);

        store.update(&mut t2, &s2, book("b1")).unwrap();
        t2.commit();

        let err = store.update(&mut t3, &s3, book("b1")).unwrap_err();
        assert!(err.is_conflict());
        let err = store.remove(&mut t3, &s3, &id("b1")).unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_concurrent_insert_conflicts() {
        let store = GraphStore::new();
        let mut t1 = StoreTransaction::new(1);
        let s1 = Snapshot::new(Some(1), 0, vec![2]);
        store.insert(&mut t1, &s1, book("b1")).unwrap();
        t1.commit();

        let mut t2 = StoreTransaction::new(2);
        let s2 = Snapshot::new(Some(2), 0, vec![1]);
        let err = store.insert(&mut t2, &s2, book("b1")).unwrap_err();
        assert!(err.is_conflict());
    }

    // ===== Rollback Tests =====

    #[test]
    fn test_rollback_restores_previous_state() {
        let store = GraphStore::new();
        commit_insert(&store, 1, title("b1", "Dune"));
        commit_insert(&store, 2, book("b1"));

        let (mut txn, snap) = writer(3);
        store.update(&mut txn, &snap, title("b1", "Emma")).unwrap();
        store.update(&mut txn, &snap, title("b1", "Odyssey")).unwrap();
        store.remove(&mut txn, &snap, &id("b1")).unwrap();
        store.insert(&mut txn, &snap, book("b9")).unwrap();
        assert_eq!(store.rollback(txn), 6);

        // A snapshot taken after the version finished sees the old state
        let after = Snapshot::at(3);
        let attr = id("b1").create_attribute_identity("title");
        assert_eq!(store.get(&attr, &after).unwrap().value, Some(json!("Dune")));
        assert!(store.contains(&id("b1"), &after));
        assert!(!store.contains(&id("b9"), &after));
        assert_eq!(store.get_active(&attr).unwrap().value, Some(json!("Dune")));
    }

    #[test]
    fn test_write_after_rollback_does_not_conflict() {
        let store = GraphStore::new();
        commit_insert(&store, 1, book("b1"));

        let (mut t2, s2) = writer(2);
        store.update(&mut t2, &s2, book("b1")).unwrap();
        store.rollback(t2);

        // Snapshot taken while version 2 was running
        let mut t3 = StoreTransaction::new(3);
        let s3 = Snapshot::new(Some(3), 2, vec![2]);
        store.update(&mut t3, &s3, book("b1")).unwrap();
    }

    // ===== Vacuum Tests =====

    #[test]
    fn test_vacuum_respects_horizon() {
        let store = GraphStore::new();
        commit_insert(&store, 1, title("b1", "a"));
        for (v, text) in [(2, "b"), (3, "c")] {
            let (mut txn, snap) = writer(v);
            store.update(&mut txn, &snap, title("b1", text)).unwrap();
            txn.commit();
        }
        let attr = id("b1").create_attribute_identity("title");
        assert_eq!(store.slot_count(&attr), 3);

        // A reader at snapshot 1 still needs the first slot (xmax 2)
        let stats = store.vacuum(2);
        assert_eq!(stats.slots_removed, 0);

        let stats = store.vacuum(3);
        assert_eq!(stats.slots_removed, 1);
        assert_eq!(store.slot_count(&attr), 2);

        store.vacuum(4);
        assert_eq!(store.slot_count(&attr), 1);
        assert_eq!(store.get(&attr, &Snapshot::at(3)).unwrap().value, Some(json!("c")));
    }

    #[test]
    fn test_vacuum_keeps_value_written_twice_by_one_writer() {
        let store = GraphStore::new();
        commit_insert(&store, 1, title("b1", "a"));

        let (mut txn, snap) = writer(2);
        store.put(&mut txn, &snap, title("b1", "b")).unwrap();
        store.put(&mut txn, &snap, title("b1", "c")).unwrap();
        txn.commit();

        let attr = id("b1").create_attribute_identity("title");
        let stats = store.vacuum(3);
        assert_eq!(stats.slots_removed, 2);
        assert_eq!(stats.lists_dropped, 0);
        assert_eq!(store.slot_count(&attr), 1);
        assert_eq!(store.get(&attr, &Snapshot::at(3)).unwrap().value, Some(json!("c")));
    }

    #[test]
    fn test_vacuum_drops_dead_lists() {
        let store = GraphStore::new();
        commit_insert(&store, 1, book("b1"));
        let (mut txn, snap) = writer(2);
        store.remove(&mut txn, &snap, &id("b1")).unwrap();
        txn.commit();

        let stats = store.vacuum(3);
        assert_eq!(stats.lists_dropped, 1);
        assert_eq!(store.node_count(), 0);
        assert_eq!(store.shard_count(), 0);
    }

    #[test]
    fn test_vacuum_removes_rolled_back_inserts() {
        let store = GraphStore::new();
        let (mut txn, snap) = writer(1);
        store.insert(&mut txn, &snap, book("b1")).unwrap();
        store.rollback(txn);

        assert_eq!(store.vacuum(1).slots_removed, 0);
        assert_eq!(store.vacuum(2).slots_removed, 1);
        assert_eq!(store.node_count(), 0);
    }

    // ===== Concurrency Tests =====

    #[test]
    fn test_readers_during_writes() {
        use rand::Rng;
        use std::thread;

        let store = Arc::new(GraphStore::new());
        commit_insert(&store, 1, title("b1", "v1"));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    let attr = id("b1").create_attribute_identity("title");
                    let snap = Snapshot::at(1);
                    let mut rng = rand::thread_rng();
                    for _ in 0..200 {
                        let node = store.get(&attr, &snap).unwrap();
                        assert_eq!(node.value, Some(json!("v1")));
                        if rng.gen_bool(0.1) {
                            thread::yield_now();
                        }
                    }
                })
            })
            .collect();

        for v in 2..50 {
            let (mut txn, snap) = writer(v);
            store.update(&mut txn, &snap, title("b1", &format!("v{}", v))).unwrap();
            txn.commit();
        }

        for h in readers {
            h.join().unwrap();
        }
    }
}
