//! Append-only list of versions of one node
//!
//! A [`SlotList`] keeps every version of a node that some snapshot may still
//! need. New versions are appended; lookups scan from newest to oldest and
//! return the first slot accepted by the caller's snapshot.
//!
//! # Concurrency
//!
//! - `add` runs under the writer's exclusive element lock and the shard write
//!   guard
//! - `remove` and `compact` run only from vacuum, under the store's exclusive
//!   vacuum gate
//! - lookups run under the shard read guard

use crate::slot::Slot;
use crate::snapshot::SnapshotContext;
use hyperstore_core::{Identity, NodeType, Version};
use smallvec::SmallVec;
use std::sync::Arc;

/// Most nodes hold one or two live versions at a time.
type Slots<T> = SmallVec<[Option<Arc<Slot<T>>>; 4]>;

/// Ordered versions of a single entity, relationship, or property value
#[derive(Debug)]
pub struct SlotList<T> {
    id: Identity,
    node_type: NodeType,
    owner: Option<Identity>,
    slots: Slots<T>,
    len: usize,
}

impl<T> SlotList<T> {
    /// Create an empty list for an entity or relationship
    pub fn new(id: Identity, node_type: NodeType) -> Self {
        Self {
            id,
            node_type,
            owner: None,
            slots: SmallVec::new(),
            len: 0,
        }
    }

    /// Create an empty list for a property value owned by `owner`
    pub fn for_property(id: Identity, owner: Identity) -> Self {
        Self {
            id,
            node_type: NodeType::Property,
            owner: Some(owner),
            slots: SmallVec::new(),
            len: 0,
        }
    }

    /// Identity of the node
    pub fn id(&self) -> &Identity {
        &self.id
    }

    /// Kind of node
    pub fn node_type(&self) -> NodeType {
        self.node_type
    }

    /// Owning element for property lists
    pub fn owner(&self) -> Option<&Identity> {
        self.owner.as_ref()
    }

    /// Number of live positions (tombstoned positions excluded)
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when no slot remains
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append a slot
    pub fn add(&mut self, slot: Arc<Slot<T>>) {
        self.slots.push(Some(slot));
        self.len += 1;
    }

    /// Tombstone every position holding a slot created at `slot_id`
    ///
    /// Returns the number of positions cleared.
    pub fn remove(&mut self, slot_id: Version) -> usize {
        let mut removed = 0;
        for position in self.slots.iter_mut() {
            if position.as_ref().map_or(false, |s| s.id() == slot_id) {
                *position = None;
                removed += 1;
            }
        }
        self.len -= removed;
        removed
    }

    /// Drop tombstoned positions
    pub fn compact(&mut self) {
        if self.slots.len() != self.len {
            self.slots.retain(|position| position.is_some());
        }
    }

    /// Newest-first iterator over remaining slots
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Slot<T>>> + '_ {
        self.slots.iter().rev().filter_map(|position| position.as_ref())
    }

    /// Newest slot visible in the given snapshot
    pub fn get_in_snapshot<C: SnapshotContext + ?Sized>(&self, ctx: &C) -> Option<&Arc<Slot<T>>> {
        self.iter().find(|slot| ctx.is_visible(slot.id(), slot.xmax()))
    }

    /// Newest slot without a deletion marker
    pub fn get_active_slot(&self) -> Option<&Arc<Slot<T>>> {
        self.iter().find(|slot| !slot.is_deleted())
    }

    /// Remove every slot deleted before `horizon`
    ///
    /// Matches positions by their own deletion marker: a live slot sharing
    /// its creation version with a dead one stays. Returns the number of
    /// slots removed.
    pub fn prune(&mut self, horizon: Version) -> usize {
        let mut removed = 0;
        for position in self.slots.iter_mut() {
            let dead = position
                .as_ref()
                .map_or(false, |slot| slot.xmax().map_or(false, |xmax| xmax < horizon));
            if dead {
                *position = None;
                removed += 1;
            }
        }
        self.len -= removed;
        self.compact();
        removed
    }
}
