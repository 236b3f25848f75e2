//! Snapshot visibility
//!
//! A [`Snapshot`] freezes which transaction versions a reader may see:
//!
//! - its own version (when the reader is a writer), always
//! - any version `<=` the high-water mark that was not in flight when the
//!   snapshot was taken
//!
//! Aborted transactions need no commit table: their slots are cleaned up
//! (superseded slots restored, inserted slots marked deleted by the aborted
//! version itself) before the transaction is reported finished.

use hyperstore_core::Version;

/// Decides which slots a reader can see
pub trait SnapshotContext {
    /// Check whether data written by `version` is visible
    fn is_version_visible(&self, version: Version) -> bool;

    /// Check whether a slot created at `created` and deleted at `deleted`
    /// is visible
    fn is_visible(&self, created: Version, deleted: Option<Version>) -> bool {
        self.is_version_visible(created)
            && deleted.map_or(true, |xmax| !self.is_version_visible(xmax))
    }
}

/// Point-in-time view over transaction versions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    own: Option<Version>,
    high_water: Version,
    in_flight: Vec<Version>,
}

impl Snapshot {
    /// Create a snapshot
    ///
    /// # Arguments
    ///
    /// * `own` - Version of the reading transaction if it writes
    /// * `high_water` - Highest version allocated when the snapshot was taken
    /// * `in_flight` - Versions still running at that time
    pub fn new(own: Option<Version>, high_water: Version, mut in_flight: Vec<Version>) -> Self {
        in_flight.sort_unstable();
        in_flight.dedup();
        if let Some(own) = own {
            in_flight.retain(|v| *v != own);
        }
        Self {
            own,
            high_water,
            in_flight,
        }
    }

    /// Snapshot seeing every version up to `high_water`
    pub fn at(high_water: Version) -> Self {
        Self::new(None, high_water, Vec::new())
    }

    /// Version of the owning writer, if any
    pub fn own_version(&self) -> Option<Version> {
        self.own
    }

    /// Highest version allocated when the snapshot was taken
    pub fn high_water(&self) -> Version {
        self.high_water
    }

    /// Versions excluded because they were running
    pub fn in_flight(&self) -> &[Version] {
        &self.in_flight
    }

    /// Oldest version this snapshot may still need to distinguish
    ///
    /// Every version below `xmin` is treated as finished by this snapshot.
    pub fn xmin(&self) -> Version {
        let mut xmin = self.high_water + 1;
        if let Some(first) = self.in_flight.first() {
            xmin = xmin.min(*first);
        }
        if let Some(own) = self.own {
            xmin = xmin.min(own);
        }
        xmin
    }
}

impl SnapshotContext for Snapshot {
    #[inline]
    fn is_version_visible(&self, version: Version) -> bool {
        if Some(version) == self.own {
            return true;
        }
        version <= self.high_water && self.in_flight.binary_search(&version).is_err()
    }
}
