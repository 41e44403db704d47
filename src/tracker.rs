//! Beacon tracker — merges multi-frame beacons into one record.
//!
//! Single-frame beacons are stored as they arrive. Service-UUID beacons
//! (Eddystone UID/URL + TLM and similar) split one device's state over
//! several advertisements from the same MAC. The tracker correlates those
//! frames by (MAC, service UUID) so that:
//!
//! - a data-only frame (telemetry) updates the RSSI and supplementary fields
//!   of every record already tracked for its group, and is never reported
//!   on its own;
//! - an identity frame inherits the supplementary fields already collected
//!   for its group and is reported as the merged record.
//!
//! There is exactly one owner of each record: the primary index, keyed by
//! identity hash. The group index only holds identity hashes. Merges clone
//! the stored record, change the copy and put it back, so a snapshot handed
//! to a caller is never touched again.
//!
//! All state sits behind one `std::sync::Mutex` held for the whole of
//! [`Tracker::track`]. Nothing inside the critical section blocks or
//! allocates more than the index entries themselves.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::observation::{GroupKey, IdentityHash, Observation};

/// Tracker tuning. Capacities are pre-allocation hints, not limits: the
/// tracked set grows for as long as new identities appear.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerConfig {
    /// Identities to reserve room for up front
    pub primary_capacity: usize,
    /// Multi-frame groups to reserve room for up front
    pub group_capacity: usize,
}

impl TrackerConfig {
    pub const fn new() -> Self {
        Self {
            primary_capacity: 64,
            group_capacity: 16,
        }
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Sizes of the tracked set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrackerStats {
    /// Distinct identities in the primary index
    pub tracked: usize,
    /// Multi-frame groups in the group index
    pub groups: usize,
}

/// Both indices. Only reachable through the tracker's lock.
#[derive(Debug, Default)]
struct TrackedSet {
    /// Identity hash -> latest record. The only owner of records.
    primary: HashMap<IdentityHash, Observation>,
    /// (MAC, service UUID) -> member identities in first-seen order.
    /// Every hash here has an entry in `primary` whose group key is this key.
    groups: HashMap<GroupKey, Vec<IdentityHash>>,
}

impl TrackedSet {
    fn with_config(config: &TrackerConfig) -> Self {
        Self {
            primary: HashMap::with_capacity(config.primary_capacity),
            groups: HashMap::with_capacity(config.group_capacity),
        }
    }

    fn track(&mut self, obs: Observation) -> Option<Observation> {
        match obs.group_key() {
            None => self.track_single(obs),
            Some(key) => self.track_grouped(key, obs),
        }
    }

    /// Replace whatever is stored under this identity; hand back the old one.
    fn track_single(&mut self, obs: Observation) -> Option<Observation> {
        if obs.is_data_only() {
            log::debug!("Dropping ungrouped data-only frame from {}", obs.address());
            return None;
        }
        let identity = obs.identity();
        self.detach(identity, None);
        let previous = self.primary.insert(identity, obs);
        if previous.is_none() {
            log::debug!("Tracking new beacon {}", identity);
        }
        previous
    }

    fn track_grouped(&mut self, key: GroupKey, obs: Observation) -> Option<Observation> {
        if obs.is_data_only() {
            self.merge_data_frame(&key, &obs);
            return None;
        }
        Some(self.merge_identity_frame(key, obs))
    }

    /// Copy the data frame's RSSI and payload onto every record in its group.
    /// Unknown groups have no members, so nothing happens.
    fn merge_data_frame(&mut self, key: &GroupKey, data: &Observation) {
        let Some(members) = self.groups.get(key) else {
            log::debug!("No tracked beacon for data frame in group {}", key);
            return;
        };

        for identity in members {
            if let Some(tracked) = self.primary.get(identity) {
                let mut merged = tracked.clone();
                merged.set_rssi(data.rssi());
                merged.set_extra_data_fields(data.data_fields().clone());
                self.primary.insert(*identity, merged);
            }
        }
        log::debug!("Merged data frame into {} beacon(s) in group {}", members.len(), key);
    }

    /// Carry the group's supplementary fields forward onto a new identity
    /// frame and make it the tracked record for its identity.
    fn merge_identity_frame(&mut self, key: GroupKey, mut obs: Observation) -> Observation {
        let identity = obs.identity();
        self.detach(identity, Some(&key));

        let members = self.groups.entry(key).or_insert_with_key(|key| {
            log::debug!("New beacon group {}", key);
            Vec::new()
        });

        // Members are visited oldest first, so the newest member's fields win.
        for identity in members.iter() {
            if let Some(tracked) = self.primary.get(identity) {
                obs.set_extra_data_fields(tracked.extra_data_fields().clone());
            }
        }

        if !members.contains(&identity) {
            members.push(identity);
        }
        self.primary.insert(identity, obs.clone());
        obs
    }

    /// Drop `identity` from the group of the record it currently names when
    /// that record is about to be replaced by one from another group (or
    /// none). Keeps every group member's record on the group's MAC and UUID.
    fn detach(&mut self, identity: IdentityHash, next: Option<&GroupKey>) {
        let Some(current) = self.primary.get(&identity).and_then(Observation::group_key) else {
            return;
        };
        if next == Some(&current) {
            return;
        }
        if let Some(members) = self.groups.get_mut(&current) {
            members.retain(|m| *m != identity);
            log::debug!("Beacon {} left group {}", identity, current);
        }
    }

    fn stats(&self) -> TrackerStats {
        TrackerStats {
            tracked: self.primary.len(),
            groups: self.groups.len(),
        }
    }
}

/// Thread-safe beacon tracker. Share it between scan callbacks with an
/// `Arc<Tracker>`.
#[derive(Debug)]
pub struct Tracker {
    state: Mutex<TrackedSet>,
}

impl Tracker {
    pub fn new() -> Self {
        Self::with_config(TrackerConfig::new())
    }

    pub fn with_config(config: TrackerConfig) -> Self {
        Self {
            state: Mutex::new(TrackedSet::with_config(&config)),
        }
    }

    /// Track one observation.
    ///
    /// Returns what should be reported onward:
    /// - single-frame beacon: the record previously stored under the same
    ///   identity, if any;
    /// - identity frame of a multi-frame beacon: the frame itself with the
    ///   group's supplementary fields merged in;
    /// - data-only frame: `None`. Its fields land on the tracked records of
    ///   its group, or nowhere if the group is unknown.
    pub fn track(&self, obs: Observation) -> Option<Observation> {
        self.lock().track(obs)
    }

    /// Snapshot of the record tracked under `identity`.
    pub fn get(&self, identity: IdentityHash) -> Option<Observation> {
        self.lock().primary.get(&identity).cloned()
    }

    /// Identities tracked for a group, oldest first. Empty for unknown groups.
    pub fn group_members(&self, key: &GroupKey) -> Vec<IdentityHash> {
        self.lock().groups.get(key).cloned().unwrap_or_default()
    }

    pub fn stats(&self) -> TrackerStats {
        self.lock().stats()
    }

    /// Snapshot of every tracked record, ordered by identity hash.
    pub fn snapshot(&self) -> Vec<Observation> {
        let state = self.lock();
        let mut records: Vec<Observation> = state.primary.values().cloned().collect();
        records.sort_by_key(Observation::identity);
        records
    }

    /// Every mutation in the critical section is panic-free, so a poisoned
    /// lock still guards consistent indices.
    fn lock(&self) -> MutexGuard<'_, TrackedSet> {
        self.state.lock().unwrap_or_else(|poisoned: PoisonError<_>| {
            log::warn!("Tracker lock poisoned; recovering");
            poisoned.into_inner()
        })
    }
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new()
    }
}
