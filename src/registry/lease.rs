//! Lease management.
//!
//! A lease record tracks its TTL, deadline and the keys bound to it:
//! `LeaseId → LeaseRecord{ttl, granted_at, deadline, bound_keys, state}`.
//!
//! Lifecycle is `Active → Expired → Reaped`. The sweeper marks a lease
//! expired, deletes every bound key through the normal delete path and then
//! reaps the record. Deadlines are static: there is no keep-alive.

use crate::core::time::Tick;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

/// Lease identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LeaseId(pub u64);

impl std::fmt::Display for LeaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// Lease lifecycle state. A reaped lease no longer has a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeaseState {
    /// Accepting bindings until its deadline.
    Active,
    /// Past its deadline; bound keys are being deleted.
    Expired,
}

/// A lease record.
#[derive(Debug, Clone)]
pub struct LeaseRecord {
    /// Lease identifier.
    pub id: LeaseId,

    /// Granted TTL.
    pub ttl: Duration,

    /// Tick when the lease was granted.
    pub granted_at: Tick,

    /// Tick at which the lease expires.
    pub deadline: Tick,

    /// Qualified keys whose entry currently carries this lease.
    pub bound_keys: BTreeSet<String>,

    /// Lifecycle state.
    pub state: LeaseState,
}

impl LeaseRecord {
    /// Create an active lease.
    pub fn new(id: LeaseId, ttl: Duration, granted_at: Tick) -> Self {
        Self {
            id,
            ttl,
            granted_at,
            deadline: granted_at.add(ttl),
            bound_keys: BTreeSet::new(),
            state: LeaseState::Active,
        }
    }

    /// Check if the deadline has passed at the given tick.
    pub fn is_expired_at(&self, tick: Tick) -> bool {
        tick.is_at_or_after(self.deadline)
    }

    /// Whether keys may still be bound to this lease at `tick`.
    pub fn is_live_at(&self, tick: Tick) -> bool {
        self.state == LeaseState::Active && !self.is_expired_at(tick)
    }

    /// Remaining TTL at the given tick.
    pub fn remaining_at(&self, tick: Tick) -> Duration {
        tick.until(self.deadline)
    }
}

/// Result of a lease grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseGrant {
    /// Assigned lease ID.
    pub id: LeaseId,
    /// Granted TTL after bounds enforcement.
    pub ttl: Duration,
}

/// Snapshot of a lease for callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseInfo {
    /// Lease ID.
    pub id: LeaseId,
    /// Granted TTL.
    pub granted_ttl: Duration,
    /// TTL remaining at query time.
    pub remaining: Duration,
    /// Bound keys, relative to the namespace.
    pub keys: Vec<String>,
}

/// Lease manager.
///
/// Pure bookkeeping: deleting the entries of an expired lease is the
/// registry's job, so that expiry goes through the same delete path as an
/// explicit delete.
#[derive(Debug)]
pub struct LeaseManager {
    /// Leases indexed by ID.
    leases: HashMap<LeaseId, LeaseRecord>,

    /// Next lease ID.
    next_id: u64,
}

impl LeaseManager {
    /// Create a new lease manager.
    pub fn new() -> Self {
        Self {
            leases: HashMap::new(),
            next_id: 1,
        }
    }

    /// Number of lease records (active or expired but not yet reaped).
    pub fn len(&self) -> usize {
        self.leases.len()
    }

    /// Whether there are no lease records.
    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }

    /// Get a lease by ID.
    pub fn get(&self, id: LeaseId) -> Option<&LeaseRecord> {
        self.leases.get(&id)
    }

    /// Whether keys may be bound to the lease at `now`.
    pub fn is_live(&self, id: LeaseId, now: Tick) -> bool {
        self.leases.get(&id).is_some_and(|l| l.is_live_at(now))
    }

    /// Grant a new lease with the given TTL.
    pub fn grant(&mut self, ttl: Duration, now: Tick) -> LeaseId {
        let id = LeaseId(self.next_id);
        self.next_id += 1;
        self.leases.insert(id, LeaseRecord::new(id, ttl, now));
        id
    }

    /// Bind a key to a lease.
    pub fn attach(&mut self, id: LeaseId, key: &str) -> bool {
        match self.leases.get_mut(&id) {
            Some(lease) => {
                lease.bound_keys.insert(key.to_string());
                true
            }
            None => false,
        }
    }

    /// Unbind a key from a lease.
    pub fn detach(&mut self, id: LeaseId, key: &str) -> bool {
        self.leases
            .get_mut(&id)
            .is_some_and(|lease| lease.bound_keys.remove(key))
    }

    /// Active leases past their deadline at `now`, in ID order.
    pub fn collect_expired(&self, now: Tick) -> Vec<LeaseId> {
        let mut expired: Vec<LeaseId> = self
            .leases
            .values()
            .filter(|l| l.state == LeaseState::Active && l.is_expired_at(now))
            .map(|l| l.id)
            .collect();
        expired.sort_unstable();
        expired
    }

    /// Transition a lease to `Expired`, returning a snapshot of its bound
    /// keys. Returns `None` if the lease is unknown or already expired.
    pub fn mark_expired(&mut self, id: LeaseId) -> Option<Vec<String>> {
        let lease = self.leases.get_mut(&id)?;
        if lease.state != LeaseState::Active {
            return None;
        }
        lease.state = LeaseState::Expired;
        Some(lease.bound_keys.iter().cloned().collect())
    }

    /// Discard a lease record.
    pub fn reap(&mut self, id: LeaseId) -> Option<LeaseRecord> {
        self.leases.remove(&id)
    }

    /// IDs of active leases, in ID order.
    pub fn active_ids(&self) -> Vec<LeaseId> {
        let mut ids: Vec<LeaseId> = self
            .leases
            .values()
            .filter(|l| l.state == LeaseState::Active)
            .map(|l| l.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Total keys bound across all leases.
    pub fn bound_key_count(&self) -> usize {
        self.leases.values().map(|l| l.bound_keys.len()).sum()
    }
}

impl Default for LeaseManager {
    fn default() -> Self {
        Self::new()
    }
}
