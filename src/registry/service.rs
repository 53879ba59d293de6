//! The registry handle.
//!
//! [`Registry`] owns one namespace: revision clock, entry store, lease
//! manager and watch hub behind a single reader-writer lock, plus the
//! background sweeper that expires leases.
//!
//! Reads take the shared lock and see a consistent snapshot. Every mutation
//! takes the exclusive lock and, inside it, assigns the revision, updates the
//! store and lease bindings, and publishes the watch event. Lease expiry goes
//! through the same delete path as an explicit delete.
//!
//! Keys passed to and returned from the registry are relative to the
//! namespace prefix.

use crate::core::config::Config;
use crate::core::error::{RegistryError, RegistryResult};
use crate::core::time::{MonotonicTickSource, Tick, TickSource};
use crate::registry::lease::{LeaseGrant, LeaseId, LeaseInfo, LeaseManager, LeaseState};
use crate::registry::namespace::Namespace;
use crate::registry::revision::RevisionClock;
use crate::registry::store::{Entry, EntryStore};
use crate::registry::sweeper::{self, ExpirySweep, SweepReport};
use crate::registry::txn::{CasOutcome, Expected, Txn, TxnOp, TxnResponse};
use crate::registry::watch::{EventOrigin, WatchEvent, WatchHub, WatchOptions, WatchStream};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Point-in-time registry statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    /// Last committed revision.
    pub revision: u64,
    /// Live entries.
    pub entries: usize,
    /// Active leases.
    pub active_leases: usize,
    /// Keys bound to a lease.
    pub bound_keys: usize,
    /// Live watch subscriptions.
    pub watches: usize,
    /// Watches terminated with Overrun.
    pub watch_overruns: u64,
    /// Leases expired by the sweeper.
    pub leases_expired: u64,
    /// Leases revoked explicitly.
    pub leases_revoked: u64,
}

/// A coordination registry scoped to one namespace.
///
/// Must be opened inside a tokio runtime. Call [`shutdown`](Self::shutdown)
/// to stop the sweeper and close all watches; dropping the registry also
/// signals the sweeper to stop.
pub struct Registry {
    shared: Arc<Shared>,
    shutdown_tx: watch::Sender<bool>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

struct Shared {
    config: Config,
    namespace: Namespace,
    ticks: Arc<dyn TickSource>,
    state: RwLock<State>,
}

struct State {
    clock: RevisionClock,
    store: EntryStore,
    leases: LeaseManager,
    hub: WatchHub,
    namespace: Namespace,
    leases_expired: u64,
    leases_revoked: u64,
    closed: bool,
}

impl Registry {
    /// Open a registry on the tokio monotonic clock.
    pub fn open(config: Config) -> RegistryResult<Self> {
        Self::open_with_ticks(config, Arc::new(MonotonicTickSource::new()))
    }

    /// Open a registry that reads lease time from `ticks`.
    pub fn open_with_ticks(config: Config, ticks: Arc<dyn TickSource>) -> RegistryResult<Self> {
        config
            .validate()
            .map_err(|e| RegistryError::invalid(format!("{e:#}")))?;
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|_| RegistryError::unavailable("registry must be opened inside a tokio runtime"))?;

        let namespace = Namespace::new(config.namespace.prefix.clone());
        let sweep_period = config.leases.sweep_period();
        let state = State::new(namespace.clone(), config.watch.buffer_capacity);
        let shared = Arc::new(Shared {
            config,
            namespace,
            ticks,
            state: RwLock::new(state),
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let sweeper = sweeper::spawn(&handle, shared.clone(), sweep_period, shutdown_rx);

        tracing::info!(
            namespace = %shared.namespace,
            sweep_period_ms = shared.config.leases.sweep_period_ms,
            watch_buffer = shared.config.watch.buffer_capacity,
            "registry opened"
        );

        Ok(Self {
            shared,
            shutdown_tx,
            sweeper: Mutex::new(Some(sweeper)),
        })
    }

    /// Configuration the registry was opened with.
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// The namespace scoping every key.
    pub fn namespace(&self) -> &Namespace {
        &self.shared.namespace
    }

    /// Last committed revision.
    pub fn current_revision(&self) -> u64 {
        self.shared.state.read().clock.current()
    }

    // ========================================================================
    // Entries
    // ========================================================================

    /// Unconditional upsert. Drops any lease binding the key had.
    pub fn put(&self, key: &str, value: impl Into<Bytes>) -> RegistryResult<u64> {
        self.write(key, value.into(), None)
    }

    /// Upsert bound to `lease`. Fails with LeaseNotFound if the lease is
    /// unknown or past its deadline.
    pub fn put_with_lease(
        &self,
        key: &str,
        value: impl Into<Bytes>,
        lease: LeaseId,
    ) -> RegistryResult<u64> {
        self.write(key, value.into(), Some(lease))
    }

    fn write(&self, key: &str, value: Bytes, lease: Option<LeaseId>) -> RegistryResult<u64> {
        let qualified = self.shared.namespace.qualify(key)?;
        let now = self.shared.ticks.now();
        let mut state = self.shared.state.write();
        state.ensure_open()?;
        let revision = state.apply_put(qualified, value, lease, now)?;
        tracing::trace!(key, revision, lease = ?lease, "put");
        Ok(revision)
    }

    /// Current entry for `key`.
    pub fn get(&self, key: &str) -> RegistryResult<Entry> {
        let qualified = self.shared.namespace.qualify(key)?;
        let state = self.shared.state.read();
        state.ensure_open()?;
        state
            .store
            .get(&qualified)
            .map(|e| state.export(e))
            .ok_or_else(|| RegistryError::not_found(key))
    }

    /// Entries under `prefix`, in key order. The empty prefix lists the
    /// whole namespace.
    pub fn get_prefix(&self, prefix: &str) -> RegistryResult<Vec<Entry>> {
        let qualified = self.shared.namespace.qualify_prefix(prefix);
        let state = self.shared.state.read();
        state.ensure_open()?;
        let entries = state
            .store
            .prefix(&qualified)
            .map(|e| state.export(e))
            .collect();
        Ok(entries)
    }

    /// Number of entries under `prefix`.
    pub fn count_prefix(&self, prefix: &str) -> RegistryResult<usize> {
        let qualified = self.shared.namespace.qualify_prefix(prefix);
        let state = self.shared.state.read();
        state.ensure_open()?;
        Ok(state.store.prefix(&qualified).count())
    }

    /// Delete `key`. Returns false if it was absent.
    pub fn delete(&self, key: &str) -> RegistryResult<bool> {
        let qualified = self.shared.namespace.qualify(key)?;
        let mut state = self.shared.state.write();
        state.ensure_open()?;
        let deleted = state.apply_delete(&qualified, EventOrigin::Client);
        tracing::trace!(key, revision = ?deleted, "delete");
        Ok(deleted.is_some())
    }

    /// Delete every key under `prefix` in one critical section. Each key
    /// gets its own revision and DELETE event.
    pub fn delete_prefix(&self, prefix: &str) -> RegistryResult<usize> {
        let qualified = self.shared.namespace.qualify_prefix(prefix);
        let mut state = self.shared.state.write();
        state.ensure_open()?;
        let mut deleted = 0;
        for key in state.store.keys_with_prefix(&qualified) {
            if state.apply_delete(&key, EventOrigin::Client).is_some() {
                deleted += 1;
            }
        }
        tracing::debug!(prefix, deleted, "prefix deleted");
        Ok(deleted)
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Evaluate and apply a single-key transaction atomically.
    pub fn commit(&self, txn: Txn) -> RegistryResult<TxnResponse> {
        let qualified = self.shared.namespace.qualify(txn.key())?;
        let now = self.shared.ticks.now();
        let mut state = self.shared.state.write();
        state.ensure_open()?;

        let entry = state.store.get(&qualified);
        let current = entry.map(|e| e.value.clone());
        let (succeeded, op) = txn.branch(entry);

        let revision = match op {
            Some(TxnOp::Put { value, lease }) => {
                state.apply_put(qualified, value.clone(), *lease, now)?
            }
            Some(TxnOp::Delete) => match state.apply_delete(&qualified, EventOrigin::Client) {
                Some(revision) => revision,
                None => state.clock.current(),
            },
            None => state.clock.current(),
        };

        tracing::debug!(key = txn.key(), succeeded, revision, "txn committed");
        Ok(TxnResponse {
            succeeded,
            revision,
            current,
        })
    }

    /// Replace the value of `key` only if it currently matches `expected`.
    ///
    /// A mismatch is reported as [`CasOutcome::Failed`] with the value
    /// observed, not as an error. Never retried internally.
    pub fn compare_and_swap(
        &self,
        key: &str,
        expected: impl Into<Expected>,
        value: impl Into<Bytes>,
    ) -> RegistryResult<CasOutcome> {
        let expected = expected.into();
        let txn = Txn::on(key)
            .when(expected.to_compare())
            .and_then(TxnOp::put(value));
        Ok(self.commit(txn)?.into())
    }

    // ========================================================================
    // Leases
    // ========================================================================

    /// Grant a lease. The TTL is clamped into, or checked against, the
    /// configured bounds.
    pub fn grant_lease(&self, ttl: Duration) -> RegistryResult<LeaseGrant> {
        let ttl = self.enforce_ttl(ttl)?;
        let now = self.shared.ticks.now();
        let mut state = self.shared.state.write();
        state.ensure_open()?;
        let id = state.leases.grant(ttl, now);
        tracing::info!(lease_id = %id, ttl_ms = ttl.as_millis() as u64, "lease granted");
        Ok(LeaseGrant { id, ttl })
    }

    fn enforce_ttl(&self, requested: Duration) -> RegistryResult<Duration> {
        let bounds = &self.shared.config.leases;
        let (min, max) = (bounds.min_ttl(), bounds.max_ttl());

        if bounds.clamp_ttl {
            return Ok(requested.clamp(min, max));
        }
        if requested < min {
            return Err(RegistryError::invalid(format!(
                "lease TTL {}ms is below minimum {}ms",
                requested.as_millis(),
                bounds.min_ttl_ms
            )));
        }
        if requested > max {
            return Err(RegistryError::invalid(format!(
                "lease TTL {}ms exceeds maximum {}ms",
                requested.as_millis(),
                bounds.max_ttl_ms
            )));
        }
        Ok(requested)
    }

    /// Revoke a lease, deleting every key bound to it. Returns the number of
    /// keys deleted.
    pub fn revoke_lease(&self, id: LeaseId) -> RegistryResult<usize> {
        let now = self.shared.ticks.now();
        let mut state = self.shared.state.write();
        state.ensure_open()?;

        if !state.leases.get(id).is_some_and(|l| l.is_live_at(now)) {
            // Past its deadline but not swept yet: expire it normally.
            state.expire_lease(id, now);
            return Err(RegistryError::LeaseNotFound { lease_id: id });
        }

        let report = state.release_lease(id, EventOrigin::LeaseRevoked(id));
        state.leases_revoked += 1;
        tracing::info!(lease_id = %id, keys_deleted = report.keys_deleted, "lease revoked");
        Ok(report.keys_deleted)
    }

    /// Remaining TTL and bound keys of a live lease.
    pub fn lease_time_to_live(&self, id: LeaseId) -> RegistryResult<LeaseInfo> {
        let now = self.shared.ticks.now();
        let state = self.shared.state.read();
        state.ensure_open()?;
        let lease = state
            .leases
            .get(id)
            .filter(|l| l.is_live_at(now))
            .ok_or(RegistryError::LeaseNotFound { lease_id: id })?;

        Ok(LeaseInfo {
            id,
            granted_ttl: lease.ttl,
            remaining: lease.remaining_at(now),
            keys: lease
                .bound_keys
                .iter()
                .map(|k| state.namespace.localize(k).to_string())
                .collect(),
        })
    }

    /// IDs of active leases.
    pub fn leases(&self) -> RegistryResult<Vec<LeaseId>> {
        let state = self.shared.state.read();
        state.ensure_open()?;
        Ok(state.leases.active_ids())
    }

    /// Run one expiry pass now.
    pub fn sweep_expired(&self) -> RegistryResult<SweepReport> {
        self.shared.sweep_expired()
    }

    // ========================================================================
    // Watches
    // ========================================================================

    /// Watch every mutation under `prefix` from now on.
    pub fn watch(&self, prefix: &str) -> RegistryResult<WatchStream> {
        self.watch_with(prefix, WatchOptions::default())
    }

    /// Watch with event filters.
    pub fn watch_with(&self, prefix: &str, options: WatchOptions) -> RegistryResult<WatchStream> {
        let mut state = self.shared.state.write();
        state.ensure_open()?;
        let start_revision = state.clock.current();
        Ok(state.hub.subscribe(prefix, options, start_revision))
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Registry statistics.
    pub fn stats(&self) -> RegistryStats {
        let state = self.shared.state.read();
        RegistryStats {
            revision: state.clock.current(),
            entries: state.store.len(),
            active_leases: state.leases.active_ids().len(),
            bound_keys: state.leases.bound_key_count(),
            watches: state.hub.len(),
            watch_overruns: state.hub.overruns(),
            leases_expired: state.leases_expired,
            leases_revoked: state.leases_revoked,
        }
    }

    /// Whether the registry has been shut down.
    pub fn is_closed(&self) -> bool {
        self.shared.state.read().closed
    }

    /// Stop the sweeper and terminate every watch with Unavailable. Later
    /// operations fail with Unavailable.
    pub async fn shutdown(&self) {
        {
            let mut state = self.shared.state.write();
            if !state.closed {
                state.closed = true;
                state.hub.close_all();
            }
        }
        let _ = self.shutdown_tx.send(true);

        let handle = self.sweeper.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "lease sweeper terminated abnormally");
            }
            tracing::info!(namespace = %self.shared.namespace, "registry shut down");
        }
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.write();
            if !state.closed {
                state.closed = true;
                state.hub.close_all();
            }
        }
        let _ = self.shutdown_tx.send(true);
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("namespace", &self.shared.namespace)
            .field("revision", &self.current_revision())
            .finish_non_exhaustive()
    }
}

impl ExpirySweep for Shared {
    fn sweep_expired(&self) -> RegistryResult<SweepReport> {
        let now = self.ticks.now();
        let expired = {
            let state = self.state.read();
            state.ensure_open()?;
            state.leases.collect_expired(now)
        };

        let mut report = SweepReport::default();
        for id in expired {
            // One lease per critical section so writers interleave.
            let mut state = self.state.write();
            state.ensure_open()?;
            if let Some(pass) = state.expire_lease(id, now) {
                report.merge(pass);
            }
        }
        Ok(report)
    }
}

impl State {
    fn new(namespace: Namespace, watch_buffer: usize) -> Self {
        Self {
            clock: RevisionClock::new(),
            store: EntryStore::new(),
            leases: LeaseManager::new(),
            hub: WatchHub::new(watch_buffer),
            namespace,
            leases_expired: 0,
            leases_revoked: 0,
            closed: false,
        }
    }

    fn ensure_open(&self) -> RegistryResult<()> {
        if self.closed {
            return Err(RegistryError::unavailable("registry is shut down"));
        }
        Ok(())
    }

    /// Copy of `entry` keyed relative to the namespace.
    fn export(&self, entry: &Entry) -> Entry {
        Entry {
            key: self.namespace.localize(&entry.key).to_string(),
            ..entry.clone()
        }
    }

    fn apply_put(
        &mut self,
        key: String,
        value: Bytes,
        lease: Option<LeaseId>,
        now: Tick,
    ) -> RegistryResult<u64> {
        if let Some(id) = lease {
            if !self.leases.is_live(id, now) {
                return Err(RegistryError::LeaseNotFound { lease_id: id });
            }
        }

        let revision = self.clock.next();
        let (entry, prev) = self.store.put(key, value, revision, lease);

        let prev_lease = prev.and_then(|p| p.lease);
        if prev_lease != lease {
            if let Some(old) = prev_lease {
                self.leases.detach(old, &entry.key);
            }
            if let Some(new) = lease {
                self.leases.attach(new, &entry.key);
            }
        }

        let event = WatchEvent::put(self.namespace.localize(&entry.key), entry.value, revision);
        self.hub.publish(&event);
        Ok(revision)
    }

    fn apply_delete(&mut self, key: &str, origin: EventOrigin) -> Option<u64> {
        let entry = self.store.remove(key)?;
        let revision = self.clock.next();
        if let Some(id) = entry.lease {
            self.leases.detach(id, key);
        }

        let event = WatchEvent::delete(self.namespace.localize(key), revision, origin);
        self.hub.publish(&event);
        Some(revision)
    }

    /// Expire `id` if it is still active and past its deadline.
    fn expire_lease(&mut self, id: LeaseId, now: Tick) -> Option<SweepReport> {
        let due = self
            .leases
            .get(id)
            .is_some_and(|l| l.state == LeaseState::Active && l.is_expired_at(now));
        if !due {
            return None;
        }

        let mut report = self.release_lease(id, EventOrigin::LeaseExpired(id));
        report.leases_expired = 1;
        self.leases_expired += 1;
        tracing::info!(
            lease_id = %id,
            keys_deleted = report.keys_deleted,
            failures = report.failures,
            "lease expired"
        );
        Some(report)
    }

    /// Mark the lease expired, delete its bound keys, then reap it.
    fn release_lease(&mut self, id: LeaseId, origin: EventOrigin) -> SweepReport {
        let mut report = SweepReport::default();
        let Some(keys) = self.leases.mark_expired(id) else {
            return report;
        };

        for key in keys {
            match self.delete_bound(&key, id, origin) {
                Ok(_) => report.keys_deleted += 1,
                Err(e) => {
                    tracing::warn!(lease_id = %id, key = %key, error = %e, "failed to delete leased key");
                    report.failures += 1;
                }
            }
        }

        self.leases.reap(id);
        report
    }

    fn delete_bound(&mut self, key: &str, id: LeaseId, origin: EventOrigin) -> RegistryResult<u64> {
        match self.store.get(key) {
            Some(entry) if entry.lease == Some(id) => {}
            Some(_) => {
                return Err(RegistryError::internal(format!(
                    "key {key} is bound to lease {id} but carries another lease"
                )))
            }
            None => {
                return Err(RegistryError::internal(format!(
                    "key {key} is bound to lease {id} but has no entry"
                )))
            }
        }
        self.apply_delete(key, origin)
            .ok_or_else(|| RegistryError::internal(format!("key {key} vanished during delete")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEADLINE: Duration = Duration::from_secs(5);

    fn leased_state(keys: &[&str]) -> (State, LeaseId) {
        let mut state = State::new(Namespace::new("/t/"), 16);
        let id = state.leases.grant(DEADLINE, Tick::zero());
        for key in keys {
            state
                .apply_put(format!("/t/{key}"), Bytes::from_static(b"v"), Some(id), Tick::zero())
                .unwrap();
        }
        (state, id)
    }

    #[test]
    fn test_expiry_continues_past_missing_entry() {
        let (mut state, id) = leased_state(&["a", "b", "c"]);
        // Bound key whose entry is gone.
        state.store.remove("/t/b");

        let report = state.expire_lease(id, Tick::zero().add(DEADLINE)).unwrap();
        assert_eq!(report.leases_expired, 1);
        assert_eq!(report.keys_deleted, 2);
        assert_eq!(report.failures, 1);
        assert!(state.store.get("/t/a").is_none());
        assert!(state.store.get("/t/c").is_none());
        assert!(state.leases.get(id).is_none());
        assert_eq!(state.leases_expired, 1);
    }

    #[test]
    fn test_expiry_keeps_key_carrying_another_lease() {
        let (mut state, id) = leased_state(&["a"]);
        state
            .apply_put("/t/x".to_string(), Bytes::from_static(b"plain"), None, Tick::zero())
            .unwrap();
        assert!(state.leases.attach(id, "/t/x"));
        let before = state.clock.current();

        let report = state.expire_lease(id, Tick::zero().add(DEADLINE)).unwrap();
        assert_eq!(report.keys_deleted, 1);
        assert_eq!(report.failures, 1);
        assert!(state.store.get("/t/a").is_none());
        assert_eq!(state.store.get("/t/x").unwrap().value, Bytes::from_static(b"plain"));
        // Only the leased key consumed a revision.
        assert_eq!(state.clock.current(), before + 1);
    }

    #[test]
    fn test_expiry_waits_for_deadline() {
        let (mut state, id) = leased_state(&["a"]);
        let early = Tick::zero().add(DEADLINE - Duration::from_millis(1));
        assert!(state.expire_lease(id, early).is_none());
        assert!(state.store.get("/t/a").is_some());
    }
}
