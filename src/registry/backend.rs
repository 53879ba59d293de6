//! Backend seam.
//!
//! [`CoordinationStore`] is the set of primitives higher-level code needs
//! from a coordination store. [`Registry`] is the in-process
//! implementation; a networked client can implement the same trait.

use crate::core::error::RegistryResult;
use crate::registry::lease::{LeaseGrant, LeaseId};
use crate::registry::service::Registry;
use crate::registry::store::Entry;
use crate::registry::txn::{CasOutcome, Expected};
use crate::registry::watch::WatchStream;
use bytes::Bytes;
use std::time::Duration;

/// Operations offered by a coordination store.
///
/// Keys are relative to the store's namespace.
pub trait CoordinationStore: Send + Sync {
    /// Namespace prefix the store is scoped to.
    fn namespace_prefix(&self) -> &str;

    /// Unconditional upsert.
    fn put(&self, key: &str, value: Bytes) -> RegistryResult<u64>;

    /// Upsert bound to a lease.
    fn put_with_lease(&self, key: &str, value: Bytes, lease: LeaseId) -> RegistryResult<u64>;

    /// Point lookup.
    fn get(&self, key: &str) -> RegistryResult<Entry>;

    /// Prefix lookup, in key order.
    fn get_prefix(&self, prefix: &str) -> RegistryResult<Vec<Entry>>;

    /// Delete one key.
    fn delete(&self, key: &str) -> RegistryResult<bool>;

    /// Delete every key under a prefix.
    fn delete_prefix(&self, prefix: &str) -> RegistryResult<usize>;

    /// Single-key compare-and-swap.
    fn compare_and_swap(
        &self,
        key: &str,
        expected: Expected,
        value: Bytes,
    ) -> RegistryResult<CasOutcome>;

    /// Grant a lease.
    fn grant_lease(&self, ttl: Duration) -> RegistryResult<LeaseGrant>;

    /// Watch a prefix from now on.
    fn watch(&self, prefix: &str) -> RegistryResult<WatchStream>;

    /// Last committed revision.
    fn current_revision(&self) -> RegistryResult<u64>;
}

impl CoordinationStore for Registry {
    fn namespace_prefix(&self) -> &str {
        Registry::namespace(self).prefix()
    }

    fn put(&self, key: &str, value: Bytes) -> RegistryResult<u64> {
        Registry::put(self, key, value)
    }

    fn put_with_lease(&self, key: &str, value: Bytes, lease: LeaseId) -> RegistryResult<u64> {
        Registry::put_with_lease(self, key, value, lease)
    }

    fn get(&self, key: &str) -> RegistryResult<Entry> {
        Registry::get(self, key)
    }

    fn get_prefix(&self, prefix: &str) -> RegistryResult<Vec<Entry>> {
        Registry::get_prefix(self, prefix)
    }

    fn delete(&self, key: &str) -> RegistryResult<bool> {
        Registry::delete(self, key)
    }

    fn delete_prefix(&self, prefix: &str) -> RegistryResult<usize> {
        Registry::delete_prefix(self, prefix)
    }

    fn compare_and_swap(
        &self,
        key: &str,
        expected: Expected,
        value: Bytes,
    ) -> RegistryResult<CasOutcome> {
        Registry::compare_and_swap(self, key, expected, value)
    }

    fn grant_lease(&self, ttl: Duration) -> RegistryResult<LeaseGrant> {
        Registry::grant_lease(self, ttl)
    }

    fn watch(&self, prefix: &str) -> RegistryResult<WatchStream> {
        Registry::watch(self, prefix)
    }

    fn current_revision(&self) -> RegistryResult<u64> {
        if self.is_closed() {
            return Err(crate::core::error::RegistryError::unavailable(
                "registry is shut down",
            ));
        }
        Ok(Registry::current_revision(self))
    }
}
