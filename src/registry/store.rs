//! Entry store.
//!
//! Maps qualified keys to their current [`Entry`]. Iteration order is
//! lexicographic by key, which makes prefix reads deterministic.

use super::lease::LeaseId;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A live key-value entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// The key.
    pub key: String,

    /// The value.
    pub value: Bytes,

    /// Revision of the last modification.
    pub revision: u64,

    /// Revision at which the key was created.
    pub create_revision: u64,

    /// Number of puts since creation (1 for a fresh key).
    pub version: u64,

    /// Lease the entry is bound to, if any.
    pub lease: Option<LeaseId>,
}

impl Entry {
    /// Value as UTF-8, lossily.
    pub fn value_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.value)
    }
}

/// Ordered map of live entries.
#[derive(Debug, Default)]
pub struct EntryStore {
    entries: BTreeMap<String, Entry>,
}

impl EntryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up one key.
    pub fn get(&self, key: &str) -> Option<&Entry> {
        self.entries.get(key)
    }

    /// Entries whose key starts with `prefix`, in key order.
    pub fn prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a Entry> + 'a {
        self.entries
            .range::<str, _>((std::ops::Bound::Included(prefix), std::ops::Bound::Unbounded))
            .take_while(move |(k, _)| k.starts_with(prefix))
            .map(|(_, e)| e)
    }

    /// Keys under `prefix`, in key order.
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.prefix(prefix).map(|e| e.key.clone()).collect()
    }

    /// Insert or replace an entry at `revision`.
    ///
    /// Returns the new entry and the one it replaced.
    pub fn put(
        &mut self,
        key: String,
        value: Bytes,
        revision: u64,
        lease: Option<LeaseId>,
    ) -> (Entry, Option<Entry>) {
        let prev = self.entries.get(&key).cloned();
        let (create_revision, version) = match &prev {
            Some(p) => (p.create_revision, p.version + 1),
            None => (revision, 1),
        };

        let entry = Entry {
            key: key.clone(),
            value,
            revision,
            create_revision,
            version,
            lease,
        };
        self.entries.insert(key, entry.clone());
        (entry, prev)
    }

    /// Remove an entry, returning it if it was live.
    pub fn remove(&mut self, key: &str) -> Option<Entry> {
        self.entries.remove(key)
    }
}
