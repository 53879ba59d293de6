//! Watch subscriptions.
//!
//! Watch state per subscription:
//! `WatchID → Subscription{prefix, filters, sender, status, last_sent_revision}`
//!
//! Events are published from inside the registry's write critical section,
//! so every subscriber observes them in revision order. Delivery never
//! blocks a writer: each subscription has a bounded buffer and a consumer
//! that falls behind past it is terminated with
//! [`RegistryError::Overrun`](crate::core::error::RegistryError::Overrun)
//! instead of silently losing events.
//!
//! There is no historical replay. A stream receives the events committed
//! after it was created.

use crate::core::error::{RegistryError, RegistryResult};
use crate::registry::lease::LeaseId;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

/// Kind of change carried by a watch event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    /// Key created or updated.
    Put,
    /// Key deleted.
    Delete,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Put => f.write_str("PUT"),
            Self::Delete => f.write_str("DELETE"),
        }
    }
}

/// What caused an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventOrigin {
    /// A client put, delete or transaction.
    Client,
    /// Lease expiry deleted the key.
    LeaseExpired(LeaseId),
    /// Explicit lease revocation deleted the key.
    LeaseRevoked(LeaseId),
}

/// A committed change, as delivered to watchers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchEvent {
    /// Kind of change.
    pub event_type: EventType,
    /// Key relative to the namespace.
    pub key: String,
    /// New value for PUT; empty for DELETE.
    pub value: Bytes,
    /// Revision the change was committed at.
    pub revision: u64,
    /// Cause of the change.
    pub origin: EventOrigin,
}

impl WatchEvent {
    /// Build a PUT event.
    pub fn put(key: impl Into<String>, value: Bytes, revision: u64) -> Self {
        Self {
            event_type: EventType::Put,
            key: key.into(),
            value,
            revision,
            origin: EventOrigin::Client,
        }
    }

    /// Build a DELETE event.
    pub fn delete(key: impl Into<String>, revision: u64, origin: EventOrigin) -> Self {
        Self {
            event_type: EventType::Delete,
            key: key.into(),
            value: Bytes::new(),
            revision,
            origin,
        }
    }

    /// Value as UTF-8, lossily.
    pub fn value_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.value)
    }
}

bitflags::bitflags! {
    /// Event filters for a watch stream.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct WatchFilters: u32 {
        /// Filter out PUT events.
        const NO_PUT = 0b0000_0001;
        /// Filter out DELETE events.
        const NO_DELETE = 0b0000_0010;
    }
}

impl Default for WatchFilters {
    fn default() -> Self {
        Self::empty()
    }
}

/// Options for a new watch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchOptions {
    /// Event kinds to suppress.
    pub filters: WatchFilters,
}

impl WatchOptions {
    /// Options delivering only PUT events.
    pub fn puts_only() -> Self {
        Self {
            filters: WatchFilters::NO_DELETE,
        }
    }

    /// Options delivering only DELETE events.
    pub fn deletes_only() -> Self {
        Self {
            filters: WatchFilters::NO_PUT,
        }
    }

    fn admits(&self, event_type: EventType) -> bool {
        match event_type {
            EventType::Put => !self.filters.contains(WatchFilters::NO_PUT),
            EventType::Delete => !self.filters.contains(WatchFilters::NO_DELETE),
        }
    }
}

// Subscription status shared between the hub and the stream.
const ACTIVE: u8 = 0;
const CANCELLED: u8 = 1;
const OVERRUN: u8 = 2;
const CLOSED: u8 = 3;

/// Leave the ACTIVE status. Only the first transition wins.
fn transition(status: &AtomicU8, to: u8) -> bool {
    status
        .compare_exchange(ACTIVE, to, Ordering::AcqRel, Ordering::Acquire)
        .is_ok()
}

/// Hub-side state of one watch.
#[derive(Debug)]
struct Subscription {
    prefix: String,
    options: WatchOptions,
    sender: mpsc::Sender<WatchEvent>,
    status: Arc<AtomicU8>,
    last_sent_revision: u64,
}

impl Subscription {
    fn matches(&self, event: &WatchEvent) -> bool {
        event.key.starts_with(&self.prefix) && self.options.admits(event.event_type)
    }
}

/// Fan-out point for committed events.
///
/// Keys and prefixes seen by the hub are relative to the namespace.
#[derive(Debug)]
pub struct WatchHub {
    subscriptions: BTreeMap<u64, Subscription>,
    next_id: u64,
    capacity: usize,
    overruns: u64,
    cancel_tx: mpsc::UnboundedSender<u64>,
    cancel_rx: mpsc::UnboundedReceiver<u64>,
}

impl WatchHub {
    /// Create a hub whose subscriptions buffer up to `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let (cancel_tx, cancel_rx) = mpsc::unbounded_channel();
        Self {
            subscriptions: BTreeMap::new(),
            next_id: 1,
            capacity: capacity.max(1),
            overruns: 0,
            cancel_tx,
            cancel_rx,
        }
    }

    /// Register a subscription on `prefix`.
    ///
    /// `start_revision` is the revision committed when the watch was created;
    /// the stream receives events strictly after it.
    pub fn subscribe(
        &mut self,
        prefix: impl Into<String>,
        options: WatchOptions,
        start_revision: u64,
    ) -> WatchStream {
        self.reap_cancelled();

        let id = self.next_id;
        self.next_id += 1;
        let prefix = prefix.into();
        let (sender, receiver) = mpsc::channel(self.capacity);
        let status = Arc::new(AtomicU8::new(ACTIVE));

        self.subscriptions.insert(
            id,
            Subscription {
                prefix: prefix.clone(),
                options,
                sender,
                status: status.clone(),
                last_sent_revision: start_revision,
            },
        );
        debug!(watch_id = id, prefix = %prefix, start_revision, "watch created");

        WatchStream {
            id,
            prefix,
            receiver,
            status,
            cancel_tx: self.cancel_tx.clone(),
            last_revision: start_revision,
            finished: false,
        }
    }

    /// Deliver an event to every matching subscription.
    ///
    /// Never blocks. A subscription whose buffer is full is terminated with
    /// Overrun and removed.
    pub fn publish(&mut self, event: &WatchEvent) {
        self.reap_cancelled();

        let mut dead = Vec::new();
        for (id, sub) in self.subscriptions.iter_mut() {
            if !sub.matches(event) {
                continue;
            }
            match sub.sender.try_send(event.clone()) {
                Ok(()) => sub.last_sent_revision = event.revision,
                Err(TrySendError::Full(_)) => {
                    if transition(&sub.status, OVERRUN) {
                        warn!(
                            watch_id = id,
                            prefix = %sub.prefix,
                            last_revision = sub.last_sent_revision,
                            "watch overrun, terminating stream"
                        );
                        self.overruns += 1;
                    }
                    dead.push(*id);
                }
                Err(TrySendError::Closed(_)) => dead.push(*id),
            }
        }

        for id in dead {
            self.subscriptions.remove(&id);
        }
    }

    /// Terminate every subscription with Unavailable.
    pub fn close_all(&mut self) {
        for sub in self.subscriptions.values() {
            transition(&sub.status, CLOSED);
        }
        let closed = self.subscriptions.len();
        self.subscriptions.clear();
        if closed > 0 {
            debug!(closed, "closed all watches");
        }
    }

    /// Number of live subscriptions.
    pub fn len(&self) -> usize {
        self.subscriptions
            .values()
            .filter(|s| s.status.load(Ordering::Acquire) == ACTIVE)
            .count()
    }

    /// Whether no subscription is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Subscriptions terminated for falling behind, since creation.
    pub fn overruns(&self) -> u64 {
        self.overruns
    }

    fn reap_cancelled(&mut self) {
        while let Ok(id) = self.cancel_rx.try_recv() {
            if self.subscriptions.remove(&id).is_some() {
                debug!(watch_id = id, "watch cancelled");
            }
        }
    }
}

/// Consumer side of a watch.
///
/// Dropping the stream cancels the watch.
#[derive(Debug)]
pub struct WatchStream {
    id: u64,
    prefix: String,
    receiver: mpsc::Receiver<WatchEvent>,
    status: Arc<AtomicU8>,
    cancel_tx: mpsc::UnboundedSender<u64>,
    last_revision: u64,
    finished: bool,
}

impl WatchStream {
    /// Watch identifier.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Watched prefix, relative to the namespace.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Revision of the last event delivered, or the start revision if none.
    pub fn last_revision(&self) -> u64 {
        self.last_revision
    }

    /// Next event.
    ///
    /// Yields `Some(Err(Overrun))` once if the consumer fell behind, and
    /// `Some(Err(Unavailable))` once if the registry shut down. Returns
    /// `None` after that, and after [`cancel`](Self::cancel).
    pub async fn next(&mut self) -> Option<RegistryResult<WatchEvent>> {
        if self.finished {
            return None;
        }

        match self.receiver.recv().await {
            Some(event) => {
                self.last_revision = event.revision;
                Some(Ok(event))
            }
            None => {
                self.finished = true;
                match self.status.load(Ordering::Acquire) {
                    CANCELLED => None,
                    OVERRUN => Some(Err(RegistryError::Overrun {
                        watch_id: self.id,
                        last_revision: self.last_revision,
                    })),
                    CLOSED => Some(Err(RegistryError::unavailable("registry shut down"))),
                    _ => Some(Err(RegistryError::unavailable("registry dropped"))),
                }
            }
        }
    }

    /// Stop delivery. Idempotent; no event is yielded afterwards.
    pub fn cancel(&mut self) {
        if transition(&self.status, CANCELLED) {
            // The hub may already be gone.
            let _ = self.cancel_tx.send(self.id);
        }
        self.receiver.close();
        self.finished = true;
    }

    /// Whether the stream has ended.
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl Drop for WatchStream {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_prefix_match_and_filters() {
        let mut hub = WatchHub::new(8);
        let mut all = hub.subscribe("a/", WatchOptions::default(), 0);
        let mut deletes = hub.subscribe("a/", WatchOptions::deletes_only(), 0);

        hub.publish(&WatchEvent::put("b/x", Bytes::from_static(b"1"), 1));
        hub.publish(&WatchEvent::put("a/x", Bytes::from_static(b"2"), 2));
        hub.publish(&WatchEvent::delete("a/x", 3, EventOrigin::Client));

        let first = all.next().await.unwrap().unwrap();
        assert_eq!(first.key, "a/x");
        assert_eq!(first.revision, 2);
        let second = all.next().await.unwrap().unwrap();
        assert_eq!(second.event_type, EventType::Delete);
        assert!(second.value.is_empty());

        let only = deletes.next().await.unwrap().unwrap();
        assert_eq!(only.revision, 3);
    }

    #[tokio::test]
    async fn test_overrun_after_buffered_events() {
        let mut hub = WatchHub::new(2);
        let mut stream = hub.subscribe("", WatchOptions::default(), 0);

        for rev in 1..=3 {
            hub.publish(&WatchEvent::put("k", Bytes::new(), rev));
        }
        assert_eq!(hub.len(), 0);
        assert_eq!(hub.overruns(), 1);

        assert_eq!(stream.next().await.unwrap().unwrap().revision, 1);
        assert_eq!(stream.next().await.unwrap().unwrap().revision, 2);
        let err = stream.next().await.unwrap().unwrap_err();
        assert_eq!(
            err,
            RegistryError::Overrun {
                watch_id: stream.id(),
                last_revision: 2
            }
        );
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let mut hub = WatchHub::new(4);
        let mut stream = hub.subscribe("", WatchOptions::default(), 0);
        hub.publish(&WatchEvent::put("k", Bytes::new(), 1));

        stream.cancel();
        stream.cancel();
        assert!(stream.next().await.is_none());
        assert_eq!(hub.len(), 0);
    }

    #[tokio::test]
    async fn test_close_all_reports_unavailable() {
        let mut hub = WatchHub::new(4);
        let mut stream = hub.subscribe("", WatchOptions::default(), 5);
        hub.close_all();

        let err = stream.next().await.unwrap().unwrap_err();
        assert_eq!(err.code(), "Unavailable");
        assert_eq!(stream.last_revision(), 5);
    }
}
