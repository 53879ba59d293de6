//! Coordination registry.
//!
//! A registry is one logical namespace of revisioned entries. It is built
//! from the following components, leaves first:
//! - [`revision`] - Global revision clock
//! - [`namespace`] - Key qualification under the namespace prefix
//! - [`store`] - Entry store with point and prefix lookups
//! - [`lease`] - Lease records, bound keys and expiry bookkeeping
//! - [`txn`] - Single-key compare-and-apply transactions
//! - [`watch`] - Prefix subscriptions with bounded delivery
//! - [`sweeper`] - Background lease expiry task
//! - [`service`] - The [`Registry`] handle tying them together
//! - [`backend`] - The [`CoordinationStore`] seam for alternative backends
//!
//! Every mutation (put, delete, transaction, lease-driven delete) runs inside
//! one write critical section that assigns the revision, updates the store
//! and lease bindings, and publishes the watch event together.

pub mod backend;
pub mod lease;
pub mod namespace;
pub mod revision;
pub mod service;
pub mod store;
pub mod sweeper;
pub mod txn;
pub mod watch;

pub use backend::CoordinationStore;
pub use service::{Registry, RegistryStats};
