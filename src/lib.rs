//! Trellis - namespaced coordination registry.
//!
//! Trellis is an in-process coordination store for one logical namespace:
//! revisioned key-value writes, single-key compare-and-swap, lease-bound
//! expiry and ordered prefix watches. It honors the client-observable
//! contract of an etcd-style store, so code written against
//! [`registry::CoordinationStore`] can move to a networked backend.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                            Callers                              │
//! │        put / get / delete / txn / lease / watch (Registry)       │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                  Write critical section (RwLock)                │
//! │   Revision Clock │ Entry Store │ Lease Manager │ Watch Hub      │
//! └─────────────────────────────────────────────────────────────────┘
//!                    ▲                              │
//! ┌──────────────────┴───────────┐   ┌──────────────▼──────────────┐
//! │  Lease sweeper (tokio task)  │   │  Watch streams (bounded mpsc)│
//! └──────────────────────────────┘   └─────────────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! ## Core
//! - [`core::config`] - Configuration parsing and validation
//! - [`core::error`] - Error taxonomy
//! - [`core::time`] - Tick sources for lease deadlines
//!
//! ## Registry
//! - [`registry::revision`] - Revision clock
//! - [`registry::store`] - Entry store
//! - [`registry::lease`] - Lease management
//! - [`registry::txn`] - Compare-and-swap transactions
//! - [`registry::watch`] - Watch hub and streams
//! - [`registry::service`] - The registry handle
//!
//! ## CLI
//! - [`cli::commands`] - CLI command implementations
//!
//! # Key Invariants
//!
//! - Revision is strictly increasing across the namespace; no two mutations
//!   share one.
//! - Compare and apply of a transaction are indivisible with respect to every
//!   other mutation.
//! - A lease's bound keys are exactly the entries carrying its ID.
//! - A watch stream delivers matching events in revision order with no gaps
//!   and no duplicates, or ends with `Overrun`.
//!
//! # Example
//!
//! ```no_run
//! use trellis::{Config, Registry};
//!
//! # async fn demo() -> trellis::RegistryResult<()> {
//! let config = Config::builder()
//!     .namespace("/turing-awards/")
//!     .build()
//!     .expect("valid config");
//! let registry = Registry::open(config)?;
//!
//! registry.put("Knuth", "analysis of algorithms")?;
//! let entry = registry.get("Knuth")?;
//! assert_eq!(entry.value_str(), "analysis of algorithms");
//!
//! registry.shutdown().await;
//! # Ok(())
//! # }
//! ```

// Core infrastructure
pub mod core;

// Coordination registry
pub mod registry;

// CLI
pub mod cli;

// Re-exports for convenience
pub use self::core::config::{Config, ConfigBuilder, ConfigOverrides};
pub use self::core::error::{RegistryError, RegistryResult};
pub use self::core::time::{ManualTickSource, MonotonicTickSource, Tick, TickSource};
pub use registry::lease::{LeaseGrant, LeaseId, LeaseInfo};
pub use registry::store::Entry;
pub use registry::sweeper::SweepReport;
pub use registry::txn::{CasOutcome, Compare, CompareResult, Expected, Txn, TxnOp, TxnResponse};
pub use registry::watch::{EventOrigin, EventType, WatchEvent, WatchFilters, WatchOptions, WatchStream};
pub use registry::{CoordinationStore, Registry, RegistryStats};
