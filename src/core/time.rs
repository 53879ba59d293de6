//! Time utilities for lease deadlines.
//!
//! Lease expiry is evaluated against a [`Tick`], the number of milliseconds
//! elapsed since the registry's epoch. A single [`TickSource`] per registry
//! supplies ticks; no other clock is consulted when deciding expiry.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// A point in registry time, in milliseconds since the registry epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Tick {
    /// Milliseconds since the registry epoch.
    pub ms: u64,
}

impl Tick {
    /// Create a new tick with the given millisecond value.
    pub const fn new(ms: u64) -> Self {
        Self { ms }
    }

    /// The registry epoch.
    pub const fn zero() -> Self {
        Self { ms: 0 }
    }

    /// Add a duration to this tick, saturating.
    pub fn add(self, duration: Duration) -> Self {
        let ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        Self {
            ms: self.ms.saturating_add(ms),
        }
    }

    /// Check if this tick is at or after the given deadline.
    pub const fn is_at_or_after(self, deadline: Tick) -> bool {
        self.ms >= deadline.ms
    }

    /// Time remaining until a deadline; zero once it has passed.
    pub fn until(self, deadline: Tick) -> Duration {
        Duration::from_millis(deadline.ms.saturating_sub(self.ms))
    }
}

impl std::fmt::Display for Tick {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Tick({}ms)", self.ms)
    }
}

/// Source of the current tick.
pub trait TickSource: Send + Sync {
    /// Current registry time.
    fn now(&self) -> Tick;
}

/// Tick source backed by the tokio monotonic clock.
///
/// Follows `tokio::time::pause`/`advance`, so expiry is reproducible in
/// paused-time tests.
#[derive(Debug)]
pub struct MonotonicTickSource {
    epoch: tokio::time::Instant,
}

impl MonotonicTickSource {
    /// Start a new epoch at the current instant.
    pub fn new() -> Self {
        Self {
            epoch: tokio::time::Instant::now(),
        }
    }
}

impl Default for MonotonicTickSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TickSource for MonotonicTickSource {
    fn now(&self) -> Tick {
        let elapsed = self.epoch.elapsed().as_millis();
        Tick::new(u64::try_from(elapsed).unwrap_or(u64::MAX))
    }
}

/// Tick source that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualTickSource {
    ms: AtomicU64,
}

impl ManualTickSource {
    /// Create a source positioned at the epoch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward.
    pub fn advance(&self, duration: Duration) {
        let ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        self.ms.fetch_add(ms, Ordering::AcqRel);
    }

    /// Jump to an absolute tick. Moving backwards is ignored.
    pub fn set(&self, tick: Tick) {
        self.ms.fetch_max(tick.ms, Ordering::AcqRel);
    }
}

impl TickSource for ManualTickSource {
    fn now(&self) -> Tick {
        Tick::new(self.ms.load(Ordering::Acquire))
    }
}
