//! Background lease expiry.
//!
//! The sweeper is a task owned by the registry: spawned when the registry
//! opens, stopped through the shutdown channel when it closes or is dropped.
//! Each tick runs one sweep pass; a pass never stops early because one key
//! failed to delete.

use crate::core::error::{RegistryError, RegistryResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Outcome of one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Leases that expired and were reaped.
    pub leases_expired: usize,
    /// Keys deleted because their lease expired.
    pub keys_deleted: usize,
    /// Bound keys whose deletion failed.
    pub failures: usize,
}

impl SweepReport {
    /// Whether the pass did nothing.
    pub fn is_empty(&self) -> bool {
        self.leases_expired == 0 && self.keys_deleted == 0 && self.failures == 0
    }

    /// Fold another report into this one.
    pub fn merge(&mut self, other: SweepReport) {
        self.leases_expired += other.leases_expired;
        self.keys_deleted += other.keys_deleted;
        self.failures += other.failures;
    }
}

/// Something the sweeper can run a pass against.
pub trait ExpirySweep: Send + Sync + 'static {
    /// Expire every lease past its deadline.
    fn sweep_expired(&self) -> RegistryResult<SweepReport>;
}

/// Spawn the sweep loop on `handle`.
///
/// The loop exits when `shutdown` flips to true, when its sender is dropped,
/// or when the target reports it is unavailable.
pub fn spawn<T: ExpirySweep>(
    handle: &tokio::runtime::Handle,
    target: Arc<T>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    handle.spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        interval.tick().await;

        tracing::debug!(period_ms = period.as_millis() as u64, "lease sweeper started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match target.sweep_expired() {
                        Ok(report) if !report.is_empty() => {
                            tracing::debug!(
                                leases_expired = report.leases_expired,
                                keys_deleted = report.keys_deleted,
                                failures = report.failures,
                                "sweep pass completed"
                            );
                        }
                        Ok(_) => {}
                        Err(RegistryError::Unavailable { .. }) => break,
                        Err(e) => tracing::warn!(error = %e, "sweep pass failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::debug!("lease sweeper stopped");
    })
}
