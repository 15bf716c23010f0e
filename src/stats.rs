//! Engine statistics

use std::sync::atomic::{AtomicU64, Ordering};

/// Per-engine statistics
pub struct EngineStats {
    /// Events handed to `consume`
    pub events_received: AtomicU64,
    /// Transitions committed
    pub transitioned: AtomicU64,
    /// Events that did not apply
    pub ignored: AtomicU64,
    /// Transitions that failed
    pub failed: AtomicU64,
    /// Instances created by a start event
    pub instances_created: AtomicU64,
    /// Instances removed on finalize
    pub instances_finalized: AtomicU64,
    /// Version conflicts retried
    pub conflicts_retried: AtomicU64,
    /// Timers armed
    pub timers_scheduled: AtomicU64,
    /// Timers cancelled while still armed
    pub timers_cancelled: AtomicU64,
    /// Timers cancelled because their transition failed
    pub compensations: AtomicU64,
    /// Outbound messages dropped after commit
    pub publish_failures: AtomicU64,
    /// Failed events redelivered by the inbound pump
    pub redeliveries: AtomicU64,
}

impl EngineStats {
    /// Zeroed counters
    pub fn new() -> Self {
        Self {
            events_received: AtomicU64::new(0),
            transitioned: AtomicU64::new(0),
            ignored: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            instances_created: AtomicU64::new(0),
            instances_finalized: AtomicU64::new(0),
            conflicts_retried: AtomicU64::new(0),
            timers_scheduled: AtomicU64::new(0),
            timers_cancelled: AtomicU64::new(0),
            compensations: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            redeliveries: AtomicU64::new(0),
        }
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            events_received: self.events_received.load(Ordering::Relaxed),
            transitioned: self.transitioned.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            instances_created: self.instances_created.load(Ordering::Relaxed),
            instances_finalized: self.instances_finalized.load(Ordering::Relaxed),
            conflicts_retried: self.conflicts_retried.load(Ordering::Relaxed),
            timers_scheduled: self.timers_scheduled.load(Ordering::Relaxed),
            timers_cancelled: self.timers_cancelled.load(Ordering::Relaxed),
            compensations: self.compensations.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            redeliveries: self.redeliveries.load(Ordering::Relaxed),
        }
    }
}

impl Default for EngineStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Plain copy of [`EngineStats`]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct EngineStatsSnapshot {
    pub events_received: u64,
    pub transitioned: u64,
    pub ignored: u64,
    pub failed: u64,
    pub instances_created: u64,
    pub instances_finalized: u64,
    pub conflicts_retried: u64,
    pub timers_scheduled: u64,
    pub timers_cancelled: u64,
    pub compensations: u64,
    pub publish_failures: u64,
    pub redeliveries: u64,
}
