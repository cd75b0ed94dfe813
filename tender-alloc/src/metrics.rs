//! Allocation counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for protocol activity, shared by the engine and the tick job.
#[derive(Debug, Default)]
pub struct AllocationMetrics {
    pub announcements: AtomicU64,
    pub bids_accepted: AtomicU64,
    pub bids_rejected: AtomicU64,
    pub awards: AtomicU64,
    pub fallback_awards: AtomicU64,
    pub ack_timeouts: AtomicU64,
    pub watchdog_timeouts: AtomicU64,
    pub tasks_completed: AtomicU64,
    pub tasks_failed: AtomicU64,
    pub agents_expired: AtomicU64,
    pub plans_archived: AtomicU64,
    pub ticks: AtomicU64,
}

impl AllocationMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current snapshot of all metrics.
    pub fn snapshot(&self) -> AllocationMetricsSnapshot {
        AllocationMetricsSnapshot {
            announcements: self.announcements.load(Ordering::Relaxed),
            bids_accepted: self.bids_accepted.load(Ordering::Relaxed),
            bids_rejected: self.bids_rejected.load(Ordering::Relaxed),
            awards: self.awards.load(Ordering::Relaxed),
            fallback_awards: self.fallback_awards.load(Ordering::Relaxed),
            ack_timeouts: self.ack_timeouts.load(Ordering::Relaxed),
            watchdog_timeouts: self.watchdog_timeouts.load(Ordering::Relaxed),
            tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            agents_expired: self.agents_expired.load(Ordering::Relaxed),
            plans_archived: self.plans_archived.load(Ordering::Relaxed),
            ticks: self.ticks.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of allocation metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllocationMetricsSnapshot {
    pub announcements: u64,
    pub bids_accepted: u64,
    pub bids_rejected: u64,
    pub awards: u64,
    pub fallback_awards: u64,
    pub ack_timeouts: u64,
    pub watchdog_timeouts: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub agents_expired: u64,
    pub plans_archived: u64,
    pub ticks: u64,
}
