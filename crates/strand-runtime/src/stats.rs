//! Scheduler statistics
//!
//! Counters are relaxed per-field atomics; `snapshot()` copies them into a
//! plain struct. All counters are monotone while the scheduler runs.

use std::sync::atomic::{AtomicU64, Ordering};

/// Internal counter block, one per scheduler
pub(crate) struct Stats {
    total_scheduled: AtomicU64,
    total_io_suspended: AtomicU64,
    total_resumed: AtomicU64,
    work_stolen: AtomicU64,
    context_switches: AtomicU64,
    executed: Box<[AtomicU64]>,
}

impl Stats {
    pub fn new(ncores: usize) -> Self {
        let executed = (0..ncores).map(|_| AtomicU64::new(0)).collect();
        Self {
            total_scheduled: AtomicU64::new(0),
            total_io_suspended: AtomicU64::new(0),
            total_resumed: AtomicU64::new(0),
            work_stolen: AtomicU64::new(0),
            context_switches: AtomicU64::new(0),
            executed,
        }
    }

    #[inline]
    pub fn incr_scheduled(&self) {
        self.total_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn incr_io_suspended(&self) {
        self.total_io_suspended.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn incr_resumed(&self) {
        self.total_resumed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn incr_stolen(&self) {
        self.work_stolen.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn incr_context_switches(&self) {
        self.context_switches.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn incr_executed(&self, core: usize) {
        self.executed[core].fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_scheduled: self.total_scheduled.load(Ordering::Relaxed),
            total_io_suspended: self.total_io_suspended.load(Ordering::Relaxed),
            total_resumed: self.total_resumed.load(Ordering::Relaxed),
            work_stolen: self.work_stolen.load(Ordering::Relaxed),
            context_switches: self.context_switches.load(Ordering::Relaxed),
            executed: self
                .executed
                .iter()
                .map(|c| c.load(Ordering::Relaxed))
                .collect(),
        }
    }
}

/// Point-in-time copy of the scheduler counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Tasks handed to `schedule` / `schedule_with_affinity`
    pub total_scheduled: u64,
    /// Successful I/O suspensions
    pub total_io_suspended: u64,
    /// Wakeups delivered through `resume_from_io`
    pub total_resumed: u64,
    /// Tasks taken from a foreign queue
    pub work_stolen: u64,
    /// Resume rounds across all workers
    pub context_switches: u64,
    /// Resume rounds per core
    pub executed: Vec<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_increments() {
        let stats = Stats::new(2);
        stats.incr_scheduled();
        stats.incr_scheduled();
        stats.incr_executed(1);
        stats.incr_context_switches();

        let snap = stats.snapshot();
        assert_eq!(snap.total_scheduled, 2);
        assert_eq!(snap.executed, vec![0, 1]);
        assert_eq!(snap.context_switches, 1);
        assert_eq!(snap.total_resumed, 0);
    }
}
