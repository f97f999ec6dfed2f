//! Per-task execution contexts
//!
//! Tracks why each strand last suspended, where it runs, and its CPU
//! accounting. Guarded by a dedicated mutex; critical sections never call
//! user code. When both this lock and the I/O registry lock are needed,
//! the registry lock is acquired first.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use strand_core::{SuspendReason, TaskId};

/// Context for one strand, created on first mount
pub(crate) struct StrandCtx {
    pub suspend_reason: SuspendReason,
    pub last_resume: Instant,
    /// Length of the previous continuous run, in microseconds
    pub last_run_us: u64,
    pub cpu_time_us: u64,
    pub affinity_core: u32,
    pub mounted: bool,
    /// Result code of the last completed I/O wait, consumed by the strand
    pub io_result: Option<i32>,
}

impl StrandCtx {
    fn new(now: Instant) -> Self {
        Self {
            suspend_reason: SuspendReason::None,
            last_resume: now,
            last_run_us: 0,
            cpu_time_us: 0,
            affinity_core: 0,
            mounted: false,
            io_result: None,
        }
    }
}

/// Map of task contexts
pub(crate) struct ContextMap {
    inner: Mutex<HashMap<TaskId, StrandCtx>>,
}

impl ContextMap {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Mount `id` on `core` ahead of a resume.
    ///
    /// Creates the context on first mount. Returns the reason the context
    /// starts the run with: `Preempted` when the previous continuous run
    /// exceeded `preempt_slice_us` (the advisory preemption hint), `None`
    /// otherwise.
    pub fn mount(
        &self,
        id: TaskId,
        core: usize,
        now: Instant,
        preempt_slice_us: u64,
    ) -> SuspendReason {
        let mut map = self.inner.lock().unwrap();
        let ctx = map.entry(id).or_insert_with(|| StrandCtx::new(now));
        let reason = if ctx.last_run_us > preempt_slice_us {
            SuspendReason::Preempted
        } else {
            SuspendReason::None
        };
        ctx.mounted = true;
        ctx.affinity_core = core as u32;
        ctx.last_resume = now;
        ctx.suspend_reason = reason;
        reason
    }

    /// Unmount after a resume returned: records the run length and reports
    /// the suspend reason the run ended with.
    pub fn unmount(&self, id: TaskId, now: Instant) -> SuspendReason {
        let mut map = self.inner.lock().unwrap();
        match map.get_mut(&id) {
            Some(ctx) => {
                ctx.mounted = false;
                let run_us = now.saturating_duration_since(ctx.last_resume).as_micros() as u64;
                ctx.last_run_us = run_us;
                ctx.cpu_time_us += run_us;
                ctx.suspend_reason
            }
            None => SuspendReason::None,
        }
    }

    /// Set the suspend reason; false if the context no longer exists
    pub fn set_reason(&self, id: TaskId, reason: SuspendReason) -> bool {
        let mut map = self.inner.lock().unwrap();
        match map.get_mut(&id) {
            Some(ctx) => {
                ctx.suspend_reason = reason;
                true
            }
            None => false,
        }
    }

    /// Clear an I/O suspension: reset the reason, store the wakeup result,
    /// and report whether the task is currently mounted on a worker (in
    /// which case that worker requeues it and the caller must not).
    pub fn finish_io_wait(&self, id: TaskId, result: i32) -> Option<bool> {
        let mut map = self.inner.lock().unwrap();
        let ctx = map.get_mut(&id)?;
        ctx.suspend_reason = SuspendReason::None;
        ctx.io_result = Some(result);
        Some(ctx.mounted)
    }

    /// Consume the stored I/O result
    pub fn take_io_result(&self, id: TaskId) -> Option<i32> {
        let mut map = self.inner.lock().unwrap();
        map.get_mut(&id)?.io_result.take()
    }

    /// Remove the context; `None` means it was already gone
    pub fn remove(&self, id: TaskId) -> Option<StrandCtx> {
        self.inner.lock().unwrap().remove(&id)
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.inner.lock().unwrap().contains_key(&id)
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_mount_creates_and_marks() {
        let map = ContextMap::new();
        let id = TaskId::new(1);
        let reason = map.mount(id, 2, Instant::now(), 10_000);
        assert_eq!(reason, SuspendReason::None);
        assert!(map.contains(id));
    }

    #[test]
    fn test_preempt_hint_arms_after_long_run() {
        let map = ContextMap::new();
        let id = TaskId::new(1);
        let t0 = Instant::now();

        map.mount(id, 0, t0, 10_000);
        // A 20ms continuous run, observed at unmount.
        map.unmount(id, t0 + Duration::from_millis(20));

        let reason = map.mount(id, 0, t0 + Duration::from_millis(21), 10_000);
        assert_eq!(reason, SuspendReason::Preempted);
    }

    #[test]
    fn test_short_runs_never_preempt() {
        let map = ContextMap::new();
        let id = TaskId::new(1);
        let t0 = Instant::now();

        map.mount(id, 0, t0, 10_000);
        map.unmount(id, t0 + Duration::from_millis(1));
        assert_eq!(map.mount(id, 0, t0, 10_000), SuspendReason::None);
    }

    #[test]
    fn test_finish_io_wait_reports_mounted() {
        let map = ContextMap::new();
        let id = TaskId::new(1);
        map.mount(id, 0, Instant::now(), 10_000);
        map.set_reason(id, SuspendReason::IoWait);

        // Still mounted: the executing worker owns the requeue.
        assert_eq!(map.finish_io_wait(id, 7), Some(true));
        assert_eq!(map.take_io_result(id), Some(7));
        assert_eq!(map.take_io_result(id), None);

        map.unmount(id, Instant::now());
        assert_eq!(map.finish_io_wait(id, 0), Some(false));
    }

    #[test]
    fn test_remove_guards_double_completion() {
        let map = ContextMap::new();
        let id = TaskId::new(1);
        map.mount(id, 0, Instant::now(), 10_000);
        assert!(map.remove(id).is_some());
        assert!(map.remove(id).is_none());
        assert!(!map.set_reason(id, SuspendReason::Completed));
    }
}
