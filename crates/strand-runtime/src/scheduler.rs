//! Scheduler core
//!
//! Multiplexes strands onto a fixed pool of pinned worker threads. Each
//! worker owns one MPSC run queue and steals from random victims when
//! idle; an I/O driver thread consumes the poller and requeues strands
//! whose descriptors became ready; a sweeper thread reaps abandoned I/O
//! waits.
//!
//! Ownership of a task handle moves between exactly three places: a run
//! queue, the worker resuming it, and the I/O wait registry. Transitions
//! happen only at mount, at the suspend-reason dispatch after a resume
//! returns, and on the I/O wakeup path, which always re-enters through a
//! run queue rather than resuming on the caller's stack.

use std::os::unix::io::RawFd;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use strand_core::{rdebug, rerror, rinfo, rwarn};
use strand_core::{StrandResult, SuspendReason, TaskId};

use crate::arena::CoreArena;
use crate::config::RuntimeConfig;
use crate::context::ContextMap;
use crate::poller::Poller;
use crate::registry::{IoOp, IoWaitRegistry};
use crate::run_queue::RunQueue;
use crate::stats::{Stats, StatsSnapshot};
use crate::table::TaskTable;
use crate::task::{Step, Strand, StrandCx};
use crate::{driver, sweep, worker};

/// Per-worker sleep/wake gate: a sleeping flag under a mutex with a
/// condvar, parked with a bounded wait
pub(crate) struct Parker {
    sleeping: Mutex<bool>,
    cond: Condvar,
}

impl Parker {
    fn new() -> Self {
        Self {
            sleeping: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    /// Park until woken or the timeout elapses
    pub fn park(&self, timeout: Duration) {
        let mut sleeping = self.sleeping.lock().unwrap();
        *sleeping = true;
        let (mut guard, _) = self
            .cond
            .wait_timeout_while(sleeping, timeout, |s| *s)
            .unwrap();
        *guard = false;
    }

    /// Wake the worker if it is parked; a wake with nobody parked is lost,
    /// which is fine because an awake worker rescans its queue anyway
    pub fn wake(&self) {
        let mut sleeping = self.sleeping.lock().unwrap();
        if *sleeping {
            *sleeping = false;
            self.cond.notify_one();
        }
    }
}

/// Shared scheduler state, reachable from workers, the I/O driver, the
/// sweeper, and every public entry point
pub(crate) struct SchedCore {
    pub(crate) config: RuntimeConfig,
    pub(crate) nworkers: usize,
    pub(crate) queues: Box<[RunQueue]>,
    pub(crate) loads: Box<[AtomicU32]>,
    pub(crate) parkers: Box<[Parker]>,
    pub(crate) arenas: Box<[CoreArena]>,
    pub(crate) table: TaskTable,
    pub(crate) contexts: ContextMap,
    pub(crate) registry: IoWaitRegistry,
    pub(crate) poller: Poller,
    pub(crate) stats: Stats,
    pub(crate) running: AtomicBool,
    next_id: AtomicU64,
}

impl SchedCore {
    fn new(config: RuntimeConfig) -> StrandResult<Self> {
        let nworkers = config.effective_workers();

        let queues = (0..nworkers).map(|_| RunQueue::new()).collect();
        let loads = (0..nworkers).map(|_| AtomicU32::new(0)).collect();
        let parkers = (0..nworkers).map(|_| Parker::new()).collect();
        let arenas = (0..nworkers)
            .map(|_| CoreArena::new(config.arena_capacity))
            .collect::<StrandResult<Vec<_>>>()?
            .into_boxed_slice();
        let poller = Poller::new(config.cmd_queue_capacity)?;
        let stats = Stats::new(nworkers);

        Ok(Self {
            nworkers,
            queues,
            loads,
            parkers,
            arenas,
            table: TaskTable::new(),
            contexts: ContextMap::new(),
            registry: IoWaitRegistry::new(),
            poller,
            stats,
            running: AtomicBool::new(false),
            next_id: AtomicU64::new(0),
            config,
        })
    }

    fn alloc_id(&self) -> TaskId {
        TaskId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Least-loaded core, ties toward the lowest index. O(n) scan; fine
    /// for worker counts up to the tens.
    pub(crate) fn select_best_core(&self) -> usize {
        let mut best = 0;
        let mut min_load = self.loads[0].load(Ordering::Relaxed);
        for i in 1..self.nworkers {
            let load = self.loads[i].load(Ordering::Relaxed);
            if load < min_load {
                min_load = load;
                best = i;
            }
        }
        best
    }

    /// Push a ready handle onto a core's queue, counting it against that
    /// core's load, and wake the worker
    fn enqueue(&self, id: TaskId, core: usize) {
        self.queues[core].push(id);
        self.loads[core].fetch_add(1, Ordering::Relaxed);
        self.stats.incr_scheduled();
        self.parkers[core].wake();
    }

    fn load_dec(&self, core: usize) {
        let _ = self.loads[core]
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(1))
            });
    }

    /// Take ownership of a new strand and place it on the best core
    pub(crate) fn schedule_boxed(&self, strand: Box<dyn Strand>) -> TaskId {
        let id = self.alloc_id();
        self.table.insert(id, strand);
        self.enqueue(id, self.select_best_core());
        id
    }

    /// As `schedule_boxed` with a core hint instead of the load scan
    pub(crate) fn schedule_boxed_with_affinity(
        &self,
        strand: Box<dyn Strand>,
        core: usize,
    ) -> TaskId {
        let id = self.alloc_id();
        let core = core.min(self.nworkers - 1);
        self.table.insert(id, strand);
        self.enqueue(id, core);
        id
    }

    /// Re-enter an existing handle through core selection (yields and I/O
    /// wakeups)
    fn reschedule(&self, id: TaskId) {
        self.enqueue(id, self.select_best_core());
    }

    /// Mount and resume one strand on `worker_idx`, then dispatch on the
    /// suspend reason the run ended with
    pub(crate) fn run_task(&self, id: TaskId, worker_idx: usize) {
        // A failed take means the pop was stale: the task finished, was
        // reaped, or a racing wakeup enqueue was already honored elsewhere.
        let Some(mut strand) = self.table.take_strand(id) else {
            return;
        };

        let slice_us = self.config.preempt_slice.as_micros() as u64;
        let entry_reason = self.contexts.mount(id, worker_idx, Instant::now(), slice_us);
        if entry_reason == SuspendReason::Preempted && self.config.debug_logging {
            rdebug!("strand {} over its slice, marked preempted", id);
        }

        let mut cx = StrandCx {
            core: self,
            handle: id,
            worker: worker_idx,
        };
        let step = match catch_unwind(AssertUnwindSafe(|| strand.resume(&mut cx))) {
            Ok(step) => step,
            Err(_) => {
                rerror!("strand {} panicked during resume; completing it", id);
                Step::Done
            }
        };

        self.stats.incr_executed(worker_idx);
        self.stats.incr_context_switches();

        match step {
            Step::Done => {
                self.contexts.unmount(id, Instant::now());
                self.notify_completion(id);
                drop(strand);
                self.table.remove(id);
                self.load_dec(worker_idx);
            }
            Step::Pending => {
                // The strand must be visible in the table before the
                // unmount decision point, so a concurrent I/O wakeup that
                // wins the race can hand it to another worker.
                self.table.put_strand(id, strand);
                let reason = self.contexts.unmount(id, Instant::now());
                match reason {
                    SuspendReason::IoWait => {
                        // Ownership moved to the I/O wait registry.
                        self.load_dec(worker_idx);
                    }
                    SuspendReason::Yield => {
                        self.load_dec(worker_idx);
                        self.reschedule(id);
                    }
                    SuspendReason::Completed => {
                        // Completed externally mid-run; release the slot.
                        self.table.remove(id);
                        self.load_dec(worker_idx);
                    }
                    SuspendReason::None | SuspendReason::Preempted => {
                        self.queues[worker_idx].push(id);
                    }
                }
            }
        }
    }

    /// Steal one task from up to `steal_attempts` random victims
    pub(crate) fn try_steal(&self, me: usize, rng: &mut u64) -> Option<TaskId> {
        if self.nworkers <= 1 {
            return None;
        }
        for _ in 0..self.config.steal_attempts {
            *rng = rng.wrapping_mul(1103515245).wrapping_add(12345);
            let victim = (*rng as usize) % self.nworkers;
            if victim == me {
                continue;
            }
            if let Some(id) = self.queues[victim].try_pop_steal() {
                self.load_dec(victim);
                self.loads[me].fetch_add(1, Ordering::Relaxed);
                return Some(id);
            }
        }
        None
    }

    /// Migrate one task from the most- to the least-loaded core when the
    /// gap exceeds the configured threshold
    pub(crate) fn balance_load(&self) {
        let mut max_i = 0;
        let mut min_i = 0;
        let mut max_l = 0u32;
        let mut min_l = u32::MAX;
        for i in 0..self.nworkers {
            let l = self.loads[i].load(Ordering::Relaxed);
            if l > max_l {
                max_l = l;
                max_i = i;
            }
            if l < min_l {
                min_l = l;
                min_i = i;
            }
        }
        if max_l > min_l.saturating_add(self.config.balance_threshold) {
            if let Some(id) = self.queues[max_i].try_pop_steal() {
                self.queues[min_i].push(id);
                self.load_dec(max_i);
                self.loads[min_i].fetch_add(1, Ordering::Relaxed);
                self.parkers[min_i].wake();
            }
        }
    }

    /// Record an I/O suspension for the currently executing strand.
    ///
    /// Registry first, context second (the crate's lock order), poller
    /// last with no lock held. A failed poller registration rolls both
    /// back so the caller observes the error while still runnable.
    pub(crate) fn suspend_for_io(&self, id: TaskId, fd: RawFd, mask: u32) -> StrandResult<()> {
        self.registry.insert(id, fd, mask)?;
        self.contexts.set_reason(id, SuspendReason::IoWait);
        if let Err(e) = self.poller.add(fd, mask) {
            let _ = self.registry.take(id);
            self.contexts.set_reason(id, SuspendReason::None);
            return Err(e);
        }
        self.stats.incr_io_suspended();
        Ok(())
    }

    /// Wake a strand whose descriptor became ready. Safe from any thread;
    /// a take-miss means the wait was cancelled or completed and the
    /// readiness event is discarded.
    pub(crate) fn resume_from_io(&self, id: TaskId, result: i32) {
        let Some(op) = self.registry.take(id) else {
            return;
        };
        self.complete_io(id, op, result);
    }

    /// Shared wakeup tail: the registry entry is already taken
    pub(crate) fn complete_io(&self, id: TaskId, op: IoOp, result: i32) {
        let _ = self.poller.del(op.fd);
        self.stats.incr_resumed();
        match self.contexts.finish_io_wait(id, result) {
            Some(mounted) => {
                // A still-mounted strand is mid-resume on some worker; that
                // worker sees the cleared reason and requeues it itself.
                if !mounted {
                    if self.running.load(Ordering::Acquire) {
                        self.reschedule(id);
                    } else {
                        self.contexts.remove(id);
                        self.table.remove(id);
                    }
                }
            }
            None => {
                // Completed while the event was in flight; nothing to wake.
            }
        }
    }

    /// Drop a pending I/O wait without resuming the task
    pub(crate) fn cancel_io_operation(&self, id: TaskId) {
        if let Some(op) = self.registry.take(id) {
            let _ = self.poller.del(op.fd);
        }
    }

    /// Final-suspend hook: mark the task completed and release its
    /// bookkeeping. Guarded against double completion by context
    /// existence.
    pub(crate) fn notify_completion(&self, id: TaskId) {
        let Some(ctx) = self.contexts.remove(id) else {
            return;
        };
        if self.config.debug_logging {
            rdebug!(
                "strand {} completed after {}us cpu, last on core {}",
                id,
                ctx.cpu_time_us,
                ctx.affinity_core
            );
        }
        // A task can complete while still registered for I/O; clean up
        // silently.
        if let Some(op) = self.registry.take(id) {
            let _ = self.poller.del(op.fd);
        }
        self.table.mark_done(id);
    }

    /// Mark the executing strand to re-enter core selection after its
    /// current resume returns
    pub(crate) fn yield_current(&self, id: TaskId) {
        self.contexts.set_reason(id, SuspendReason::Yield);
    }

    pub(crate) fn take_io_result(&self, id: TaskId) -> Option<i32> {
        self.contexts.take_io_result(id)
    }
}

struct ThreadSet {
    workers: Vec<JoinHandle<()>>,
    io_driver: Option<JoinHandle<()>>,
    sweeper: Option<JoinHandle<()>>,
}

/// The scheduler: a fixed worker pool, an I/O driver, and a sweeper over
/// shared [`SchedCore`] state
///
/// `start` and `stop` are idempotent; the worker count is fixed at
/// construction (0 in the config selects hardware parallelism). Tasks may
/// be scheduled before `start`; they run once workers exist.
pub struct Scheduler {
    core: Arc<SchedCore>,
    threads: Mutex<ThreadSet>,
}

impl Scheduler {
    pub fn new(config: RuntimeConfig) -> StrandResult<Self> {
        config.validate()?;
        let core = Arc::new(SchedCore::new(config)?);
        Ok(Self {
            core,
            threads: Mutex::new(ThreadSet {
                workers: Vec::new(),
                io_driver: None,
                sweeper: None,
            }),
        })
    }

    /// Spawn the worker pool, I/O driver, and sweeper. A second call while
    /// running is a no-op.
    pub fn start(&self) -> StrandResult<()> {
        if self.core.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut threads = self.threads.lock().unwrap();
        for i in 0..self.core.nworkers {
            let core = self.core.clone();
            let handle = std::thread::Builder::new()
                .name(format!("strand-worker-{}", i))
                .spawn(move || worker::worker_main(core, i))
                .expect("failed to spawn worker thread");
            threads.workers.push(handle);
        }

        let core = self.core.clone();
        threads.io_driver = Some(
            std::thread::Builder::new()
                .name("strand-io-driver".into())
                .spawn(move || driver::driver_main(core))
                .expect("failed to spawn i/o driver thread"),
        );

        let core = self.core.clone();
        threads.sweeper = Some(
            std::thread::Builder::new()
                .name("strand-sweeper".into())
                .spawn(move || sweep::sweeper_main(core))
                .expect("failed to spawn sweeper thread"),
        );

        rinfo!("strand scheduler online with {} workers", self.core.nworkers);
        Ok(())
    }

    /// Flip the running flag, wake everyone, join all threads, and drain
    /// queues and the I/O registry. A second call is a no-op.
    pub fn stop(&self) {
        if !self.core.running.swap(false, Ordering::SeqCst) {
            return;
        }

        for parker in self.core.parkers.iter() {
            parker.wake();
        }
        self.core.poller.wake();

        let mut threads = self.threads.lock().unwrap();
        for handle in threads.workers.drain(..) {
            let _ = handle.join();
        }
        if let Some(handle) = threads.io_driver.take() {
            let _ = handle.join();
        }
        if let Some(handle) = threads.sweeper.take() {
            let _ = handle.join();
        }
        drop(threads);

        // Workers are gone, so the owner side of every queue is free.
        for (i, queue) in self.core.queues.iter().enumerate() {
            while let Some(id) = queue.pop_owner() {
                rdebug!("dropping queued strand {} at shutdown", id);
                self.core.contexts.remove(id);
                self.core.table.remove(id);
            }
            debug_assert!(queue.is_empty_owner());
            self.core.loads[i].store(0, Ordering::Relaxed);
        }

        for (id, op) in self.core.registry.drain() {
            rwarn!("dropping strand {} still waiting on fd {} at shutdown", id, op.fd);
            let _ = self.core.poller.del(op.fd);
            self.core.contexts.remove(id);
            self.core.table.remove(id);
        }

        self.core.contexts.clear();
        self.core.table.clear();
        for arena in self.core.arenas.iter() {
            arena.reset();
        }

        rinfo!("strand scheduler stopped");
    }

    /// Transfer a strand to the scheduler; returns its handle immediately
    pub fn schedule(&self, strand: Box<dyn Strand>) -> TaskId {
        self.core.schedule_boxed(strand)
    }

    /// As `schedule`, with a core hint (clamped to the valid range)
    pub fn schedule_with_affinity(&self, strand: Box<dyn Strand>, core: usize) -> TaskId {
        self.core.schedule_boxed_with_affinity(strand, core)
    }

    /// Mark the currently executing strand to re-enter core selection
    pub fn yield_current(&self, id: TaskId) {
        self.core.yield_current(id);
    }

    /// Register an I/O suspension for an executing strand; see
    /// [`StrandCx::suspend_io`](crate::task::StrandCx::suspend_io) for the
    /// in-task entry point
    pub fn suspend_for_io(&self, id: TaskId, fd: RawFd, mask: u32) -> StrandResult<()> {
        self.core.suspend_for_io(id, fd, mask)
    }

    /// Wake a strand whose descriptor became ready; safe from any thread
    pub fn resume_from_io(&self, id: TaskId, result: i32) {
        self.core.resume_from_io(id, result);
    }

    /// Drop a pending I/O wait without resuming the task; completing the
    /// task stays the caller's decision
    pub fn cancel_io_operation(&self, id: TaskId) {
        self.core.cancel_io_operation(id);
    }

    /// Signal completion for a task (idempotent)
    pub fn notify_completion(&self, id: TaskId) {
        self.core.notify_completion(id);
    }

    /// Snapshot of the scheduler counters
    pub fn stats(&self) -> StatsSnapshot {
        self.core.stats.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.core.running.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.core.config
    }

    /// Number of workers this scheduler was built with
    pub fn workers(&self) -> usize {
        self.core.nworkers
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
