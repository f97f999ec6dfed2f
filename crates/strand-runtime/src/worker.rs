//! Worker threads
//!
//! Each worker is pinned to its core and loops: pop from the local queue,
//! otherwise try to steal, periodically rebalance, and park briefly when
//! idle. The loop's mutable scratch (steal RNG, balance clock) lives in
//! the worker's own arena for the lifetime of the run.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use strand_core::rdebug;

use crate::scheduler::SchedCore;

/// Worker-lifetime scratch state; plain data only (arena memory is
/// reclaimed wholesale, destructors never run)
struct WorkerScratch {
    rng: u64,
    last_balance: Instant,
}

impl WorkerScratch {
    fn new(worker_id: usize) -> Self {
        Self {
            rng: (worker_id as u64).wrapping_mul(2654435761).wrapping_add(1),
            last_balance: Instant::now(),
        }
    }
}

/// Main loop for worker `worker_id`
pub(crate) fn worker_main(core: Arc<SchedCore>, worker_id: usize) {
    pin_to_core(worker_id);

    let mut fallback = WorkerScratch::new(worker_id);
    let scratch: &mut WorkerScratch =
        match core.arenas[worker_id].alloc_value(WorkerScratch::new(worker_id)) {
            // Safety: the arena lives in SchedCore and is only reset after
            // this thread is joined, so the allocation outlives the loop.
            Some(ptr) => unsafe { &mut *ptr.as_ptr() },
            None => &mut fallback,
        };

    if core.config.debug_logging {
        rdebug!("worker {} started", worker_id);
    }

    while core.running.load(Ordering::Acquire) {
        let mut found = false;

        if let Some(id) = core.queues[worker_id].pop_owner() {
            found = true;
            core.run_task(id, worker_id);
        } else if let Some(id) = core.try_steal(worker_id, &mut scratch.rng) {
            found = true;
            core.stats.incr_stolen();
            core.run_task(id, worker_id);
        }

        if scratch.last_balance.elapsed() >= core.config.balance_interval {
            core.balance_load();
            scratch.last_balance = Instant::now();
        }

        if !found {
            core.parkers[worker_id].park(core.config.park_timeout);
        }
    }

    if core.config.debug_logging {
        rdebug!("worker {} shutting down", worker_id);
    }
}

/// Pin the calling thread to the core matching its worker index, where the
/// platform supports it. More workers than cores leaves the extras
/// floating.
fn pin_to_core(worker_id: usize) {
    if let Some(core_ids) = core_affinity::get_core_ids() {
        if let Some(&core_id) = core_ids.get(worker_id) {
            core_affinity::set_for_current(core_id);
        }
    }
}
