//! # strand - lightweight cooperative tasks over a pinned worker pool
//!
//! Facade over `strand-runtime`: a process-global scheduler plus
//! re-exports of the working vocabulary.
//!
//! ## Quick start
//!
//! ```ignore
//! use strand::{self as rt, Step};
//!
//! fn main() -> strand::StrandResult<()> {
//!     rt::start(0)?; // 0 = one worker per hardware core
//!
//!     rt::spawn(|cx| {
//!         println!("hello from a strand on worker {}", cx.worker());
//!         Step::Done
//!     })?;
//!
//!     // ... do work, serve traffic ...
//!     rt::stop();
//!     Ok(())
//! }
//! ```
//!
//! Prefer an explicit [`Scheduler`] when embedding several runtimes in one
//! process; everything here simply forwards to a lazily-created global
//! instance.

use std::sync::OnceLock;

// Core vocabulary
pub use strand_core::{
    env_get, env_get_bool, mask_str, IoEvent, LogLevel, StrandError, StrandResult, SuspendReason,
    TaskId, READABLE, WRITABLE,
};
// Log macros land at the strand-core crate root
pub use strand_core::{rdebug, rerror, rinfo, rprintln, rtrace, rwarn};
pub use strand_core::rprint;

// Runtime machinery
pub use strand_runtime::{
    from_fn, FnStrand, IoPoll, NetListener, NetStream, RuntimeConfig, Scheduler, StatsSnapshot,
    Step, Strand, StrandCx,
};

static GLOBAL: OnceLock<Scheduler> = OnceLock::new();

/// Initialize the global scheduler with an explicit configuration.
///
/// The first initialization wins; later calls (including the implicit one
/// inside [`start`]) return the existing instance.
pub fn init(config: RuntimeConfig) -> StrandResult<&'static Scheduler> {
    if GLOBAL.get().is_none() {
        let sched = Scheduler::new(config)?;
        // A racing init may have won; its instance is the one that counts.
        let _ = GLOBAL.set(sched);
    }
    Ok(GLOBAL.get().expect("global scheduler just initialized"))
}

/// Access the global scheduler
pub fn scheduler() -> StrandResult<&'static Scheduler> {
    GLOBAL.get().ok_or(StrandError::NotInitialized)
}

/// Start the global scheduler with `n_workers` workers (0 = hardware
/// parallelism). Idempotent.
pub fn start(n_workers: usize) -> StrandResult<()> {
    let sched = init(RuntimeConfig::from_env().num_workers(n_workers))?;
    sched.start()
}

/// Stop the global scheduler, joining all workers. Idempotent; a no-op if
/// the scheduler was never started.
pub fn stop() {
    if let Some(sched) = GLOBAL.get() {
        sched.stop();
    }
}

/// Transfer a strand to the global scheduler
pub fn schedule(strand: Box<dyn Strand>) -> StrandResult<TaskId> {
    Ok(scheduler()?.schedule(strand))
}

/// As [`schedule`], with a core hint
pub fn schedule_with_affinity(strand: Box<dyn Strand>, core: usize) -> StrandResult<TaskId> {
    Ok(scheduler()?.schedule_with_affinity(strand, core))
}

/// Spawn a closure-backed strand; each call of the closure is one resume
pub fn spawn<F>(f: F) -> StrandResult<TaskId>
where
    F: FnMut(&mut StrandCx<'_>) -> Step + Send + 'static,
{
    schedule(Box::new(FnStrand::new(f)))
}

/// Counter snapshot from the global scheduler
pub fn get_stats() -> StrandResult<StatsSnapshot> {
    Ok(scheduler()?.stats())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    // One combined test: the global scheduler is process-wide state, so
    // exercising the whole lifecycle in a single place keeps test runs
    // independent of execution order.
    #[test]
    fn test_global_runtime_lifecycle() {
        assert!(matches!(get_stats(), Err(StrandError::NotInitialized)));

        start(2).unwrap();
        start(2).unwrap(); // idempotent

        let hits = Arc::new(AtomicU32::new(0));
        for _ in 0..8 {
            let hits = hits.clone();
            spawn(move |_cx| {
                hits.fetch_add(1, Ordering::SeqCst);
                Step::Done
            })
            .unwrap();
        }

        let deadline = Instant::now() + Duration::from_secs(2);
        while hits.load(Ordering::SeqCst) < 8 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(hits.load(Ordering::SeqCst), 8);
        assert!(get_stats().unwrap().total_scheduled >= 8);

        stop();
        stop(); // idempotent
        assert!(!scheduler().unwrap().is_running());
    }
}
