//! I/O driver thread
//!
//! The single consumer of the poller. Every readiness event is routed back
//! to its waiting strand through the registry's fd index and requeued via
//! the normal scheduling path; nothing ever resumes on this thread's
//! stack. Events whose waiter has vanished (cancelled, completed, swept)
//! are discarded.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use strand_core::{rdebug, rerror, IoEvent};

use crate::scheduler::SchedCore;

pub(crate) fn driver_main(core: Arc<SchedCore>) {
    let mut events = vec![IoEvent::empty(); core.config.max_events];
    let timeout_ms = core.config.poll_timeout.as_millis() as i32;

    if core.config.debug_logging {
        rdebug!("i/o driver started");
    }

    while core.running.load(Ordering::Acquire) {
        let n = match core.poller.wait(&mut events, timeout_ms) {
            Ok(n) => n,
            Err(e) => {
                rerror!("i/o driver wait failed: {}", e);
                std::thread::sleep(Duration::from_millis(10));
                continue;
            }
        };

        for ev in &events[..n] {
            if let Some((id, op)) = core.registry.take_by_fd(ev.fd) {
                core.complete_io(id, op, ev.res);
            }
        }
    }

    if core.config.debug_logging {
        rdebug!("i/o driver shutting down");
    }
}
