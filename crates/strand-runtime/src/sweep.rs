//! Expiry sweeper thread
//!
//! Safety net against forgotten I/O registrations: periodically reaps
//! registry entries older than the configured expiry and destroys their
//! tasks. Ordinary timeouts are the caller's responsibility; a sweep
//! firing is worth a warning.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use strand_core::rwarn;

use crate::scheduler::SchedCore;

pub(crate) fn sweeper_main(core: Arc<SchedCore>) {
    while core.running.load(Ordering::Acquire) {
        std::thread::sleep(core.config.sweep_interval);

        let expired = core.registry.sweep(Instant::now(), core.config.io_expiry);
        for (id, op) in expired {
            rwarn!(
                "strand {} waited on fd {} beyond {:?}; destroying it",
                id,
                op.fd,
                core.config.io_expiry
            );
            let _ = core.poller.del(op.fd);
            core.contexts.remove(id);
            core.table.remove(id);
        }
    }
}
