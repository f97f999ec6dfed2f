//! I/O wait registry
//!
//! Maps a suspended task to its pending I/O operation, with an fd reverse
//! index so the I/O driver can route readiness back to the waiter. At most
//! one operation per task and one waiter per fd. `take` must precede the
//! poller `del` so a descriptor is never removed twice.

use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use strand_core::{StrandError, StrandResult, TaskId};

/// A pending I/O operation
#[derive(Debug, Clone, Copy)]
pub(crate) struct IoOp {
    pub fd: RawFd,
    pub mask: u32,
    pub start: Instant,
}

struct Inner {
    ops: HashMap<TaskId, IoOp>,
    by_fd: HashMap<RawFd, TaskId>,
}

/// Registry of tasks suspended on descriptor readiness
pub(crate) struct IoWaitRegistry {
    inner: Mutex<Inner>,
}

impl IoWaitRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                ops: HashMap::new(),
                by_fd: HashMap::new(),
            }),
        }
    }

    /// Record that `id` is waiting on `fd` with interest `mask`.
    ///
    /// Fails with `InvalidState` if the task already has a pending
    /// operation, or if another task is already waiting on the fd.
    pub fn insert(&self, id: TaskId, fd: RawFd, mask: u32) -> StrandResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.ops.contains_key(&id) || inner.by_fd.contains_key(&fd) {
            return Err(StrandError::InvalidState);
        }
        inner.ops.insert(
            id,
            IoOp {
                fd,
                mask,
                start: Instant::now(),
            },
        );
        inner.by_fd.insert(fd, id);
        Ok(())
    }

    /// Remove and return the task's operation, if any
    pub fn take(&self, id: TaskId) -> Option<IoOp> {
        let mut inner = self.inner.lock().unwrap();
        let op = inner.ops.remove(&id)?;
        inner.by_fd.remove(&op.fd);
        Some(op)
    }

    /// Remove and return the waiter for a descriptor, if any
    pub fn take_by_fd(&self, fd: RawFd) -> Option<(TaskId, IoOp)> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.by_fd.remove(&fd)?;
        let op = inner.ops.remove(&id)?;
        Some((id, op))
    }

    /// Remove and return every operation older than `now - threshold`
    pub fn sweep(&self, now: Instant, threshold: Duration) -> Vec<(TaskId, IoOp)> {
        let mut inner = self.inner.lock().unwrap();
        let expired: Vec<TaskId> = inner
            .ops
            .iter()
            .filter(|(_, op)| now.saturating_duration_since(op.start) > threshold)
            .map(|(id, _)| *id)
            .collect();
        expired
            .into_iter()
            .filter_map(|id| {
                let op = inner.ops.remove(&id)?;
                inner.by_fd.remove(&op.fd);
                Some((id, op))
            })
            .collect()
    }

    /// Remove and return everything (shutdown path)
    pub fn drain(&self) -> Vec<(TaskId, IoOp)> {
        let mut inner = self.inner.lock().unwrap();
        inner.by_fd.clear();
        inner.ops.drain().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_core::READABLE;

    #[test]
    fn test_insert_take() {
        let reg = IoWaitRegistry::new();
        let id = TaskId::new(1);
        reg.insert(id, 5, READABLE).unwrap();
        assert_eq!(reg.len(), 1);

        let op = reg.take(id).unwrap();
        assert_eq!(op.fd, 5);
        assert_eq!(op.mask, READABLE);
        assert!(reg.take(id).is_none());
        assert!(reg.is_empty());
    }

    #[test]
    fn test_at_most_one_op_per_task() {
        let reg = IoWaitRegistry::new();
        let id = TaskId::new(1);
        reg.insert(id, 5, READABLE).unwrap();
        assert_eq!(
            reg.insert(id, 6, READABLE),
            Err(StrandError::InvalidState)
        );
    }

    #[test]
    fn test_one_waiter_per_fd() {
        let reg = IoWaitRegistry::new();
        reg.insert(TaskId::new(1), 5, READABLE).unwrap();
        assert_eq!(
            reg.insert(TaskId::new(2), 5, READABLE),
            Err(StrandError::InvalidState)
        );
    }

    #[test]
    fn test_take_by_fd() {
        let reg = IoWaitRegistry::new();
        let id = TaskId::new(9);
        reg.insert(id, 7, READABLE).unwrap();

        let (got, op) = reg.take_by_fd(7).unwrap();
        assert_eq!(got, id);
        assert_eq!(op.fd, 7);
        assert!(reg.take_by_fd(7).is_none());
        assert!(reg.take(id).is_none());
    }

    #[test]
    fn test_sweep_expires_old_entries() {
        let reg = IoWaitRegistry::new();
        let id = TaskId::new(1);
        reg.insert(id, 3, READABLE).unwrap();

        // Nothing expires at a 30s threshold when observed now.
        assert!(reg.sweep(Instant::now(), Duration::from_secs(30)).is_empty());
        assert_eq!(reg.len(), 1);

        // Observed 31 seconds in the future, the entry is overdue.
        let future = Instant::now() + Duration::from_secs(31);
        let expired = reg.sweep(future, Duration::from_secs(30));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].0, id);
        assert!(reg.is_empty());
    }
}
