//! Task storage
//!
//! Owns the boxed strands between runs. A worker takes a strand out for the
//! duration of one resume so no lock is held while user code executes; a
//! failed take means another worker already owns the strand (or the task is
//! gone) and the pop was stale.

use std::collections::HashMap;
use std::sync::Mutex;

use strand_core::TaskId;

use crate::task::Strand;

struct TaskSlot {
    strand: Option<Box<dyn Strand>>,
    done: bool,
}

/// Storage for spawned tasks, keyed by handle
pub(crate) struct TaskTable {
    inner: Mutex<HashMap<TaskId, TaskSlot>>,
}

impl TaskTable {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, id: TaskId, strand: Box<dyn Strand>) {
        let mut map = self.inner.lock().unwrap();
        map.insert(
            id,
            TaskSlot {
                strand: Some(strand),
                done: false,
            },
        );
    }

    /// Take the strand for a resume. `None` if the task is gone, finished,
    /// or currently running elsewhere.
    pub fn take_strand(&self, id: TaskId) -> Option<Box<dyn Strand>> {
        let mut map = self.inner.lock().unwrap();
        let slot = map.get_mut(&id)?;
        if slot.done {
            return None;
        }
        slot.strand.take()
    }

    /// Return the strand after a resume that did not complete
    pub fn put_strand(&self, id: TaskId, strand: Box<dyn Strand>) {
        let mut map = self.inner.lock().unwrap();
        if let Some(slot) = map.get_mut(&id) {
            slot.strand = Some(strand);
        }
    }

    /// Flag the task as finished so stale queue entries stop resuming it
    pub fn mark_done(&self, id: TaskId) {
        let mut map = self.inner.lock().unwrap();
        if let Some(slot) = map.get_mut(&id) {
            slot.done = true;
        }
    }

    pub fn is_done(&self, id: TaskId) -> bool {
        let map = self.inner.lock().unwrap();
        map.get(&id).map(|s| s.done).unwrap_or(true)
    }

    /// Drop the task and its strand
    pub fn remove(&self, id: TaskId) {
        self.inner.lock().unwrap().remove(&id);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{from_fn, Step};

    #[test]
    fn test_take_is_exclusive() {
        let table = TaskTable::new();
        let id = TaskId::new(1);
        table.insert(id, Box::new(from_fn(|_cx| Step::Done)));

        let strand = table.take_strand(id).unwrap();
        assert!(table.take_strand(id).is_none(), "strand taken twice");

        table.put_strand(id, strand);
        assert!(table.take_strand(id).is_some());
    }

    #[test]
    fn test_done_blocks_take() {
        let table = TaskTable::new();
        let id = TaskId::new(2);
        table.insert(id, Box::new(from_fn(|_cx| Step::Done)));
        table.mark_done(id);
        assert!(table.take_strand(id).is_none());
        assert!(table.is_done(id));

        table.remove(id);
        assert_eq!(table.len(), 0);
        // A handle that never existed reads as done.
        assert!(table.is_done(TaskId::new(99)));
    }
}
