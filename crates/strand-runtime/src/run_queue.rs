//! Per-worker run queues
//!
//! `MpscQueue` is an intrusive multi-producer single-consumer queue with a
//! sentinel node: producers swap the tail and link the previous tail with a
//! release store; the consumer follows the sentinel's next pointer with an
//! acquire load and discards the old sentinel after each pop.
//!
//! `RunQueue` wraps it with a consumer-side try-lock so that work stealing
//! and load-balance migration (which pop from a foreign queue) never race
//! the owning worker. Producers stay lock-free.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

use strand_core::TaskId;

struct Node<T> {
    next: AtomicPtr<Node<T>>,
    value: Option<T>,
}

impl<T> Node<T> {
    fn boxed(value: Option<T>) -> *mut Node<T> {
        Box::into_raw(Box::new(Node {
            next: AtomicPtr::new(std::ptr::null_mut()),
            value,
        }))
    }
}

/// Intrusive MPSC queue. Any thread may push; only one thread at a time may
/// pop (see [`RunQueue`] for the serialization wrapper).
pub struct MpscQueue<T> {
    /// Consumer-only sentinel pointer
    head: UnsafeCell<*mut Node<T>>,
    tail: AtomicPtr<Node<T>>,
}

unsafe impl<T: Send> Send for MpscQueue<T> {}
unsafe impl<T: Send> Sync for MpscQueue<T> {}

impl<T> MpscQueue<T> {
    pub fn new() -> Self {
        let sentinel = Node::boxed(None);
        Self {
            head: UnsafeCell::new(sentinel),
            tail: AtomicPtr::new(sentinel),
        }
    }

    /// Push a value. Lock-free; safe from any thread.
    pub fn push(&self, value: T) {
        let node = Node::boxed(Some(value));
        let prev = self.tail.swap(node, Ordering::AcqRel);
        // Link the previous tail. Publishes the node's value to the consumer.
        unsafe { (*prev).next.store(node, Ordering::Release) };
    }

    /// Pop the oldest value.
    ///
    /// # Safety
    ///
    /// Only one thread may call `pop` (or `is_empty`) at a time.
    pub unsafe fn pop(&self) -> Option<T> {
        let head = *self.head.get();
        let next = (*head).next.load(Ordering::Acquire);
        if next.is_null() {
            return None;
        }
        let value = (*next).value.take();
        // The popped node becomes the new sentinel; the old one is freed.
        *self.head.get() = next;
        drop(Box::from_raw(head));
        value
    }

    /// Observe whether the queue is empty.
    ///
    /// # Safety
    ///
    /// Consumer-side only, like `pop`.
    pub unsafe fn is_empty(&self) -> bool {
        let head = *self.head.get();
        (*head).next.load(Ordering::Acquire).is_null()
    }
}

impl<T> Drop for MpscQueue<T> {
    fn drop(&mut self) {
        unsafe {
            let mut node = *self.head.get();
            while !node.is_null() {
                let next = (*node).next.load(Ordering::Relaxed);
                drop(Box::from_raw(node));
                node = next;
            }
        }
    }
}

/// A worker's run queue of ready task handles.
///
/// The consumer end is serialized by a try-lock: the owning worker spins
/// (contention only comes from brief foreign pops), thieves give up instead
/// of blocking.
pub struct RunQueue {
    queue: MpscQueue<TaskId>,
    consumer: AtomicBool,
}

impl RunQueue {
    pub fn new() -> Self {
        Self {
            queue: MpscQueue::new(),
            consumer: AtomicBool::new(false),
        }
    }

    /// Enqueue a ready task. Lock-free; safe from any thread.
    #[inline]
    pub fn push(&self, id: TaskId) {
        self.queue.push(id);
    }

    /// Pop as the owning worker. Spins until the consumer end is free.
    pub fn pop_owner(&self) -> Option<TaskId> {
        while self
            .consumer
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            std::hint::spin_loop();
        }
        let id = unsafe { self.queue.pop() };
        self.consumer.store(false, Ordering::Release);
        id
    }

    /// Observe emptiness from the consumer side (owner thread, or any
    /// thread once the workers are joined)
    pub fn is_empty_owner(&self) -> bool {
        while self
            .consumer
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            std::hint::spin_loop();
        }
        let empty = unsafe { self.queue.is_empty() };
        self.consumer.store(false, Ordering::Release);
        empty
    }

    /// Pop as a thief or the load balancer. Returns `None` immediately if
    /// the consumer end is busy.
    pub fn try_pop_steal(&self) -> Option<TaskId> {
        if self
            .consumer
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return None;
        }
        let id = unsafe { self.queue.pop() };
        self.consumer.store(false, Ordering::Release);
        id
    }
}

impl Default for RunQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_single_producer() {
        let q = MpscQueue::new();
        q.push(1u32);
        q.push(2);
        q.push(3);
        unsafe {
            assert!(!q.is_empty());
            assert_eq!(q.pop(), Some(1));
            assert_eq!(q.pop(), Some(2));
            assert_eq!(q.pop(), Some(3));
            assert_eq!(q.pop(), None);
            assert!(q.is_empty());
        }
    }

    #[test]
    fn test_concurrent_producers_lose_nothing() {
        let q = Arc::new(MpscQueue::new());
        let producers = 4u32;
        let per_producer = 1000u32;

        let handles: Vec<_> = (0..producers)
            .map(|p| {
                let q = q.clone();
                thread::spawn(move || {
                    for i in 0..per_producer {
                        q.push(p * per_producer + i);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let mut seen = vec![false; (producers * per_producer) as usize];
        while let Some(v) = unsafe { q.pop() } {
            assert!(!seen[v as usize], "duplicate pop of {}", v);
            seen[v as usize] = true;
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn test_fifo_per_producer_preserved() {
        let q = Arc::new(MpscQueue::new());
        let writer = {
            let q = q.clone();
            thread::spawn(move || {
                for i in 0..10_000u32 {
                    q.push(i);
                }
            })
        };
        writer.join().unwrap();

        let mut last = None;
        while let Some(v) = unsafe { q.pop() } {
            if let Some(prev) = last {
                assert!(v > prev);
            }
            last = Some(v);
        }
        assert_eq!(last, Some(9_999));
    }

    #[test]
    fn test_steal_does_not_duplicate() {
        let rq = Arc::new(RunQueue::new());
        for i in 0..1000 {
            rq.push(TaskId::new(i));
        }

        let thief = {
            let rq = rq.clone();
            thread::spawn(move || {
                let mut got = Vec::new();
                for _ in 0..10_000 {
                    if let Some(id) = rq.try_pop_steal() {
                        got.push(id);
                    }
                }
                got
            })
        };

        let mut mine = Vec::new();
        while let Some(id) = rq.pop_owner() {
            mine.push(id);
        }
        let stolen = thief.join().unwrap();
        // Pick up anything left behind after the thief gave up.
        while let Some(id) = rq.pop_owner() {
            mine.push(id);
        }

        let mut all: Vec<u64> = mine
            .iter()
            .chain(stolen.iter())
            .map(|id| id.as_u64())
            .collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 1000, "a steal duplicated or dropped a task");
    }
}
