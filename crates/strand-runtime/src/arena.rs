//! Per-core bump arenas
//!
//! Each worker owns one `CoreArena`: an mmap-backed monotonic bump region
//! for worker-lifetime scratch allocations. No individual frees and no
//! destructors; the whole region is reclaimed at `reset()` when the
//! scheduler stops. Allocations must not outlive the arena.

use std::alloc::Layout;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

use strand_core::{StrandError, StrandResult};

use crate::os::last_errno;

/// Monotonic bump region backed by anonymous mmap
pub struct CoreArena {
    base: *mut u8,
    capacity: usize,
    offset: AtomicUsize,
}

unsafe impl Send for CoreArena {}
unsafe impl Sync for CoreArena {}

impl CoreArena {
    /// Reserve `capacity` bytes (rounded up to page size)
    pub fn new(capacity: usize) -> StrandResult<Self> {
        let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
        let capacity = capacity.max(page).div_ceil(page) * page;

        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                capacity,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(StrandError::Platform(last_errno()));
        }

        Ok(Self {
            base: base as *mut u8,
            capacity,
            offset: AtomicUsize::new(0),
        })
    }

    /// Bump-allocate a block, or `None` when the region is exhausted
    pub fn alloc(&self, layout: Layout) -> Option<NonNull<u8>> {
        let align = layout.align();
        let size = layout.size();
        let mut cur = self.offset.load(Ordering::Relaxed);
        loop {
            let aligned = (cur + align - 1) & !(align - 1);
            let end = aligned.checked_add(size)?;
            if end > self.capacity {
                return None;
            }
            match self.offset.compare_exchange_weak(
                cur,
                end,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    // Safety: [aligned, end) is within the mapping and now
                    // exclusively ours.
                    return NonNull::new(unsafe { self.base.add(aligned) });
                }
                Err(observed) => cur = observed,
            }
        }
    }

    /// Move `value` into the arena.
    ///
    /// The value's destructor will never run; only use this for plain-data
    /// scratch state.
    pub fn alloc_value<T>(&self, value: T) -> Option<NonNull<T>> {
        let ptr = self.alloc(Layout::new::<T>())?.cast::<T>();
        unsafe { ptr.as_ptr().write(value) };
        Some(ptr)
    }

    /// Reclaim everything. Caller must ensure no allocation is still in use.
    pub fn reset(&self) {
        self.offset.store(0, Ordering::Release);
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn used(&self) -> usize {
        self.offset.load(Ordering::Relaxed)
    }
}

impl Drop for CoreArena {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base as *mut libc::c_void, self.capacity);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bump_and_reset() {
        let arena = CoreArena::new(4096).unwrap();
        let a = arena.alloc(Layout::from_size_align(100, 8).unwrap()).unwrap();
        let b = arena.alloc(Layout::from_size_align(100, 8).unwrap()).unwrap();
        assert_ne!(a.as_ptr(), b.as_ptr());
        assert!(arena.used() >= 200);

        arena.reset();
        assert_eq!(arena.used(), 0);
        let c = arena.alloc(Layout::from_size_align(8, 8).unwrap()).unwrap();
        assert_eq!(c.as_ptr(), a.as_ptr());
    }

    #[test]
    fn test_exhaustion() {
        let arena = CoreArena::new(4096).unwrap();
        assert!(arena
            .alloc(Layout::from_size_align(arena.capacity() + 1, 1).unwrap())
            .is_none());
    }

    #[test]
    fn test_alloc_value_roundtrip() {
        let arena = CoreArena::new(4096).unwrap();
        let mut p = arena.alloc_value([1u64, 2, 3]).unwrap();
        let slice = unsafe { p.as_mut() };
        slice[0] = 9;
        assert_eq!(*slice, [9, 2, 3]);
    }
}
