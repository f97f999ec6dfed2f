//! Readiness event masks and poller events

/// Interest in readability
pub const READABLE: u32 = 1 << 0;

/// Interest in writability
pub const WRITABLE: u32 = 1 << 1;

/// A readiness event reported by the poller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoEvent {
    /// The descriptor the event fired on
    pub fd: i32,
    /// Combination of [`READABLE`] / [`WRITABLE`] bits observed
    pub mask: u32,
    /// Backend result code (poll bits for io_uring, filter data for kqueue,
    /// 0 where the backend reports none)
    pub res: i32,
}

impl IoEvent {
    /// An empty slot, used to size event buffers
    pub const fn empty() -> Self {
        Self { fd: -1, mask: 0, res: 0 }
    }

    #[inline]
    pub const fn is_readable(&self) -> bool {
        self.mask & READABLE != 0
    }

    #[inline]
    pub const fn is_writable(&self) -> bool {
        self.mask & WRITABLE != 0
    }
}

/// Render a mask for log output
pub fn mask_str(mask: u32) -> &'static str {
    match (mask & READABLE != 0, mask & WRITABLE != 0) {
        (true, true) => "r|w",
        (true, false) => "r",
        (false, true) => "w",
        (false, false) => "-",
    }
}
