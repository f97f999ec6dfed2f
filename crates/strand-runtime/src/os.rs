//! Small platform helpers shared by the poller and socket adapters

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        /// Read the calling thread's errno
        #[inline]
        pub fn last_errno() -> i32 {
            unsafe { *libc::__errno_location() }
        }
    } else {
        #[inline]
        pub fn last_errno() -> i32 {
            unsafe { *libc::__error() }
        }
    }
}

/// True for the two "try again later" codes non-blocking sockets return
#[inline]
pub fn is_would_block(errno: i32) -> bool {
    errno == libc::EAGAIN || errno == libc::EWOULDBLOCK
}
