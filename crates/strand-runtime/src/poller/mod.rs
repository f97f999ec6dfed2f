//! Readiness poller
//!
//! Wraps the platform readiness mechanism behind a uniform contract:
//!
//! - `add(fd, mask)` registers interest; repeated adds merge masks, so
//!   `add(fd, R)` then `add(fd, W)` observes the same events as
//!   `add(fd, R|W)`.
//! - `modify(fd, mask)` replaces the interest set.
//! - `del(fd)` drops all interest; idempotent.
//! - `wait(out, timeout_ms)` fills up to `out.len()` events, blocking at
//!   most `timeout_ms`; returns 0 on timeout.
//! - `wake()` forces a blocked `wait` to return early (shutdown path).
//!
//! Backend selection is a compile-time choice: io_uring poll mode on Linux
//! (default), kqueue on macOS/BSD, and a level-triggered epoll fallback on
//! Linux when the `iouring` feature is disabled.

cfg_if::cfg_if! {
    if #[cfg(all(target_os = "linux", feature = "iouring"))] {
        mod iouring;
        pub use iouring::Poller;
    } else if #[cfg(target_os = "linux")] {
        mod epoll;
        pub use epoll::Poller;
    } else if #[cfg(any(
        target_os = "macos",
        target_os = "freebsd",
        target_os = "netbsd",
        target_os = "openbsd"
    ))] {
        mod kqueue;
        pub use kqueue::Poller;
    } else {
        compile_error!("no poller backend for this platform");
    }
}

#[cfg(test)]
mod tests {
    use super::Poller;
    use strand_core::{IoEvent, READABLE, WRITABLE};

    fn pipe_pair() -> (i32, i32) {
        let mut fds = [0i32; 2];
        let ret = unsafe { libc::pipe(fds.as_mut_ptr()) };
        assert_eq!(ret, 0, "pipe() failed");
        (fds[0], fds[1])
    }

    fn close(fd: i32) {
        unsafe { libc::close(fd) };
    }

    fn write_byte(fd: i32) {
        let b = [0x2au8];
        let n = unsafe { libc::write(fd, b.as_ptr() as *const libc::c_void, 1) };
        assert_eq!(n, 1);
    }

    #[test]
    fn test_wait_times_out_empty() {
        let poller = Poller::new(64).unwrap();
        let mut events = [IoEvent::empty(); 8];
        let n = poller.wait(&mut events, 20).unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn test_readable_pipe_reports_event() {
        let poller = Poller::new(64).unwrap();
        let (rd, wr) = pipe_pair();

        poller.add(rd, READABLE).unwrap();
        write_byte(wr);

        let mut events = [IoEvent::empty(); 8];
        let mut got = None;
        // The command-queue backends register on the first wait pass.
        for _ in 0..10 {
            let n = poller.wait(&mut events, 100).unwrap();
            if let Some(ev) = events[..n].iter().find(|ev| ev.fd == rd) {
                got = Some(*ev);
                break;
            }
        }
        let ev = got.expect("no readiness reported for the pipe");
        assert!(ev.is_readable());

        poller.del(rd).unwrap();
        close(rd);
        close(wr);
    }

    #[test]
    fn test_mask_adds_merge() {
        let poller = Poller::new(64).unwrap();
        let (rd, wr) = pipe_pair();

        // Write end of a fresh pipe is writable; register in two steps and
        // expect the same outcome as a single R|W registration.
        poller.add(wr, READABLE).unwrap();
        poller.add(wr, WRITABLE).unwrap();

        let mut events = [IoEvent::empty(); 8];
        let mut writable = false;
        for _ in 0..10 {
            let n = poller.wait(&mut events, 100).unwrap();
            if events[..n].iter().any(|ev| ev.fd == wr && ev.is_writable()) {
                writable = true;
                break;
            }
        }
        assert!(writable, "merged mask lost the WRITABLE interest");

        poller.del(wr).unwrap();
        close(rd);
        close(wr);
    }

    #[test]
    fn test_modify_replaces_interest() {
        let poller = Poller::new(64).unwrap();
        let (rd, wr) = pipe_pair();

        // Readability on the write end of an empty pipe never fires;
        // replacing the interest with WRITABLE does.
        poller.add(wr, READABLE).unwrap();
        poller.modify(wr, WRITABLE).unwrap();

        let mut events = [IoEvent::empty(); 8];
        let mut writable = false;
        for _ in 0..10 {
            let n = poller.wait(&mut events, 100).unwrap();
            if events[..n].iter().any(|ev| ev.fd == wr && ev.is_writable()) {
                writable = true;
                break;
            }
        }
        assert!(writable, "modify did not install the new interest");

        poller.del(wr).unwrap();
        close(rd);
        close(wr);
    }

    #[test]
    fn test_del_is_idempotent() {
        let poller = Poller::new(64).unwrap();
        let (rd, wr) = pipe_pair();

        poller.add(rd, READABLE).unwrap();
        poller.del(rd).unwrap();
        poller.del(rd).unwrap();

        write_byte(wr);
        let mut events = [IoEvent::empty(); 8];
        // A couple of passes to let command-queue backends apply the del.
        let mut fired = false;
        for _ in 0..3 {
            let n = poller.wait(&mut events, 20).unwrap();
            if events[..n].iter().any(|ev| ev.fd == rd) {
                fired = true;
            }
        }
        assert!(!fired, "event delivered after del");

        close(rd);
        close(wr);
    }

    #[test]
    fn test_wake_unblocks_wait() {
        use std::sync::Arc;
        use std::time::{Duration, Instant};

        let poller = Arc::new(Poller::new(64).unwrap());
        let waker = poller.clone();
        let t = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            waker.wake();
        });

        let start = Instant::now();
        let mut events = [IoEvent::empty(); 8];
        let _ = poller.wait(&mut events, 5_000).unwrap();
        assert!(
            start.elapsed() < Duration::from_secs(4),
            "wake did not interrupt the wait"
        );
        t.join().unwrap();
    }
}
