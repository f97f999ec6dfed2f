//! kqueue backend for macOS and the BSDs
//!
//! Readability and writability are separate kevent filters; the observed
//! mask is derived from which filter fired. Registration is
//! kernel-synchronized, so calls go straight to `kevent` from any thread.
//! A userspace interest map provides mask merging, and an `EVFILT_USER`
//! event unblocks `wait` for shutdown.

use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::ptr;
use std::sync::Mutex;

use strand_core::{IoEvent, StrandError, StrandResult, READABLE, WRITABLE};

use crate::os::last_errno;

const WAKE_IDENT: usize = 0;

pub struct Poller {
    kq: RawFd,
    registered: Mutex<HashMap<RawFd, u32>>,
}

impl Poller {
    /// `_cmd_capacity` sizes the io_uring command queue; unused here
    pub fn new(_cmd_capacity: usize) -> StrandResult<Self> {
        let kq = unsafe { libc::kqueue() };
        if kq < 0 {
            return Err(StrandError::Poller(last_errno()));
        }

        let wake = libc::kevent {
            ident: WAKE_IDENT,
            filter: libc::EVFILT_USER,
            flags: libc::EV_ADD | libc::EV_CLEAR,
            fflags: 0,
            data: 0,
            udata: ptr::null_mut(),
        };
        let ret = unsafe { libc::kevent(kq, &wake, 1, ptr::null_mut(), 0, ptr::null()) };
        if ret < 0 {
            let err = last_errno();
            unsafe { libc::close(kq) };
            return Err(StrandError::Poller(err));
        }

        Ok(Self {
            kq,
            registered: Mutex::new(HashMap::new()),
        })
    }

    pub fn add(&self, fd: RawFd, mask: u32) -> StrandResult<()> {
        let mut reg = self.registered.lock().unwrap();
        let old = reg.get(&fd).copied().unwrap_or(0);
        self.apply(fd, old, old | mask)?;
        reg.insert(fd, old | mask);
        Ok(())
    }

    pub fn modify(&self, fd: RawFd, mask: u32) -> StrandResult<()> {
        let mut reg = self.registered.lock().unwrap();
        let old = reg.get(&fd).copied().unwrap_or(0);
        self.apply(fd, old, mask)?;
        reg.insert(fd, mask);
        Ok(())
    }

    pub fn del(&self, fd: RawFd) -> StrandResult<()> {
        let mut reg = self.registered.lock().unwrap();
        if reg.remove(&fd).is_none() {
            return Ok(());
        }
        // Drop both filters; ENOENT for the one that was never armed.
        let changes = [
            filter_event(fd, libc::EVFILT_READ, libc::EV_DELETE),
            filter_event(fd, libc::EVFILT_WRITE, libc::EV_DELETE),
        ];
        unsafe {
            libc::kevent(self.kq, changes.as_ptr(), 2, ptr::null_mut(), 0, ptr::null());
        }
        Ok(())
    }

    /// Arm the filters `new` asks for and drop the ones only `old` had
    fn apply(&self, fd: RawFd, old: u32, new: u32) -> StrandResult<()> {
        let mut changes: Vec<libc::kevent> = Vec::with_capacity(2);
        for (bit, filter) in [(READABLE, libc::EVFILT_READ), (WRITABLE, libc::EVFILT_WRITE)] {
            if new & bit != 0 {
                changes.push(filter_event(fd, filter, libc::EV_ADD));
            } else if old & bit != 0 {
                changes.push(filter_event(fd, filter, libc::EV_DELETE));
            }
        }
        if changes.is_empty() {
            return Ok(());
        }

        let ret = unsafe {
            libc::kevent(
                self.kq,
                changes.as_ptr(),
                changes.len() as i32,
                ptr::null_mut(),
                0,
                ptr::null(),
            )
        };
        if ret < 0 {
            return Err(StrandError::Poller(last_errno()));
        }
        Ok(())
    }

    pub fn wait(&self, out: &mut [IoEvent], timeout_ms: i32) -> StrandResult<usize> {
        let ts = libc::timespec {
            tv_sec: (timeout_ms / 1000) as libc::time_t,
            tv_nsec: ((timeout_ms % 1000) * 1_000_000) as libc::c_long,
        };
        let mut buf = vec![empty_event(); out.len().max(1)];
        let ret = unsafe {
            libc::kevent(
                self.kq,
                ptr::null(),
                0,
                buf.as_mut_ptr(),
                buf.len() as i32,
                &ts,
            )
        };
        if ret < 0 {
            let err = last_errno();
            if err == libc::EINTR {
                return Ok(0);
            }
            return Err(StrandError::Poller(err));
        }

        let mut n = 0;
        for ev in &buf[..ret as usize] {
            if ev.filter == libc::EVFILT_USER {
                continue;
            }
            let fd = ev.ident as RawFd;
            let mask = match ev.filter {
                libc::EVFILT_READ => READABLE,
                libc::EVFILT_WRITE => WRITABLE,
                _ => 0,
            };
            out[n] = IoEvent {
                fd,
                mask,
                res: ev.data as i32,
            };
            n += 1;
        }
        Ok(n)
    }

    pub fn wake(&self) {
        let trigger = libc::kevent {
            ident: WAKE_IDENT,
            filter: libc::EVFILT_USER,
            flags: 0,
            fflags: libc::NOTE_TRIGGER,
            data: 0,
            udata: ptr::null_mut(),
        };
        unsafe {
            libc::kevent(self.kq, &trigger, 1, ptr::null_mut(), 0, ptr::null());
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.kq);
        }
    }
}

fn filter_event(fd: RawFd, filter: i16, flags: u16) -> libc::kevent {
    libc::kevent {
        ident: fd as usize,
        filter,
        flags,
        fflags: 0,
        data: 0,
        udata: ptr::null_mut(),
    }
}

fn empty_event() -> libc::kevent {
    libc::kevent {
        ident: 0,
        filter: 0,
        flags: 0,
        fflags: 0,
        data: 0,
        udata: ptr::null_mut(),
    }
}
