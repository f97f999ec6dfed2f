//! Level-triggered epoll fallback backend
//!
//! Registration is kernel-synchronized, so `add`/`modify`/`del` go straight
//! to `epoll_ctl` from any thread while `wait` blocks. A userspace interest
//! map (behind its own mutex, never held across a blocking call) provides
//! mask merging. An eventfd registered at construction unblocks `wait` for
//! shutdown.

use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::sync::Mutex;

use strand_core::{IoEvent, StrandError, StrandResult, READABLE, WRITABLE};

use crate::os::last_errno;

pub struct Poller {
    epfd: RawFd,
    wake_fd: RawFd,
    registered: Mutex<HashMap<RawFd, u32>>,
}

impl Poller {
    /// `_cmd_capacity` sizes the io_uring command queue; unused here
    pub fn new(_cmd_capacity: usize) -> StrandResult<Self> {
        let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epfd < 0 {
            return Err(StrandError::Poller(last_errno()));
        }

        let wake_fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if wake_fd < 0 {
            let err = last_errno();
            unsafe { libc::close(epfd) };
            return Err(StrandError::Poller(err));
        }

        let mut ev = libc::epoll_event {
            events: libc::EPOLLIN as u32,
            u64: wake_fd as u64,
        };
        let ret = unsafe { libc::epoll_ctl(epfd, libc::EPOLL_CTL_ADD, wake_fd, &mut ev) };
        if ret != 0 {
            let err = last_errno();
            unsafe {
                libc::close(wake_fd);
                libc::close(epfd);
            }
            return Err(StrandError::Poller(err));
        }

        Ok(Self {
            epfd,
            wake_fd,
            registered: Mutex::new(HashMap::new()),
        })
    }

    pub fn add(&self, fd: RawFd, mask: u32) -> StrandResult<()> {
        let mut reg = self.registered.lock().unwrap();
        let merged = reg.get(&fd).copied().unwrap_or(0) | mask;
        self.apply(fd, merged, reg.contains_key(&fd))?;
        reg.insert(fd, merged);
        Ok(())
    }

    pub fn modify(&self, fd: RawFd, mask: u32) -> StrandResult<()> {
        let mut reg = self.registered.lock().unwrap();
        self.apply(fd, mask, reg.contains_key(&fd))?;
        reg.insert(fd, mask);
        Ok(())
    }

    pub fn del(&self, fd: RawFd) -> StrandResult<()> {
        let mut reg = self.registered.lock().unwrap();
        if reg.remove(&fd).is_none() {
            return Ok(());
        }
        let ret = unsafe {
            libc::epoll_ctl(self.epfd, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut())
        };
        // The fd may already be closed; both outcomes leave no interest.
        if ret != 0 {
            let err = last_errno();
            if err != libc::ENOENT && err != libc::EBADF {
                return Err(StrandError::Poller(err));
            }
        }
        Ok(())
    }

    fn apply(&self, fd: RawFd, mask: u32, known: bool) -> StrandResult<()> {
        let mut ev = libc::epoll_event {
            events: epoll_bits(mask),
            u64: fd as u64,
        };
        let op = if known {
            libc::EPOLL_CTL_MOD
        } else {
            libc::EPOLL_CTL_ADD
        };
        let mut ret = unsafe { libc::epoll_ctl(self.epfd, op, fd, &mut ev) };
        if ret != 0 {
            let err = last_errno();
            // Heal a map/kernel disagreement (fd closed and reused, etc.).
            let retry = match err {
                libc::EEXIST => Some(libc::EPOLL_CTL_MOD),
                libc::ENOENT => Some(libc::EPOLL_CTL_ADD),
                _ => None,
            };
            match retry {
                Some(op) => {
                    ret = unsafe { libc::epoll_ctl(self.epfd, op, fd, &mut ev) };
                    if ret != 0 {
                        return Err(StrandError::Poller(last_errno()));
                    }
                }
                None => return Err(StrandError::Poller(err)),
            }
        }
        Ok(())
    }

    pub fn wait(&self, out: &mut [IoEvent], timeout_ms: i32) -> StrandResult<usize> {
        let mut buf = vec![libc::epoll_event { events: 0, u64: 0 }; out.len().max(1)];
        let ret = unsafe {
            libc::epoll_wait(self.epfd, buf.as_mut_ptr(), buf.len() as i32, timeout_ms)
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
            let fd = ev.u64 as RawFd;
            if fd == self.wake_fd {
                let mut v = 0u64;
                unsafe {
                    libc::read(
                        self.wake_fd,
                        &mut v as *mut u64 as *mut libc::c_void,
                        std::mem::size_of::<u64>(),
                    );
                }
                continue;
            }
            let mut mask = 0u32;
            if ev.events & libc::EPOLLIN as u32 != 0 {
                mask |= READABLE;
            }
            if ev.events & libc::EPOLLOUT as u32 != 0 {
                mask |= WRITABLE;
            }
            // Errors and hangups wake the waiter; the retried syscall
            // reports the actual condition.
            if ev.events & (libc::EPOLLERR as u32 | libc::EPOLLHUP as u32) != 0 {
                mask |= READABLE | WRITABLE;
            }
            out[n] = IoEvent { fd, mask, res: 0 };
            n += 1;
        }
        Ok(n)
    }

    pub fn wake(&self) {
        let val: u64 = 1;
        unsafe {
            libc::write(
                self.wake_fd,
                &val as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            );
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.wake_fd);
            libc::close(self.epfd);
        }
    }
}

fn epoll_bits(mask: u32) -> u32 {
    let mut bits = 0u32;
    if mask & READABLE != 0 {
        bits |= libc::EPOLLIN as u32;
    }
    if mask & WRITABLE != 0 {
        bits |= libc::EPOLLOUT as u32;
    }
    bits
}
