//! io_uring poll-mode backend
//!
//! Poll-add submissions carry the fd as user-data; the completion mask is
//! decoded from the result bitfield. The ring is owned by whichever thread
//! is inside `wait` (in practice the I/O driver): `add`/`modify`/`del` from
//! other threads enqueue commands on a lock-free queue and signal an
//! eventfd that is kept poll-armed on the ring, so a blocked `wait` applies
//! them promptly. Poll registrations are oneshot; a fired fd drops out of
//! the registration map and a later `add` re-arms it.

use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::sync::Mutex;

use crossbeam_queue::ArrayQueue;
use io_uring::{opcode, squeue, types, IoUring};

use strand_core::{IoEvent, StrandError, StrandResult, READABLE, WRITABLE};

use crate::os::last_errno;

/// Completion carrying the wake eventfd
const WAKE_TOKEN: u64 = u64::MAX;
/// Completion of a poll-remove; carries nothing
const REMOVE_TOKEN: u64 = u64::MAX - 1;
/// Completion of the wait-bounding timeout
const TIMEOUT_TOKEN: u64 = u64::MAX - 2;

const SQ_ENTRIES: u32 = 256;

enum Cmd {
    Add { fd: RawFd, mask: u32 },
    Replace { fd: RawFd, mask: u32 },
    Del { fd: RawFd },
}

struct RingState {
    ring: IoUring,
    /// Userspace interest map; entries drop out when their oneshot fires
    registered: HashMap<RawFd, u32>,
    wake_armed: bool,
    timeout_armed: bool,
    /// Stable storage for the timeout SQE's timespec
    timeout_ts: types::Timespec,
}

pub struct Poller {
    cmds: ArrayQueue<Cmd>,
    wake_fd: RawFd,
    /// Locked only by `wait`; registration paths never touch it
    state: Mutex<RingState>,
}

impl Poller {
    pub fn new(cmd_capacity: usize) -> StrandResult<Self> {
        let ring = IoUring::builder()
            .build(SQ_ENTRIES)
            .map_err(|e| StrandError::Poller(e.raw_os_error().unwrap_or(-1)))?;

        let wake_fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if wake_fd < 0 {
            return Err(StrandError::Poller(last_errno()));
        }

        Ok(Self {
            cmds: ArrayQueue::new(cmd_capacity),
            wake_fd,
            state: Mutex::new(RingState {
                ring,
                registered: HashMap::new(),
                wake_armed: false,
                timeout_armed: false,
                timeout_ts: types::Timespec::new(),
            }),
        })
    }

    pub fn add(&self, fd: RawFd, mask: u32) -> StrandResult<()> {
        self.enqueue(Cmd::Add { fd, mask })
    }

    pub fn modify(&self, fd: RawFd, mask: u32) -> StrandResult<()> {
        self.enqueue(Cmd::Replace { fd, mask })
    }

    pub fn del(&self, fd: RawFd) -> StrandResult<()> {
        self.enqueue(Cmd::Del { fd })
    }

    fn enqueue(&self, cmd: Cmd) -> StrandResult<()> {
        if self.cmds.push(cmd).is_err() {
            return Err(StrandError::Poller(libc::EAGAIN));
        }
        self.wake();
        Ok(())
    }

    /// Wake a blocked `wait`. Coalesces via eventfd counter semantics;
    /// EAGAIN means a signal is already pending, which is fine.
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

    /// Apply pending commands, then block up to `timeout_ms` for readiness.
    pub fn wait(&self, out: &mut [IoEvent], timeout_ms: i32) -> StrandResult<usize> {
        let mut guard = self.state.lock().unwrap();
        let st = &mut *guard;

        if !st.wake_armed {
            let sqe = opcode::PollAdd::new(types::Fd(self.wake_fd), libc::POLLIN as u32)
                .build()
                .user_data(WAKE_TOKEN);
            push_sqe(&mut st.ring, &sqe)?;
            st.wake_armed = true;
        }

        while let Some(cmd) = self.cmds.pop() {
            apply_cmd(st, cmd)?;
        }

        if timeout_ms > 0 {
            if !st.timeout_armed {
                st.timeout_ts = types::Timespec::new()
                    .sec((timeout_ms / 1000) as u64)
                    .nsec(((timeout_ms % 1000) * 1_000_000) as u32);
                let sqe = opcode::Timeout::new(&st.timeout_ts as *const types::Timespec)
                    .build()
                    .user_data(TIMEOUT_TOKEN);
                push_sqe(&mut st.ring, &sqe)?;
                st.timeout_armed = true;
            }
            match st.ring.submit_and_wait(1) {
                Ok(_) => {}
                Err(e) => match e.raw_os_error() {
                    Some(libc::EINTR) | Some(libc::EBUSY) | Some(libc::ETIME) => {}
                    other => return Err(StrandError::Poller(other.unwrap_or(-1))),
                },
            }
        } else {
            // Non-blocking pass: flush submissions, take whatever is there.
            match st.ring.submit() {
                Ok(_) => {}
                Err(e) => match e.raw_os_error() {
                    Some(libc::EINTR) | Some(libc::EBUSY) => {}
                    other => return Err(StrandError::Poller(other.unwrap_or(-1))),
                },
            }
        }

        let mut n = 0;
        let mut clear_wake = false;
        let mut clear_timeout = false;
        {
            let mut cq = st.ring.completion();
            while n < out.len() {
                let Some(cqe) = cq.next() else { break };
                match cqe.user_data() {
                    WAKE_TOKEN => clear_wake = true,
                    REMOVE_TOKEN => {}
                    TIMEOUT_TOKEN => clear_timeout = true,
                    ud => {
                        let res = cqe.result();
                        if res == -libc::ECANCELED {
                            // A del() cancelled this poll; not readiness.
                            continue;
                        }
                        let fd = ud as RawFd;
                        // Oneshot consumed: forget the interest so a later
                        // add re-arms from scratch. A miss means the
                        // interest was deleted before this fire was
                        // consumed; readiness racing a del is discarded.
                        if st.registered.remove(&fd).is_none() {
                            continue;
                        }
                        out[n] = decode(fd, res);
                        n += 1;
                    }
                }
            }
        }

        if clear_wake {
            let mut buf = 0u64;
            unsafe {
                libc::read(
                    self.wake_fd,
                    &mut buf as *mut u64 as *mut libc::c_void,
                    std::mem::size_of::<u64>(),
                );
            }
            st.wake_armed = false;
        }
        if clear_timeout {
            st.timeout_armed = false;
        }

        Ok(n)
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.wake_fd);
        }
        // The IoUring drop closes the ring fd and unmaps the queues.
    }
}

fn apply_cmd(st: &mut RingState, cmd: Cmd) -> StrandResult<()> {
    match cmd {
        Cmd::Add { fd, mask } => {
            let merged = st.registered.get(&fd).copied().unwrap_or(0) | mask;
            rearm(st, fd, merged)
        }
        Cmd::Replace { fd, mask } => rearm(st, fd, mask),
        Cmd::Del { fd } => {
            if st.registered.remove(&fd).is_some() {
                let sqe = opcode::PollRemove::new(fd as u64)
                    .build()
                    .user_data(REMOVE_TOKEN);
                push_sqe(&mut st.ring, &sqe)?;
            }
            Ok(())
        }
    }
}

fn rearm(st: &mut RingState, fd: RawFd, mask: u32) -> StrandResult<()> {
    if st.registered.insert(fd, mask).is_some() {
        let sqe = opcode::PollRemove::new(fd as u64)
            .build()
            .user_data(REMOVE_TOKEN);
        push_sqe(&mut st.ring, &sqe)?;
    }
    let sqe = opcode::PollAdd::new(types::Fd(fd), poll_bits(mask))
        .build()
        .user_data(fd as u64);
    push_sqe(&mut st.ring, &sqe)
}

fn push_sqe(ring: &mut IoUring, sqe: &squeue::Entry) -> StrandResult<()> {
    if unsafe { ring.submission().push(sqe) }.is_ok() {
        return Ok(());
    }
    // SQ full: flush and retry once.
    ring.submit()
        .map_err(|e| StrandError::Poller(e.raw_os_error().unwrap_or(-1)))?;
    unsafe { ring.submission().push(sqe) }.map_err(|_| StrandError::Poller(libc::EBUSY))
}

fn poll_bits(mask: u32) -> u32 {
    let mut bits = 0u32;
    if mask & READABLE != 0 {
        bits |= libc::POLLIN as u32;
    }
    if mask & WRITABLE != 0 {
        bits |= libc::POLLOUT as u32;
    }
    bits
}

fn decode(fd: RawFd, res: i32) -> IoEvent {
    if res < 0 {
        return IoEvent { fd, mask: 0, res };
    }
    let mut mask = 0u32;
    if res & libc::POLLIN as i32 != 0 {
        mask |= READABLE;
    }
    if res & libc::POLLOUT as i32 != 0 {
        mask |= WRITABLE;
    }
    IoEvent { fd, mask, res }
}
