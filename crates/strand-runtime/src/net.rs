//! Non-blocking socket adapters
//!
//! Thin consumers of the suspension primitive: each operation attempts the
//! syscall once; on `EAGAIN`/`EWOULDBLOCK` it registers an I/O wait for
//! the calling strand and reports [`IoPoll::WouldBlock`], after which the
//! strand must return `Step::Pending` and retry when remounted. Real
//! errors surface as negative errno values. The scheduler makes no other
//! demand on socket code.

use std::os::unix::io::RawFd;

use strand_core::{StrandError, StrandResult, READABLE, WRITABLE};

use crate::os::{is_would_block, last_errno};
use crate::task::StrandCx;

/// Outcome of one non-blocking socket attempt
#[derive(Debug)]
pub enum IoPoll<T> {
    /// The operation completed
    Ready(T),
    /// The descriptor was not ready; an I/O wait is registered and the
    /// strand should suspend
    WouldBlock,
    /// The operation failed (negative errno)
    Err(i32),
}

/// A listening TCP socket
pub struct NetListener {
    fd: RawFd,
}

impl NetListener {
    /// Bind and listen on `port` (0 lets the kernel pick); the socket is
    /// non-blocking with `SO_REUSEADDR`/`SO_REUSEPORT` set
    pub fn bind(port: u16) -> StrandResult<Self> {
        let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0) };
        if fd < 0 {
            return Err(StrandError::Platform(last_errno()));
        }
        set_nonblock_cloexec(fd);

        unsafe {
            let opt: i32 = 1;
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_REUSEADDR,
                &opt as *const _ as *const libc::c_void,
                4,
            );
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_REUSEPORT,
                &opt as *const _ as *const libc::c_void,
                4,
            );
        }

        let mut addr: libc::sockaddr_in = unsafe { std::mem::zeroed() };
        addr.sin_family = libc::AF_INET as libc::sa_family_t;
        addr.sin_addr.s_addr = libc::INADDR_ANY.to_be();
        addr.sin_port = port.to_be();

        let ret = unsafe {
            libc::bind(
                fd,
                &addr as *const _ as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            )
        };
        if ret != 0 {
            let err = last_errno();
            unsafe { libc::close(fd) };
            return Err(StrandError::Platform(err));
        }

        if unsafe { libc::listen(fd, 1024) } != 0 {
            let err = last_errno();
            unsafe { libc::close(fd) };
            return Err(StrandError::Platform(err));
        }

        Ok(Self { fd })
    }

    /// Port the listener is bound to (useful after binding port 0)
    pub fn local_port(&self) -> StrandResult<u16> {
        let mut addr: libc::sockaddr_in = unsafe { std::mem::zeroed() };
        let mut len = std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
        let ret = unsafe {
            libc::getsockname(
                self.fd,
                &mut addr as *mut _ as *mut libc::sockaddr,
                &mut len,
            )
        };
        if ret != 0 {
            return Err(StrandError::Platform(last_errno()));
        }
        Ok(u16::from_be(addr.sin_port))
    }

    /// Attempt one accept. Not ready registers a READABLE wait for the
    /// calling strand.
    pub fn poll_accept(&self, cx: &StrandCx<'_>) -> IoPoll<NetStream> {
        loop {
            let client = accept_nonblock(self.fd);
            if client >= 0 {
                set_nodelay(client);
                return IoPoll::Ready(NetStream { fd: client });
            }
            let err = last_errno();
            if err == libc::EINTR {
                continue;
            }
            if is_would_block(err) {
                return match cx.suspend_io(self.fd, READABLE) {
                    Ok(()) => IoPoll::WouldBlock,
                    Err(StrandError::Poller(e)) => IoPoll::Err(-e),
                    Err(_) => IoPoll::Err(-libc::EINVAL),
                };
            }
            return IoPoll::Err(-err);
        }
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for NetListener {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
    }
}

/// A connected TCP stream
pub struct NetStream {
    fd: RawFd,
}

impl NetStream {
    /// Adopt an already-connected non-blocking descriptor
    pub fn from_raw(fd: RawFd) -> Self {
        Self { fd }
    }

    /// Connect to 127.0.0.1:`port` (blocking connect, then non-blocking
    /// I/O). Mostly useful for tests and demos.
    pub fn connect_local(port: u16) -> StrandResult<Self> {
        let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0) };
        if fd < 0 {
            return Err(StrandError::Platform(last_errno()));
        }

        let mut addr: libc::sockaddr_in = unsafe { std::mem::zeroed() };
        addr.sin_family = libc::AF_INET as libc::sa_family_t;
        addr.sin_addr.s_addr = u32::from(std::net::Ipv4Addr::LOCALHOST).to_be();
        addr.sin_port = port.to_be();

        let ret = unsafe {
            libc::connect(
                fd,
                &addr as *const _ as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            )
        };
        if ret != 0 {
            let err = last_errno();
            unsafe { libc::close(fd) };
            return Err(StrandError::Platform(err));
        }

        set_nonblock_cloexec(fd);
        set_nodelay(fd);
        Ok(Self { fd })
    }

    /// Attempt one read. `Ready(0)` is end of stream; not ready registers
    /// a READABLE wait.
    pub fn poll_read(&self, cx: &StrandCx<'_>, buf: &mut [u8]) -> IoPoll<usize> {
        loop {
            let n = unsafe { libc::read(self.fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
            if n >= 0 {
                return IoPoll::Ready(n as usize);
            }
            let err = last_errno();
            if err == libc::EINTR {
                continue;
            }
            if is_would_block(err) {
                return match cx.suspend_io(self.fd, READABLE) {
                    Ok(()) => IoPoll::WouldBlock,
                    Err(StrandError::Poller(e)) => IoPoll::Err(-e),
                    Err(_) => IoPoll::Err(-libc::EINVAL),
                };
            }
            return IoPoll::Err(-err);
        }
    }

    /// Attempt one write; may be short. Not ready registers a WRITABLE
    /// wait.
    pub fn poll_write(&self, cx: &StrandCx<'_>, buf: &[u8]) -> IoPoll<usize> {
        loop {
            let n = unsafe { libc::write(self.fd, buf.as_ptr() as *const libc::c_void, buf.len()) };
            if n >= 0 {
                return IoPoll::Ready(n as usize);
            }
            let err = last_errno();
            if err == libc::EINTR {
                continue;
            }
            if is_would_block(err) {
                return match cx.suspend_io(self.fd, WRITABLE) {
                    Ok(()) => IoPoll::WouldBlock,
                    Err(StrandError::Poller(e)) => IoPoll::Err(-e),
                    Err(_) => IoPoll::Err(-libc::EINVAL),
                };
            }
            return IoPoll::Err(-err);
        }
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for NetStream {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
    }
}

fn set_nodelay(fd: RawFd) {
    unsafe {
        let opt: i32 = 1;
        libc::setsockopt(
            fd,
            libc::IPPROTO_TCP,
            libc::TCP_NODELAY,
            &opt as *const _ as *const libc::c_void,
            4,
        );
    }
}

fn set_nonblock_cloexec(fd: RawFd) {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
        libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC);
    }
}

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "freebsd"))] {
        fn accept_nonblock(fd: RawFd) -> RawFd {
            unsafe {
                libc::accept4(
                    fd,
                    std::ptr::null_mut(),
                    std::ptr::null_mut(),
                    libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
                )
            }
        }
    } else {
        fn accept_nonblock(fd: RawFd) -> RawFd {
            let client = unsafe {
                libc::accept(fd, std::ptr::null_mut(), std::ptr::null_mut())
            };
            if client >= 0 {
                set_nonblock_cloexec(client);
            }
            client
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::scheduler::Scheduler;
    use crate::task::{from_fn, Step};
    use std::io::{Read, Write};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_bind_reports_port() {
        let listener = NetListener::bind(0).unwrap();
        assert!(listener.local_port().unwrap() != 0);
    }

    #[test]
    fn test_accept_read_write_roundtrip() {
        let sched = Scheduler::new(
            RuntimeConfig::from_env()
                .num_workers(2)
                .park_timeout(Duration::from_millis(1))
                .poll_timeout(Duration::from_millis(20)),
        )
        .unwrap();
        sched.start().unwrap();

        let listener = NetListener::bind(0).unwrap();
        let port = listener.local_port().unwrap();
        let served = Arc::new(AtomicBool::new(false));
        let served_flag = served.clone();

        // One strand: accept a client, read a message, echo it, finish.
        let mut conn: Option<NetStream> = None;
        sched.schedule(Box::new(from_fn(move |cx| loop {
            if conn.is_none() {
                match listener.poll_accept(cx) {
                    IoPoll::Ready(stream) => conn = Some(stream),
                    IoPoll::WouldBlock => return Step::Pending,
                    IoPoll::Err(_) => return Step::Done,
                }
                continue;
            }
            let stream = conn.as_ref().unwrap();
            let mut buf = [0u8; 16];
            match stream.poll_read(cx, &mut buf) {
                IoPoll::Ready(0) => return Step::Done,
                IoPoll::Ready(n) => {
                    // Short writes are not a concern for 4 bytes on a
                    // fresh socket.
                    if let IoPoll::Ready(_) = stream.poll_write(cx, &buf[..n]) {
                        served_flag.store(true, Ordering::SeqCst);
                    }
                    return Step::Done;
                }
                IoPoll::WouldBlock => return Step::Pending,
                IoPoll::Err(_) => return Step::Done,
            }
        })));

        // Let the acceptor reach its first would-block suspension before
        // connecting, so the wakeup path is what serves the client.
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while sched.stats().total_io_suspended == 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }

        let mut client = std::net::TcpStream::connect(("127.0.0.1", port)).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        client.write_all(b"ping").unwrap();

        let mut reply = [0u8; 4];
        client.read_exact(&mut reply).unwrap();
        assert_eq!(&reply, b"ping");
        assert!(served.load(Ordering::SeqCst));

        let snap = sched.stats();
        assert!(snap.total_io_suspended >= 1, "accept never suspended");
        assert!(snap.total_resumed <= snap.total_io_suspended);

        sched.stop();
    }
}
