//! TCP echo server on the strand scheduler
//!
//! One strand accepts connections; every accepted connection gets its own
//! strand that echoes whatever it reads. Exercises the accept/read/write
//! adapters and the I/O suspension path end to end.
//!
//! ```text
//! STRAND_ECHO_PORT=9000 strand-echo
//! printf 'hello\n' | nc 127.0.0.1 9000
//! ```

use strand::{
    env_get, rinfo, rprint, spawn, IoPoll, NetListener, NetStream, Step, StrandResult,
};

/// Per-connection echo strand: read, write back, repeat until EOF.
/// Carries its own copy-out buffer across suspensions so a short write
/// resumes where it left off.
fn echo_conn(stream: NetStream) -> impl FnMut(&mut strand::StrandCx<'_>) -> Step + Send {
    let mut pending: Vec<u8> = Vec::new();
    let mut sent = 0usize;

    move |cx: &mut strand::StrandCx<'_>| loop {
        // Flush anything left from the previous read first.
        while sent < pending.len() {
            match stream.poll_write(cx, &pending[sent..]) {
                IoPoll::Ready(n) => sent += n,
                IoPoll::WouldBlock => return Step::Pending,
                IoPoll::Err(_) => return Step::Done,
            }
        }
        pending.clear();
        sent = 0;

        let mut buf = [0u8; 4096];
        match stream.poll_read(cx, &mut buf) {
            IoPoll::Ready(0) => return Step::Done,
            IoPoll::Ready(n) => pending.extend_from_slice(&buf[..n]),
            IoPoll::WouldBlock => return Step::Pending,
            IoPoll::Err(_) => return Step::Done,
        }
    }
}

fn main() -> StrandResult<()> {
    rprint::init();

    let port: u16 = env_get("STRAND_ECHO_PORT", 9000);
    let workers: usize = env_get("STRAND_ECHO_WORKERS", 0);

    strand::start(workers)?;

    let listener = NetListener::bind(port)?;
    let port = listener.local_port()?;
    rinfo!("echo server listening on 127.0.0.1:{}", port);

    spawn(move |cx| loop {
        match listener.poll_accept(cx) {
            IoPoll::Ready(stream) => {
                cx.spawn(Box::new(strand::FnStrand::new(echo_conn(stream))));
            }
            IoPoll::WouldBlock => return Step::Pending,
            IoPoll::Err(e) => {
                strand::rerror!("accept failed: errno {}", -e);
                return Step::Done;
            }
        }
    })?;

    // Serve until killed.
    loop {
        std::thread::sleep(std::time::Duration::from_secs(60));
    }
}
