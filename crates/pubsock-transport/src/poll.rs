//! Readiness notification over epoll.
//!
//! The interest set is unbounded: registrations live in the kernel and each
//! [`Poller::wait`] drains at most `Events` capacity notifications, so any
//! number of descriptors can be multiplexed. A [`Waker`] registered under its
//! own token interrupts a wait with no timeout.

use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;
use std::time::Duration;

use tracing::trace;

use crate::error::{Result, TransportError};

/// Caller-chosen identifier attached to a registered descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(pub u64);

const DEFAULT_EVENT_CAPACITY: usize = 64;

/// A batch of readiness notifications filled by [`Poller::wait`].
pub struct Events {
    buf: Vec<libc::epoll_event>,
    len: usize,
}

impl Events {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![libc::epoll_event { events: 0, u64: 0 }; capacity.max(1)],
            len: 0,
        }
    }

    /// Tokens that became ready during the last wait.
    pub fn tokens(&self) -> impl Iterator<Item = Token> + '_ {
        self.buf[..self.len].iter().map(|event| {
            let data = event.u64;
            Token(data)
        })
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn len(&self) -> usize {
        self.len
    }
}

impl Default for Events {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }
}

impl std::fmt::Debug for Events {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.tokens()).finish()
    }
}

/// Level-triggered epoll instance watching descriptors for readability.
#[derive(Debug)]
pub struct Poller {
    epoll: OwnedFd,
}

impl Poller {
    pub fn new() -> Result<Self> {
        // SAFETY: epoll_create1 has no pointer arguments; the returned
        // descriptor is checked before ownership is taken.
        let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if fd < 0 {
            return Err(TransportError::Poll(io::Error::last_os_error()));
        }
        // SAFETY: `fd` is a freshly created descriptor owned by nobody else.
        let epoll = unsafe { OwnedFd::from_raw_fd(fd) };
        Ok(Self { epoll })
    }

    /// Start watching `fd` for readability (and hang-up) under `token`.
    pub fn register(&self, fd: RawFd, token: Token) -> Result<()> {
        let mut event = libc::epoll_event {
            events: (libc::EPOLLIN | libc::EPOLLRDHUP) as u32,
            u64: token.0,
        };
        self.ctl(libc::EPOLL_CTL_ADD, fd, &mut event)?;
        trace!(fd, token = token.0, "registered descriptor");
        Ok(())
    }

    /// Stop watching `fd`. Closing a descriptor also removes it implicitly,
    /// but only once every duplicate of it is closed.
    pub fn deregister(&self, fd: RawFd) -> Result<()> {
        let mut event = libc::epoll_event { events: 0, u64: 0 };
        self.ctl(libc::EPOLL_CTL_DEL, fd, &mut event)?;
        trace!(fd, "deregistered descriptor");
        Ok(())
    }

    /// Block until at least one registered descriptor is ready, or until
    /// `timeout` elapses when one is given.
    ///
    /// An interrupted wait returns `Ok(0)` with no events.
    pub fn wait(&self, events: &mut Events, timeout: Option<Duration>) -> Result<usize> {
        let timeout_ms = match timeout {
            Some(duration) => i32::try_from(duration.as_millis()).unwrap_or(i32::MAX),
            None => -1,
        };
        let capacity = i32::try_from(events.buf.len()).unwrap_or(i32::MAX);

        // SAFETY: the buffer holds `capacity` initialised epoll_event values
        // and stays borrowed for the duration of the call.
        let rc = unsafe {
            libc::epoll_wait(
                self.epoll.as_raw_fd(),
                events.buf.as_mut_ptr(),
                capacity,
                timeout_ms,
            )
        };

        if rc < 0 {
            events.len = 0;
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(TransportError::Poll(err));
        }

        events.len = rc as usize;
        Ok(events.len)
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, event: &mut libc::epoll_event) -> Result<()> {
        // SAFETY: `event` is a valid epoll_event for the duration of the call
        // and `fd` is a descriptor supplied by the caller.
        let rc = unsafe { libc::epoll_ctl(self.epoll.as_raw_fd(), op, fd, event) };
        if rc < 0 {
            return Err(TransportError::Poll(io::Error::last_os_error()));
        }
        Ok(())
    }
}

/// Wakes a thread blocked in [`Poller::wait`].
///
/// Backed by a non-blocking socket pair; the read half is registered with the
/// poller and drained by the woken thread.
#[derive(Debug)]
pub struct Waker {
    tx: UnixStream,
    rx: UnixStream,
}

impl Waker {
    pub fn new() -> Result<Self> {
        let (tx, rx) = UnixStream::pair().map_err(TransportError::Poll)?;
        tx.set_nonblocking(true).map_err(TransportError::Poll)?;
        rx.set_nonblocking(true).map_err(TransportError::Poll)?;
        Ok(Self { tx, rx })
    }

    /// Register the wake descriptor with `poller` under `token`.
    pub fn register(&self, poller: &Poller, token: Token) -> Result<()> {
        poller.register(self.rx.as_raw_fd(), token)
    }

    /// Make the next (or current) wait return.
    pub fn wake(&self) -> Result<()> {
        match (&self.tx).write(&[1]) {
            Ok(_) => Ok(()),
            // A full buffer already guarantees a pending wake-up.
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(err) => Err(TransportError::Poll(err)),
        }
    }

    /// Consume pending wake-ups so a level-triggered poller stops reporting
    /// the wake descriptor.
    pub fn drain(&self) {
        let mut buf = [0u8; 64];
        loop {
            match (&self.rx).read(&mut buf) {
                Ok(0) => return,
                Ok(_) => continue,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{TcpListener, TcpStream};
    use std::sync::Arc;
    use std::time::Instant;

    const WAKE: Token = Token(0);

    #[test]
    fn wait_times_out_without_events() {
        let poller = Poller::new().unwrap();
        let mut events = Events::default();
        let n = poller
            .wait(&mut events, Some(Duration::from_millis(10)))
            .unwrap();
        assert_eq!(n, 0);
        assert!(events.is_empty());
    }

    #[test]
    fn reports_readable_socket_token() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let poller = Poller::new().unwrap();
        poller
            .register(listener.as_raw_fd(), Token(7))
            .unwrap();

        let _client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();

        let mut events = Events::default();
        poller
            .wait(&mut events, Some(Duration::from_secs(2)))
            .unwrap();
        let tokens: Vec<Token> = events.tokens().collect();
        assert_eq!(tokens, vec![Token(7)]);
    }

    #[test]
    fn deregistered_descriptor_is_not_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let poller = Poller::new().unwrap();
        poller.register(listener.as_raw_fd(), Token(3)).unwrap();
        poller.deregister(listener.as_raw_fd()).unwrap();

        let _client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();

        let mut events = Events::default();
        let n = poller
            .wait(&mut events, Some(Duration::from_millis(50)))
            .unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn registers_more_descriptors_than_one_batch() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let poller = Poller::new().unwrap();

        let mut pairs = Vec::new();
        for i in 0..(DEFAULT_EVENT_CAPACITY + 16) {
            let client = TcpStream::connect(addr).unwrap();
            let (server, _) = listener.accept().unwrap();
            poller.register(server.as_raw_fd(), Token(i as u64)).unwrap();
            (&client).write_all(b"x").unwrap();
            pairs.push((client, server));
        }

        let mut events = Events::with_capacity(DEFAULT_EVENT_CAPACITY);
        let n = poller
            .wait(&mut events, Some(Duration::from_secs(2)))
            .unwrap();
        assert!(n > 0);
        assert!(n <= DEFAULT_EVENT_CAPACITY);
    }

    #[test]
    fn waker_interrupts_blocking_wait() {
        let poller = Arc::new(Poller::new().unwrap());
        let waker = Arc::new(Waker::new().unwrap());
        waker.register(&poller, WAKE).unwrap();

        let waiter = {
            let poller = Arc::clone(&poller);
            let waker = Arc::clone(&waker);
            std::thread::spawn(move || {
                let mut events = Events::default();
                let start = Instant::now();
                poller.wait(&mut events, None).unwrap();
                let tokens: Vec<Token> = events.tokens().collect();
                waker.drain();
                (tokens, start.elapsed())
            })
        };

        std::thread::sleep(Duration::from_millis(20));
        waker.wake().unwrap();

        let (tokens, _elapsed) = waiter.join().unwrap();
        assert_eq!(tokens, vec![WAKE]);

        let mut events = Events::default();
        let n = poller
            .wait(&mut events, Some(Duration::from_millis(10)))
            .unwrap();
        assert_eq!(n, 0, "drained waker must not stay ready");
    }
}
