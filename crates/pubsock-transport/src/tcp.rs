//! TCP socket lifecycle: bind + listen for the server side, blocking connect
//! for the client side.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::os::fd::AsRawFd;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};
use crate::resolve::WILDCARD_HOST;

/// Listen backlog used unless overridden.
pub const DEFAULT_BACKLOG: i32 = 10;

/// Options applied when creating a listening socket.
#[derive(Debug, Clone)]
pub struct BindOptions {
    /// Pending-connection queue length passed to `listen(2)`.
    pub backlog: i32,
    /// Set `SO_REUSEADDR` before binding.
    pub reuse_address: bool,
    /// Host token that maps to all interfaces.
    pub wildcard_host: String,
}

impl Default for BindOptions {
    fn default() -> Self {
        Self {
            backlog: DEFAULT_BACKLOG,
            reuse_address: true,
            wildcard_host: WILDCARD_HOST.to_string(),
        }
    }
}

/// Turn a resolved host/port into a socket address.
///
/// The wildcard token becomes `0.0.0.0`; IP literals are used as-is and
/// anything else goes through the system resolver.
pub fn socket_addr(host: &str, port: u16, wildcard_host: &str) -> Result<SocketAddr> {
    if host == wildcard_host {
        return Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port));
    }
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }

    let fail = |reason: String| TransportError::Resolution {
        uri: format!("{host}:{port}"),
        reason,
    };
    (host, port)
        .to_socket_addrs()
        .map_err(|err| fail(err.to_string()))?
        .next()
        .ok_or_else(|| fail("host resolved to no addresses".to_string()))
}

/// Create, bind and listen on a TCP socket.
///
/// Every step is checked: a failed `setsockopt`, `bind` or `listen` is
/// reported instead of leaving a half-initialised listener behind.
pub fn bind(host: &str, port: u16, options: &BindOptions) -> Result<TcpListener> {
    let addr = socket_addr(host, port, &options.wildcard_host)?;

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(TransportError::SocketCreate)?;
    if options.reuse_address {
        socket
            .set_reuse_address(true)
            .map_err(TransportError::SocketCreate)?;
    }

    debug!(%addr, "binding");
    socket
        .bind(&addr.into())
        .map_err(|source| TransportError::Bind { addr, source })?;
    socket
        .listen(options.backlog)
        .map_err(|source| TransportError::Listen { addr, source })?;

    let listener = TcpListener::from(socket);
    let local = listener.local_addr().unwrap_or(addr);
    info!(addr = %local, backlog = options.backlog, "listening on tcp socket");
    Ok(listener)
}

/// Connect to a remote listener (blocking), then apply the requested
/// blocking mode.
pub fn connect(host: &str, port: u16, non_blocking: bool) -> Result<TcpStream> {
    let target = format!("{host}:{port}");
    let addr = socket_addr(host, port, WILDCARD_HOST).map_err(|err| match err {
        TransportError::Resolution { reason, .. } => TransportError::Connect {
            addr: target.clone(),
            source: io::Error::new(io::ErrorKind::NotFound, reason),
        },
        other => other,
    })?;

    let stream = TcpStream::connect(addr).map_err(|source| TransportError::Connect {
        addr: target.clone(),
        source,
    })?;

    if non_blocking {
        if let Err(err) = stream.set_nonblocking(true) {
            warn!(addr = %target, error = %err, "failed to switch socket to non-blocking");
        }
    }

    match remote_address(&stream) {
        Some(remote) => info!(fd = stream.as_raw_fd(), %remote, "connected"),
        None => info!(fd = stream.as_raw_fd(), addr = %target, "connected"),
    }
    Ok(stream)
}

/// Address of the remote end, logged at debug level when unavailable.
pub fn remote_address(stream: &TcpStream) -> Option<SocketAddr> {
    match stream.peer_addr() {
        Ok(addr) => Some(addr),
        Err(err) => {
            debug!(fd = stream.as_raw_fd(), error = %err, "failed to get remote address");
            None
        }
    }
}

/// Check, without blocking or consuming data, whether the remote end has
/// closed the connection.
///
/// The check looks at the connection state, not at the receive queue, so a
/// peer that sent bytes nobody read and then hung up is still reported as
/// closed. Returns the pending socket error when the connection was reset.
pub fn peer_closed(stream: &TcpStream) -> io::Result<bool> {
    let revents = poll_once(stream, libc::POLLRDHUP, 0)?;
    if revents & libc::POLLERR != 0 {
        return match stream.take_error()? {
            Some(err) => Err(err),
            None => Ok(true),
        };
    }
    Ok(revents & (libc::POLLRDHUP | libc::POLLHUP) != 0)
}

/// Wait up to `timeout` for `stream` to accept more bytes.
///
/// Returns `Ok(false)` when the timeout elapsed first. Hang-ups and errors
/// count as ready so the following write reports them.
pub fn wait_writable(stream: &TcpStream, timeout: Duration) -> io::Result<bool> {
    let millis = timeout.as_millis().clamp(1, libc::c_int::MAX as u128) as libc::c_int;
    let revents = poll_once(stream, libc::POLLOUT, millis)?;
    Ok(revents & (libc::POLLOUT | libc::POLLERR | libc::POLLHUP) != 0)
}

/// `poll(2)` a single socket. Interrupted waits report no events.
fn poll_once(
    stream: &TcpStream,
    events: libc::c_short,
    timeout_ms: libc::c_int,
) -> io::Result<libc::c_short> {
    let mut fd = libc::pollfd {
        fd: stream.as_raw_fd(),
        events,
        revents: 0,
    };

    // SAFETY: `fd` is one valid pollfd that outlives the call, and the
    // descriptor is an open socket borrowed from `stream`.
    let rc = unsafe { libc::poll(&mut fd, 1, timeout_ms) };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(0);
        }
        return Err(err);
    }
    Ok(fd.revents)
}
