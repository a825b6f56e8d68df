use std::fmt;
use std::time::Duration;

use pubsock_frame::{ByteOrder, FrameConfig, FrameFormat, DEFAULT_STALL_TIMEOUT, MAX_FRAME_SIZE};
use pubsock_transport::{BindOptions, DEFAULT_BACKLOG, WILDCARD_HOST};

/// Which side of the connection the endpoint's primary socket is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Listen for peers (server).
    Bind,
    /// Connect to a listener (client).
    Connect,
}

/// How an endpoint talks to its peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Round-robin fan-out of length-prefixed frames over a peer pool.
    PointToPoint,
    /// Readiness multiplexing; a handler drives line-delimited control I/O.
    Broker,
}

impl Mode {
    /// Wire format used by peers in this mode.
    pub fn frame_format(self, order: ByteOrder) -> FrameFormat {
        match self {
            Mode::PointToPoint => FrameFormat::LengthPrefixed(order),
            Mode::Broker => FrameFormat::Line,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::PointToPoint => f.write_str("point-to-point"),
            Mode::Broker => f.write_str("broker"),
        }
    }
}

/// Endpoint behaviour settings.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Put accepted peers (and the outbound socket) in non-blocking mode.
    pub non_blocking: bool,
    /// Listen backlog for bind-role endpoints.
    pub backlog: i32,
    /// Host token that binds all interfaces.
    pub wildcard_host: String,
    /// Maximum frame payload in bytes.
    pub max_frame_size: usize,
    /// Byte order of length prefixes.
    pub byte_order: ByteOrder,
    /// Back-off after a full pass over the pool found nothing to do.
    pub poll_interval: Duration,
    /// Read/write timeout for peers in blocking mode.
    pub io_timeout: Option<Duration>,
    /// Longest wait for a peer that stops taking bytes partway through a
    /// frame. The peer is evicted when it runs out.
    pub send_timeout: Duration,
}

impl EndpointConfig {
    pub fn with_non_blocking(mut self, non_blocking: bool) -> Self {
        self.non_blocking = non_blocking;
        self
    }

    pub fn with_backlog(mut self, backlog: i32) -> Self {
        self.backlog = backlog;
        self
    }

    pub fn with_byte_order(mut self, order: ByteOrder) -> Self {
        self.byte_order = order;
        self
    }

    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_io_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.io_timeout = timeout;
        self
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Blocking mode of accepted peers. Broker peers are always
    /// non-blocking, since their handler runs on the loop thread.
    pub(crate) fn peer_non_blocking(&self, mode: Mode) -> bool {
        mode == Mode::Broker || self.non_blocking
    }

    pub(crate) fn bind_options(&self) -> BindOptions {
        BindOptions {
            backlog: self.backlog,
            reuse_address: true,
            wildcard_host: self.wildcard_host.clone(),
        }
    }

    pub(crate) fn frame_config(&self, mode: Mode, non_blocking: bool) -> FrameConfig {
        let timeout = if non_blocking { None } else { self.io_timeout };
        FrameConfig {
            format: mode.frame_format(self.byte_order),
            max_frame_size: self.max_frame_size,
            read_timeout: timeout,
            write_timeout: timeout,
            stall_timeout: self.send_timeout,
        }
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            non_blocking: true,
            backlog: DEFAULT_BACKLOG,
            wildcard_host: WILDCARD_HOST.to_string(),
            max_frame_size: MAX_FRAME_SIZE,
            byte_order: ByteOrder::Network,
            poll_interval: Duration::from_millis(5),
            io_timeout: None,
            send_timeout: DEFAULT_STALL_TIMEOUT,
        }
    }
}
