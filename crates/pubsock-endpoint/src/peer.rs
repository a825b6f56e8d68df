use std::fmt;
use std::io;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::os::fd::{AsRawFd, RawFd};

use bytes::Bytes;
use pubsock_frame::{FrameConfig, FrameError, FrameFormat, FrameReader, FrameWriter, SendStatus};
use pubsock_transport::tcp;
use tracing::debug;

/// Opaque identity of an accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(u64);

impl PeerId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

/// A connected remote socket, split into a frame reader and a frame writer.
///
/// Owned by exactly one peer pool or broker readiness set; dropping it closes
/// the connection.
pub struct Peer {
    id: PeerId,
    addr: Option<SocketAddr>,
    reader: FrameReader<TcpStream>,
    writer: FrameWriter<TcpStream>,
}

impl Peer {
    /// Wrap an accepted stream.
    pub fn from_stream(
        id: PeerId,
        stream: TcpStream,
        config: FrameConfig,
    ) -> Result<Self, FrameError> {
        let addr = tcp::remote_address(&stream);
        let reader_stream = stream.try_clone()?;
        let reader = FrameReader::with_config_tcp(reader_stream, config.clone())?;
        let writer = FrameWriter::with_config_tcp(stream, config)?;
        Ok(Self {
            id,
            addr,
            reader,
            writer,
        })
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Remote address, when the OS could report one.
    pub fn addr(&self) -> Option<SocketAddr> {
        self.addr
    }

    /// Descriptor used for readiness registration.
    pub fn raw_fd(&self) -> RawFd {
        self.reader.get_ref().as_raw_fd()
    }

    /// Send one frame unless the socket cannot take any bytes right now.
    ///
    /// A peer that already closed its end is reported as
    /// [`FrameError::ConnectionClosed`] before anything is written. If the
    /// socket fills up mid-frame, `on_stall` decides how long to wait.
    pub fn try_send<F>(&mut self, payload: &[u8], on_stall: F) -> Result<SendStatus, FrameError>
    where
        F: FnMut(&TcpStream) -> io::Result<bool>,
    {
        if tcp::peer_closed(self.writer.get_ref())? {
            return Err(FrameError::ConnectionClosed);
        }
        self.writer.try_send_with(payload, on_stall)
    }

    /// Send one frame, waiting for socket space up to the stall timeout.
    pub fn send(&mut self, payload: &[u8]) -> Result<usize, FrameError> {
        let limit = self.writer.config().stall_timeout;
        let started = std::time::Instant::now();
        self.writer.send_with(payload, |stream| {
            let left = limit.saturating_sub(started.elapsed());
            if left.is_zero() {
                return Ok(false);
            }
            tcp::wait_writable(stream, left)?;
            Ok(true)
        })
    }

    /// Next complete frame, or `None` when no full frame is available yet.
    pub fn poll_frame(&mut self) -> Result<Option<Bytes>, FrameError> {
        self.reader.poll_frame()
    }

    /// Bytes received from this peer but not yet returned as a frame.
    pub fn buffered(&self) -> usize {
        self.reader.buffered()
    }

    /// Frame format used for reads and writes.
    pub fn format(&self) -> FrameFormat {
        self.reader.config().format
    }

    pub(crate) fn set_read_format(&mut self, format: FrameFormat) {
        self.reader.set_format(format);
    }

    /// Shut the connection down in both directions and release it.
    pub fn close(self) {
        if let Err(err) = self.writer.get_ref().shutdown(Shutdown::Both) {
            debug!(peer = %self.id, error = %err, "shutdown on close failed");
        }
        debug!(peer = %self.id, addr = ?self.addr, "closed peer");
    }
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("fd", &self.raw_fd())
            .finish()
    }
}
