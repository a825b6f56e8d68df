use std::io::{self, ErrorKind, Write};
use std::net::TcpStream;
use std::thread;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use tracing::{debug, trace};

use crate::codec::{FrameConfig, FrameFormat};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const STALL_PAUSE: Duration = Duration::from_millis(1);

/// Outcome of a non-blocking send attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// The stream accepted nothing; the frame was not started.
    NotReady,
    /// The whole frame was written; carries the payload length.
    Sent(usize),
}

/// Writes complete frames to any `Write` stream.
///
/// When the stream would block partway through a frame, the writer asks a
/// stall callback whether to keep waiting. The callback gets the stream so it
/// can wait for writability; returning `Ok(false)` abandons the frame with
/// [`FrameError::Stalled`]. The plain methods use a paced wait bounded by
/// [`FrameConfig::stall_timeout`].
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Write> FrameWriter<T> {
    /// Create a new frame writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Encode and send a payload, waiting out would-block.
    ///
    /// Returns the payload length.
    pub fn send(&mut self, payload: &[u8]) -> Result<usize> {
        let on_stall = paced(self.config.stall_timeout);
        self.send_with(payload, on_stall)
    }

    /// [`FrameWriter::send`] with a caller-supplied stall wait.
    pub fn send_with<F>(&mut self, payload: &[u8], on_stall: F) -> Result<usize>
    where
        F: FnMut(&T) -> io::Result<bool>,
    {
        self.encode(payload)?;
        self.write_from(0, on_stall)?;
        self.flush()?;
        Ok(payload.len())
    }

    /// Encode and send a payload unless the stream cannot take any of it.
    ///
    /// Once the first byte is on the wire the rest of the frame follows, or
    /// the send fails with [`FrameError::Stalled`].
    pub fn try_send(&mut self, payload: &[u8]) -> Result<SendStatus> {
        let on_stall = paced(self.config.stall_timeout);
        self.try_send_with(payload, on_stall)
    }

    /// [`FrameWriter::try_send`] with a caller-supplied stall wait.
    pub fn try_send_with<F>(&mut self, payload: &[u8], on_stall: F) -> Result<SendStatus>
    where
        F: FnMut(&T) -> io::Result<bool>,
    {
        self.encode(payload)?;

        let first = loop {
            match self.inner.write(&self.buf) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => break n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    trace!(len = payload.len(), "stream not ready, frame not started");
                    return Ok(SendStatus::NotReady);
                }
                Err(err) => return Err(FrameError::Io(err)),
            }
        };

        self.write_from(first, on_stall)?;
        self.flush()?;
        Ok(SendStatus::Sent(payload.len()))
    }

    /// Write bytes that are already framed. Returns their length.
    pub fn write_encoded(&mut self, frame: &[u8]) -> Result<usize> {
        let on_stall = paced(self.config.stall_timeout);
        self.write_encoded_with(frame, on_stall)
    }

    /// [`FrameWriter::write_encoded`] with a caller-supplied stall wait.
    pub fn write_encoded_with<F>(&mut self, frame: &[u8], on_stall: F) -> Result<usize>
    where
        F: FnMut(&T) -> io::Result<bool>,
    {
        self.buf.clear();
        self.buf.extend_from_slice(frame);
        self.write_from(0, on_stall)?;
        self.flush()?;
        Ok(frame.len())
    }

    fn encode(&mut self, payload: &[u8]) -> Result<()> {
        self.buf.clear();
        self.config
            .format
            .encode(payload, self.config.max_frame_size, &mut self.buf)
    }

    fn write_from<F>(&mut self, mut offset: usize, mut on_stall: F) -> Result<()>
    where
        F: FnMut(&T) -> io::Result<bool>,
    {
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    if !on_stall(&self.inner)? {
                        debug!(written = offset, len = self.buf.len(), "frame stalled, giving up");
                        return Err(FrameError::Stalled {
                            written: offset,
                            len: self.buf.len(),
                        });
                    }
                }
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
        Ok(())
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Switch the wire format for subsequent frames.
    pub fn set_format(&mut self, format: FrameFormat) {
        self.config.format = format;
    }

    /// Current frame writer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

/// Stall wait that sleeps briefly between attempts and gives up after `limit`.
fn paced<T>(limit: Duration) -> impl FnMut(&T) -> io::Result<bool> {
    let started = Instant::now();
    move |_| {
        if started.elapsed() >= limit {
            return Ok(false);
        }
        thread::sleep(STALL_PAUSE);
        Ok(true)
    }
}

impl FrameWriter<TcpStream> {
    /// Create a frame writer for a TCP stream and apply the write timeout
    /// from config.
    pub fn with_config_tcp(inner: TcpStream, config: FrameConfig) -> Result<Self> {
        inner.set_write_timeout(config.write_timeout)?;
        Ok(Self::with_config(inner, config))
    }
}
