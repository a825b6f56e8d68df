use std::io::{ErrorKind, Read};
use std::net::TcpStream;

use bytes::{Bytes, BytesMut};
use tracing::trace;

use crate::codec::{FrameConfig, FrameFormat};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete frames from any `Read` stream.
///
/// Partial input stays buffered between calls, which is what makes
/// [`FrameReader::poll_frame`] safe on non-blocking sockets.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    /// Buffered prefix already searched for a line terminator.
    scanned: usize,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            scanned: 0,
            config,
        }
    }

    /// Read the next complete frame (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached. On a
    /// non-blocking stream a would-block surfaces as `FrameError::Io`; use
    /// [`FrameReader::poll_frame`] there instead.
    pub fn read_frame(&mut self) -> Result<Bytes> {
        loop {
            if let Some(frame) = self.decode_buffered()? {
                return Ok(frame);
            }
            match self.fill()? {
                Fill::Read => {}
                Fill::Retry => continue,
                Fill::Eof => return Err(FrameError::ConnectionClosed),
            }
        }
    }

    /// Read the next frame if one can be completed without blocking.
    ///
    /// Returns `Ok(None)` when the stream reports would-block before a full
    /// frame is buffered.
    pub fn poll_frame(&mut self) -> Result<Option<Bytes>> {
        loop {
            if let Some(frame) = self.decode_buffered()? {
                return Ok(Some(frame));
            }
            match self.fill() {
                Ok(Fill::Read) | Ok(Fill::Retry) => {}
                Ok(Fill::Eof) => {
                    trace!(buffered = self.buf.len(), "eof while polling for a frame");
                    return Err(FrameError::ConnectionClosed);
                }
                Err(FrameError::Io(err)) if err.kind() == ErrorKind::WouldBlock => {
                    return Ok(None)
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn decode_buffered(&mut self) -> Result<Option<Bytes>> {
        self.config
            .format
            .decode_resume(&mut self.buf, self.config.max_frame_size, &mut self.scanned)
    }

    fn fill(&mut self) -> Result<Fill> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        match self.inner.read(&mut chunk) {
            Ok(0) => Ok(Fill::Eof),
            Ok(n) => {
                self.buf.extend_from_slice(&chunk[..n]);
                Ok(Fill::Read)
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => Ok(Fill::Retry),
            Err(err) => Err(FrameError::Io(err)),
        }
    }

    /// Number of bytes received but not yet returned as a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Switch the wire format for subsequent frames.
    pub fn set_format(&mut self, format: FrameFormat) {
        if self.config.format != format {
            self.scanned = 0;
            self.config.format = format;
        }
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

enum Fill {
    Read,
    Retry,
    Eof,
}

impl FrameReader<TcpStream> {
    /// Create a frame reader for a TCP stream and apply the read timeout from
    /// config.
    pub fn with_config_tcp(inner: TcpStream, config: FrameConfig) -> Result<Self> {
        inner.set_read_timeout(config.read_timeout)?;
        Ok(Self::with_config(inner, config))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::net::TcpListener;

    use bytes::{BufMut, BytesMut};

    use super::*;
    use crate::codec::{encode_length_prefixed, ByteOrder, MAX_FRAME_SIZE};

    fn wire(payloads: &[&[u8]]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        for payload in payloads {
            encode_length_prefixed(payload, ByteOrder::Network, MAX_FRAME_SIZE, &mut buf).unwrap();
        }
        buf.to_vec()
    }

    #[test]
    fn read_multiple_frames() {
        let mut reader = FrameReader::new(Cursor::new(wire(&[b"one", b"two", b"three"])));

        assert_eq!(reader.read_frame().unwrap().as_ref(), b"one");
        assert_eq!(reader.read_frame().unwrap().as_ref(), b"two");
        assert_eq!(reader.read_frame().unwrap().as_ref(), b"three");
        assert!(matches!(
            reader.read_frame().unwrap_err(),
            FrameError::ConnectionClosed
        ));
    }

    #[test]
    fn partial_read_handling() {
        let byte_reader = ByteByByteReader {
            bytes: wire(&[b"slow"]),
            pos: 0,
        };
        let mut reader = FrameReader::new(byte_reader);
        assert_eq!(reader.read_frame().unwrap().as_ref(), b"slow");
    }

    #[test]
    fn connection_closed_mid_frame() {
        let mut partial = BytesMut::new();
        partial.put_u32(16);
        partial.put_slice(b"only-part");

        let mut reader = FrameReader::new(Cursor::new(partial.to_vec()));
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn oversized_frame_in_stream() {
        let mut bytes = BytesMut::new();
        bytes.put_u32(1024);

        let cfg = FrameConfig {
            max_frame_size: 16,
            ..FrameConfig::default()
        };
        let mut reader = FrameReader::with_config(Cursor::new(bytes.to_vec()), cfg);
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::FrameTooLarge { size: 1024, max: 16 }));
    }

    #[test]
    fn read_lines_in_line_format() {
        let cfg = FrameConfig::with_format(FrameFormat::Line);
        let mut reader = FrameReader::with_config(Cursor::new(b"hello\nworld\n".to_vec()), cfg);

        assert_eq!(reader.read_frame().unwrap().as_ref(), b"hello");
        assert_eq!(reader.read_frame().unwrap().as_ref(), b"world");
    }

    #[test]
    fn dribbled_line_is_assembled_across_polls() {
        let reader = StagedReader {
            stages: vec![
                Ok(b"sta".to_vec()),
                Err(ErrorKind::WouldBlock),
                Ok(b"tus".to_vec()),
                Err(ErrorKind::WouldBlock),
                Ok(b"\nquit\n".to_vec()),
            ],
        };
        let cfg = FrameConfig::with_format(FrameFormat::Line);
        let mut framed = FrameReader::with_config(reader, cfg);

        assert!(framed.poll_frame().unwrap().is_none());
        assert!(framed.poll_frame().unwrap().is_none());
        assert_eq!(framed.buffered(), 6);
        assert_eq!(framed.poll_frame().unwrap().unwrap().as_ref(), b"status");
        assert_eq!(framed.poll_frame().unwrap().unwrap().as_ref(), b"quit");
    }

    #[test]
    fn poll_frame_returns_none_on_would_block_and_keeps_partial_data() {
        let bytes = wire(&[b"ok"]);
        let reader = StagedReader {
            stages: vec![
                Ok(bytes[..3].to_vec()),
                Err(ErrorKind::WouldBlock),
                Ok(bytes[3..].to_vec()),
            ],
        };
        let mut framed = FrameReader::new(reader);

        assert!(framed.poll_frame().unwrap().is_none());
        assert_eq!(framed.buffered(), 3);
        assert_eq!(framed.poll_frame().unwrap().unwrap().as_ref(), b"ok");
    }

    #[test]
    fn read_frame_propagates_would_block() {
        let reader = StagedReader {
            stages: vec![Err(ErrorKind::WouldBlock)],
        };
        let mut framed = FrameReader::new(reader);
        let err = framed.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::Io(e) if e.kind() == ErrorKind::WouldBlock));
    }

    #[test]
    fn interrupted_read_retries() {
        let bytes = wire(&[b"ok"]);
        let reader = StagedReader {
            stages: vec![Err(ErrorKind::Interrupted), Ok(bytes)],
        };
        let mut framed = FrameReader::new(reader);
        assert_eq!(framed.read_frame().unwrap().as_ref(), b"ok");
    }

    #[test]
    fn poll_frame_over_non_blocking_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();

        let mut reader = FrameReader::with_config_tcp(server, FrameConfig::default()).unwrap();
        assert!(reader.poll_frame().unwrap().is_none());

        std::io::Write::write_all(&mut client, &wire(&[b"tcp"])).unwrap();
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        loop {
            if let Some(frame) = reader.poll_frame().unwrap() {
                assert_eq!(frame.as_ref(), b"tcp");
                break;
            }
            assert!(std::time::Instant::now() < deadline, "frame never arrived");
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
    }

    #[derive(Debug)]
    struct ByteByByteReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for ByteByByteReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    /// Replays a scripted sequence of reads, then reports EOF.
    struct StagedReader {
        stages: Vec<std::result::Result<Vec<u8>, ErrorKind>>,
    }

    impl Read for StagedReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.stages.is_empty() {
                return Ok(0);
            }
            match self.stages.remove(0) {
                Ok(bytes) => {
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                }
                Err(kind) => Err(std::io::Error::from(kind)),
            }
        }
    }
}
