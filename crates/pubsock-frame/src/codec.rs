use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Maximum payload size of a single frame: 128 KiB.
pub const MAX_FRAME_SIZE: usize = 128 * 1024;

/// Size of the length prefix in front of point-to-point payloads.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Terminator of broker-role control lines.
pub const LINE_TERMINATOR: u8 = b'\n';

/// How long a writer waits for a stalled stream to take the rest of a frame.
pub const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(1);

/// Byte order of the 4-byte length prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    /// Big-endian, the conventional wire order.
    #[default]
    Network,
    /// Whatever the local machine uses; both ends must agree.
    Native,
}

impl ByteOrder {
    pub fn encode_u32(self, value: u32) -> [u8; LENGTH_PREFIX_SIZE] {
        match self {
            ByteOrder::Network => value.to_be_bytes(),
            ByteOrder::Native => value.to_ne_bytes(),
        }
    }

    pub fn decode_u32(self, bytes: [u8; LENGTH_PREFIX_SIZE]) -> u32 {
        match self {
            ByteOrder::Network => u32::from_be_bytes(bytes),
            ByteOrder::Native => u32::from_ne_bytes(bytes),
        }
    }
}

/// Wire format of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    /// `[u32 length][payload]`.
    LengthPrefixed(ByteOrder),
    /// `payload\n`.
    Line,
}

impl FrameFormat {
    /// Encode one payload into `dst`.
    pub fn encode(self, payload: &[u8], max_frame_size: usize, dst: &mut BytesMut) -> Result<()> {
        match self {
            FrameFormat::LengthPrefixed(order) => {
                encode_length_prefixed(payload, order, max_frame_size, dst)
            }
            FrameFormat::Line => encode_line(payload, max_frame_size, dst),
        }
    }

    /// Decode one payload from the front of `src`.
    ///
    /// Returns `Ok(None)` until `src` holds a complete frame.
    pub fn decode(self, src: &mut BytesMut, max_frame_size: usize) -> Result<Option<Bytes>> {
        self.decode_resume(src, max_frame_size, &mut 0)
    }

    /// [`FrameFormat::decode`] for a buffer that grows between calls.
    ///
    /// `scanned` carries how much of `src` is already known to hold no line
    /// terminator, so dribbling lines are not rescanned from the start.
    /// Length-prefixed frames ignore it.
    pub fn decode_resume(
        self,
        src: &mut BytesMut,
        max_frame_size: usize,
        scanned: &mut usize,
    ) -> Result<Option<Bytes>> {
        match self {
            FrameFormat::LengthPrefixed(order) => {
                decode_length_prefixed(src, order, max_frame_size)
            }
            FrameFormat::Line => decode_line_resume(src, max_frame_size, scanned),
        }
    }
}

/// Encode a length-prefixed frame.
///
/// Wire format:
/// ```text
/// ┌──────────────────┬──────────────────┐
/// │ Length (4B)      │ Payload          │
/// │ network/native   │ (Length bytes)   │
/// └──────────────────┴──────────────────┘
/// ```
pub fn encode_length_prefixed(
    payload: &[u8],
    order: ByteOrder,
    max_frame_size: usize,
    dst: &mut BytesMut,
) -> Result<()> {
    let max = max_frame_size.min(u32::MAX as usize);
    if payload.len() > max {
        return Err(FrameError::FrameTooLarge {
            size: payload.len(),
            max,
        });
    }
    dst.reserve(LENGTH_PREFIX_SIZE + payload.len());
    dst.put_slice(&order.encode_u32(payload.len() as u32));
    dst.put_slice(payload);
    Ok(())
}

/// Decode a length-prefixed frame.
///
/// A declared length above `max_frame_size` is rejected as soon as the prefix
/// is available, before any payload is buffered.
pub fn decode_length_prefixed(
    src: &mut BytesMut,
    order: ByteOrder,
    max_frame_size: usize,
) -> Result<Option<Bytes>> {
    if src.len() < LENGTH_PREFIX_SIZE {
        return Ok(None);
    }

    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    prefix.copy_from_slice(&src[..LENGTH_PREFIX_SIZE]);
    let payload_len = order.decode_u32(prefix) as usize;

    if payload_len > max_frame_size {
        return Err(FrameError::FrameTooLarge {
            size: payload_len,
            max: max_frame_size,
        });
    }

    if src.len() < LENGTH_PREFIX_SIZE + payload_len {
        return Ok(None);
    }

    src.advance(LENGTH_PREFIX_SIZE);
    Ok(Some(src.split_to(payload_len).freeze()))
}

/// Encode a newline-terminated line frame.
pub fn encode_line(payload: &[u8], max_frame_size: usize, dst: &mut BytesMut) -> Result<()> {
    if payload.len() > max_frame_size {
        return Err(FrameError::FrameTooLarge {
            size: payload.len(),
            max: max_frame_size,
        });
    }
    if let Some(pos) = payload.iter().position(|&b| b == LINE_TERMINATOR) {
        return Err(FrameError::InvalidLine(pos));
    }
    dst.reserve(payload.len() + 1);
    dst.put_slice(payload);
    dst.put_u8(LINE_TERMINATOR);
    Ok(())
}

/// Decode a line frame. The terminator is consumed but not returned.
///
/// More than `max_frame_size` buffered bytes without a terminator is a
/// [`FrameError::FrameTooLarge`].
pub fn decode_line(src: &mut BytesMut, max_frame_size: usize) -> Result<Option<Bytes>> {
    decode_line_resume(src, max_frame_size, &mut 0)
}

/// [`decode_line`] starting the terminator search at `*scanned`.
///
/// On a miss `*scanned` moves to the end of the searched window; it is reset
/// to zero once a line is returned.
pub fn decode_line_resume(
    src: &mut BytesMut,
    max_frame_size: usize,
    scanned: &mut usize,
) -> Result<Option<Bytes>> {
    let window = src.len().min(max_frame_size.saturating_add(1));
    let start = (*scanned).min(window);
    match src[start..window].iter().position(|&b| b == LINE_TERMINATOR) {
        Some(pos) => {
            let line = src.split_to(start + pos).freeze();
            src.advance(1);
            *scanned = 0;
            Ok(Some(line))
        }
        None if src.len() > max_frame_size => Err(FrameError::FrameTooLarge {
            size: src.len(),
            max: max_frame_size,
        }),
        None => {
            *scanned = window;
            Ok(None)
        }
    }
}

/// Configuration for frame readers and writers.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Wire format. Default: length-prefixed, network byte order.
    pub format: FrameFormat,
    /// Maximum payload size in bytes. Default: 128 KiB.
    pub max_frame_size: usize,
    /// Read timeout applied to blocking TCP streams.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout applied to blocking TCP streams.
    pub write_timeout: Option<std::time::Duration>,
    /// Longest wait for a stream that stops taking bytes mid-frame.
    pub stall_timeout: Duration,
}

impl FrameConfig {
    /// Default limits with the given wire format.
    pub fn with_format(format: FrameFormat) -> Self {
        Self {
            format,
            ..Self::default()
        }
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            format: FrameFormat::LengthPrefixed(ByteOrder::Network),
            max_frame_size: MAX_FRAME_SIZE,
            read_timeout: None,
            write_timeout: None,
            stall_timeout: DEFAULT_STALL_TIMEOUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(payload: &[u8]) -> Bytes {
        let mut buf = BytesMut::new();
        encode_length_prefixed(payload, ByteOrder::Network, MAX_FRAME_SIZE, &mut buf).unwrap();
        assert_eq!(buf.len(), LENGTH_PREFIX_SIZE + payload.len());
        let decoded = decode_length_prefixed(&mut buf, ByteOrder::Network, MAX_FRAME_SIZE)
            .unwrap()
            .unwrap();
        assert!(buf.is_empty());
        decoded
    }

    #[test]
    fn roundtrip_empty_and_boundary_payloads() {
        assert!(roundtrip(b"").is_empty());
        assert_eq!(roundtrip(b"x").as_ref(), b"x");

        let full = vec![0x5A; MAX_FRAME_SIZE];
        assert_eq!(roundtrip(&full).as_ref(), full.as_slice());
    }

    #[test]
    fn encode_rejects_payload_one_over_cap() {
        let mut buf = BytesMut::new();
        let oversized = vec![0u8; MAX_FRAME_SIZE + 1];
        let err = encode_length_prefixed(&oversized, ByteOrder::Network, MAX_FRAME_SIZE, &mut buf)
            .unwrap_err();
        assert!(matches!(
            err,
            FrameError::FrameTooLarge { size, max } if size == MAX_FRAME_SIZE + 1 && max == MAX_FRAME_SIZE
        ));
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_rejects_declared_length_over_cap() {
        let mut buf = BytesMut::new();
        buf.put_u32((MAX_FRAME_SIZE + 1) as u32);

        let err = decode_length_prefixed(&mut buf, ByteOrder::Network, MAX_FRAME_SIZE).unwrap_err();
        assert!(matches!(err, FrameError::FrameTooLarge { .. }));
    }

    #[test]
    fn network_order_prefix_is_big_endian() {
        let mut buf = BytesMut::new();
        encode_length_prefixed(b"abc", ByteOrder::Network, MAX_FRAME_SIZE, &mut buf).unwrap();
        assert_eq!(&buf[..], &[0, 0, 0, 3, b'a', b'b', b'c']);
    }

    #[test]
    fn native_order_prefix_matches_host() {
        let mut buf = BytesMut::new();
        encode_length_prefixed(b"abc", ByteOrder::Native, MAX_FRAME_SIZE, &mut buf).unwrap();
        assert_eq!(&buf[..LENGTH_PREFIX_SIZE], &3u32.to_ne_bytes());

        let frame = decode_length_prefixed(&mut buf, ByteOrder::Native, MAX_FRAME_SIZE)
            .unwrap()
            .unwrap();
        assert_eq!(frame.as_ref(), b"abc");
    }

    #[test]
    fn decode_incomplete_prefix_and_payload() {
        let mut buf = BytesMut::from(&[0u8, 0][..]);
        assert!(decode_length_prefixed(&mut buf, ByteOrder::Network, MAX_FRAME_SIZE)
            .unwrap()
            .is_none());

        let mut buf = BytesMut::new();
        encode_length_prefixed(b"hello", ByteOrder::Network, MAX_FRAME_SIZE, &mut buf).unwrap();
        buf.truncate(LENGTH_PREFIX_SIZE + 2);
        assert!(decode_length_prefixed(&mut buf, ByteOrder::Network, MAX_FRAME_SIZE)
            .unwrap()
            .is_none());
        assert_eq!(buf.len(), LENGTH_PREFIX_SIZE + 2, "partial frame must stay buffered");
    }

    #[test]
    fn line_roundtrip_and_terminator_handling() {
        let mut buf = BytesMut::new();
        encode_line(b"subscribe orders", MAX_FRAME_SIZE, &mut buf).unwrap();
        encode_line(b"", MAX_FRAME_SIZE, &mut buf).unwrap();
        assert_eq!(&buf[..], b"subscribe orders\n\n");

        let first = decode_line(&mut buf, MAX_FRAME_SIZE).unwrap().unwrap();
        let second = decode_line(&mut buf, MAX_FRAME_SIZE).unwrap().unwrap();
        assert_eq!(first.as_ref(), b"subscribe orders");
        assert!(second.is_empty());
        assert!(decode_line(&mut buf, MAX_FRAME_SIZE).unwrap().is_none());
    }

    #[test]
    fn line_payload_with_newline_is_rejected() {
        let mut buf = BytesMut::new();
        let err = encode_line(b"two\nlines", MAX_FRAME_SIZE, &mut buf).unwrap_err();
        assert!(matches!(err, FrameError::InvalidLine(3)));
    }

    #[test]
    fn line_at_cap_accepted_and_over_cap_rejected() {
        let mut buf = BytesMut::from(&vec![b'a'; 8][..]);
        buf.put_u8(LINE_TERMINATOR);
        let line = decode_line(&mut buf, 8).unwrap().unwrap();
        assert_eq!(line.len(), 8);

        let mut buf = BytesMut::from(&vec![b'a'; 9][..]);
        let err = decode_line(&mut buf, 8).unwrap_err();
        assert!(matches!(err, FrameError::FrameTooLarge { size: 9, max: 8 }));
    }

    #[test]
    fn partial_line_waits_for_terminator() {
        let mut buf = BytesMut::from(&b"half"[..]);
        assert!(decode_line(&mut buf, MAX_FRAME_SIZE).unwrap().is_none());
        buf.extend_from_slice(b" done\n");
        let line = decode_line(&mut buf, MAX_FRAME_SIZE).unwrap().unwrap();
        assert_eq!(line.as_ref(), b"half done");
    }

    #[test]
    fn resumed_line_scan_skips_searched_prefix() {
        let mut scanned = 0;
        let mut buf = BytesMut::from(&b"sub"[..]);
        assert!(decode_line_resume(&mut buf, MAX_FRAME_SIZE, &mut scanned)
            .unwrap()
            .is_none());
        assert_eq!(scanned, 3);

        buf.extend_from_slice(b"scribe");
        assert!(decode_line_resume(&mut buf, MAX_FRAME_SIZE, &mut scanned)
            .unwrap()
            .is_none());
        assert_eq!(scanned, 9);

        buf.extend_from_slice(b" orders\nnext");
        let line = decode_line_resume(&mut buf, MAX_FRAME_SIZE, &mut scanned)
            .unwrap()
            .unwrap();
        assert_eq!(line.as_ref(), b"subscribe orders");
        assert_eq!(scanned, 0);
        assert_eq!(&buf[..], b"next");
    }

    #[test]
    fn resumed_line_scan_still_enforces_cap() {
        let mut scanned = 0;
        let mut buf = BytesMut::from(&b"aaaa"[..]);
        assert!(decode_line_resume(&mut buf, 8, &mut scanned).unwrap().is_none());

        buf.extend_from_slice(b"aaaaa");
        let err = decode_line_resume(&mut buf, 8, &mut scanned).unwrap_err();
        assert!(matches!(err, FrameError::FrameTooLarge { size: 9, max: 8 }));
    }

    #[test]
    fn format_dispatches_to_codec() {
        let mut buf = BytesMut::new();
        FrameFormat::Line
            .encode(b"ping", MAX_FRAME_SIZE, &mut buf)
            .unwrap();
        FrameFormat::LengthPrefixed(ByteOrder::Network)
            .encode(b"ping", MAX_FRAME_SIZE, &mut buf)
            .unwrap();

        let line = FrameFormat::Line.decode(&mut buf, MAX_FRAME_SIZE).unwrap().unwrap();
        let frame = FrameFormat::LengthPrefixed(ByteOrder::Network)
            .decode(&mut buf, MAX_FRAME_SIZE)
            .unwrap()
            .unwrap();
        assert_eq!(line.as_ref(), b"ping");
        assert_eq!(frame.as_ref(), b"ping");
    }
}
