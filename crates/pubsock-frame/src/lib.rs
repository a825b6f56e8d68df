//! Message framing for pubsock.
//!
//! Two wire formats, selected by the endpoint's mode:
//! - point-to-point: a 4-byte unsigned length (network or native byte order)
//!   followed by exactly that many payload bytes
//! - broker: newline-terminated text lines
//!
//! Both are capped at [`MAX_FRAME_SIZE`] bytes of payload. Readers buffer
//! partial input, so callers always get complete frames.

pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

pub use codec::{
    decode_length_prefixed, decode_line, decode_line_resume, encode_length_prefixed, encode_line,
    ByteOrder, FrameConfig, FrameFormat, DEFAULT_STALL_TIMEOUT, LENGTH_PREFIX_SIZE,
    LINE_TERMINATOR, MAX_FRAME_SIZE,
};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use writer::{FrameWriter, SendStatus};
