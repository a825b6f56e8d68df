//! Offset control message.
//!
//! ```text
//! ┌──────────────────┬──────────────────┐
//! │ Length (4B) = 4  │ Offset (4B)      │
//! └──────────────────┴──────────────────┘
//! ```
//! Both fields use the endpoint's length-prefix byte order. The message goes
//! over the primary outbound socket only, never through the peer pool.

use bytes::{BufMut, BytesMut};
use pubsock_frame::{decode_length_prefixed, ByteOrder, FrameError, LENGTH_PREFIX_SIZE};

/// Wire size of an offset control message.
pub const OFFSET_MESSAGE_SIZE: usize = 2 * LENGTH_PREFIX_SIZE;

/// Encode `offset` as a control message.
pub fn encode_offset(offset: u32, order: ByteOrder) -> BytesMut {
    let mut dst = BytesMut::with_capacity(OFFSET_MESSAGE_SIZE);
    dst.put_slice(&order.encode_u32(LENGTH_PREFIX_SIZE as u32));
    dst.put_slice(&order.encode_u32(offset));
    dst
}

/// Decode a control message from the front of `src`.
///
/// Returns `Ok(None)` until all eight bytes are buffered; a length field other
/// than four is a [`FrameError::FrameTooLarge`] violation.
pub fn decode_offset(src: &mut BytesMut, order: ByteOrder) -> Result<Option<u32>, FrameError> {
    let Some(payload) = decode_length_prefixed(src, order, LENGTH_PREFIX_SIZE)? else {
        return Ok(None);
    };
    let bytes: [u8; LENGTH_PREFIX_SIZE] =
        payload
            .as_ref()
            .try_into()
            .map_err(|_| FrameError::FrameTooLarge {
                size: payload.len(),
                max: LENGTH_PREFIX_SIZE,
            })?;
    Ok(Some(order.decode_u32(bytes)))
}
