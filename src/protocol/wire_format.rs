//! Stream framing format.
//!
//! Every message on a stream transport is a length-prefixed frame:
//! ```text
//! ┌──────────────┬──────────────────────┐
//! │ Length       │ Payload              │
//! │ 4 bytes      │ Length bytes         │
//! │ uint32 LE    │ MsgPack [name, args] │
//! └──────────────┴──────────────────────┘
//! ```
//!
//! The length counts payload bytes only.

use crate::error::{DebugWireError, Result};

/// Frame length prefix size in bytes.
pub const FRAME_HEADER_SIZE: usize = 4;

/// Default maximum frame payload (8 MiB minus the prefix).
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 8 * 1024 * 1024 - FRAME_HEADER_SIZE as u32;

/// Default cap on a single encoded message argument (1 MiB).
pub const DEFAULT_MAX_VALUE_SIZE: usize = 1024 * 1024;

/// Default debugger port.
pub const DEFAULT_PORT: u16 = 6007;

/// Encode a frame length prefix (Little Endian).
///
/// # Example
///
/// ```
/// use debugwire::protocol::{encode_frame_header, decode_frame_header};
///
/// let bytes = encode_frame_header(300);
/// assert_eq!(bytes, [0x2C, 0x01, 0, 0]);
/// assert_eq!(decode_frame_header(&bytes), Some(300));
/// ```
#[inline]
pub fn encode_frame_header(payload_length: u32) -> [u8; FRAME_HEADER_SIZE] {
    payload_length.to_le_bytes()
}

/// Decode a frame length prefix.
///
/// Returns `None` if the buffer is too short.
#[inline]
pub fn decode_frame_header(buf: &[u8]) -> Option<u32> {
    if buf.len() < FRAME_HEADER_SIZE {
        return None;
    }
    Some(u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]))
}

/// Check a frame length against the configured maximum.
pub fn validate_frame_length(payload_length: u32, max_frame_size: u32) -> Result<()> {
    if payload_length > max_frame_size {
        return Err(DebugWireError::OutOfMemory(format!(
            "Frame size {} exceeds maximum {}",
            payload_length, max_frame_size
        )));
    }
    Ok(())
}

/// Build a complete frame: prefix followed by payload.
pub fn build_frame(payload: &[u8]) -> Result<Vec<u8>> {
    let length = u32::try_from(payload.len()).map_err(|_| {
        DebugWireError::InvalidParameter(format!(
            "Payload of {} bytes does not fit a frame",
            payload.len()
        ))
    })?;

    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    frame.extend_from_slice(&encode_frame_header(length));
    frame.extend_from_slice(payload);
    Ok(frame)
}
