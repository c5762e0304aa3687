//! Frame buffer for accumulating partial stream reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management.
//! Implements a state machine for handling fragmented frames:
//! - `WaitingForLength`: Need at least 4 bytes
//! - `WaitingForPayload`: Length parsed, need N more payload bytes
//!
//! A partial frame never produces output; only complete payloads are
//! returned.
//!
//! # Example
//!
//! ```
//! use debugwire::protocol::{build_frame, FrameBuffer};
//!
//! let mut buffer = FrameBuffer::new();
//! let frame = build_frame(b"payload").unwrap();
//!
//! assert!(buffer.push(&frame[..3]).unwrap().is_empty());
//! let frames = buffer.push(&frame[3..]).unwrap();
//! assert_eq!(&frames[0][..], b"payload");
//! ```

use bytes::{Bytes, BytesMut};

use super::wire_format::{
    decode_frame_header, validate_frame_length, DEFAULT_MAX_FRAME_SIZE, FRAME_HEADER_SIZE,
};
use crate::error::Result;

/// State machine for frame parsing.
#[derive(Debug, Clone, Copy)]
enum State {
    /// Waiting for the 4-byte length prefix.
    WaitingForLength,
    /// Prefix parsed, waiting for payload bytes.
    WaitingForPayload { remaining: u32 },
}

/// Buffer for accumulating incoming bytes and extracting complete frames.
pub struct FrameBuffer {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Maximum allowed payload size.
    max_frame_size: u32,
}

impl FrameBuffer {
    /// Create a new frame buffer with default settings.
    ///
    /// Default capacity: 64KB, max frame: 8 MiB minus the prefix.
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a new frame buffer with a custom max frame size.
    pub fn with_max_frame_size(max_frame_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            state: State::WaitingForLength,
            max_frame_size,
        }
    }

    /// Push data into the buffer and extract all complete frame payloads.
    ///
    /// # Errors
    ///
    /// `OutOfMemory` if a frame announces a length above the maximum. The
    /// stream cannot be resynchronised after that.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Bytes>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.try_extract_one()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Try to extract a single frame payload from the buffer.
    fn try_extract_one(&mut self) -> Result<Option<Bytes>> {
        loop {
            match self.state {
                State::WaitingForLength => {
                    let Some(length) = decode_frame_header(&self.buffer) else {
                        return Ok(None);
                    };
                    validate_frame_length(length, self.max_frame_size)?;

                    let _ = self.buffer.split_to(FRAME_HEADER_SIZE);
                    if length == 0 {
                        return Ok(Some(Bytes::new()));
                    }
                    self.state = State::WaitingForPayload { remaining: length };
                }
                State::WaitingForPayload { remaining } => {
                    let remaining = remaining as usize;
                    if self.buffer.len() < remaining {
                        return Ok(None);
                    }

                    let payload = self.buffer.split_to(remaining).freeze();
                    self.state = State::WaitingForLength;
                    return Ok(Some(payload));
                }
            }
        }
    }

    /// Maximum accepted payload size.
    pub fn max_frame_size(&self) -> u32 {
        self.max_frame_size
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForLength;
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match self.state {
            State::WaitingForLength => "WaitingForLength",
            State::WaitingForPayload { .. } => "WaitingForPayload",
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DebugWireError;
    use crate::protocol::{build_frame, encode_frame_header};

    #[test]
    fn test_single_complete_frame() {
        let mut buffer = FrameBuffer::new();
        let frames = buffer.push(&build_frame(b"hello").unwrap()).unwrap();

        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], b"hello");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_multiple_frames_in_one_push() {
        let mut buffer = FrameBuffer::new();
        let mut combined = Vec::new();
        combined.extend(build_frame(b"first").unwrap());
        combined.extend(build_frame(b"second").unwrap());
        combined.extend(build_frame(b"third").unwrap());

        let frames = buffer.push(&combined).unwrap();

        assert_eq!(frames.len(), 3);
        assert_eq!(&frames[0][..], b"first");
        assert_eq!(&frames[1][..], b"second");
        assert_eq!(&frames[2][..], b"third");
    }

    #[test]
    fn test_fragmented_length_prefix() {
        let mut buffer = FrameBuffer::new();
        let frame = build_frame(b"test").unwrap();

        assert!(buffer.push(&frame[..2]).unwrap().is_empty());
        assert_eq!(buffer.state_name(), "WaitingForLength");

        let frames = buffer.push(&frame[2..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], b"test");
    }

    #[test]
    fn test_fragmented_payload() {
        let mut buffer = FrameBuffer::new();
        let payload = b"this is a longer payload that will be fragmented";
        let frame = build_frame(payload).unwrap();

        let split = FRAME_HEADER_SIZE + 10;
        assert!(buffer.push(&frame[..split]).unwrap().is_empty());
        assert_eq!(buffer.state_name(), "WaitingForPayload");

        let frames = buffer.push(&frame[split..]).unwrap();
        assert_eq!(&frames[0][..], payload);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_empty_frame() {
        let mut buffer = FrameBuffer::new();
        let frames = buffer.push(&build_frame(&[]).unwrap()).unwrap();

        assert_eq!(frames.len(), 1);
        assert!(frames[0].is_empty());
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut buffer = FrameBuffer::with_max_frame_size(100);
        let err = buffer.push(&encode_frame_header(1000)).unwrap_err();

        assert!(matches!(err, DebugWireError::OutOfMemory(_)));
        assert!(err.to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut buffer = FrameBuffer::new();
        let frame = build_frame(b"hi").unwrap();

        let mut all = Vec::new();
        for byte in &frame {
            all.extend(buffer.push(&[*byte]).unwrap());
        }

        assert_eq!(all.len(), 1);
        assert_eq!(&all[0][..], b"hi");
    }

    #[test]
    fn test_clear_resets_state() {
        let mut buffer = FrameBuffer::new();
        let frame = build_frame(b"test").unwrap();
        buffer.push(&frame[..FRAME_HEADER_SIZE + 1]).unwrap();
        assert_eq!(buffer.state_name(), "WaitingForPayload");

        buffer.clear();
        assert_eq!(buffer.state_name(), "WaitingForLength");
        assert!(buffer.is_empty());
    }
}
