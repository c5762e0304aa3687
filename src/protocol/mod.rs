//! Protocol module - packet queues and stream framing.
//!
//! This module holds the buffering core shared by every transport:
//! - [`RingBuffer`]: bounded circular buffer with bulk read/write
//! - [`PacketBuffer`]: info ring + payload ring, one record per packet
//! - 4-byte length prefix encoding/decoding
//! - [`FrameBuffer`] for accumulating partial stream reads

mod frame_buffer;
mod packet_buffer;
mod ring_buffer;
mod wire_format;

pub use frame_buffer::FrameBuffer;
pub use packet_buffer::{PacketBuffer, PacketInfo};
pub use ring_buffer::RingBuffer;
pub use wire_format::{
    build_frame, decode_frame_header, encode_frame_header, validate_frame_length,
    DEFAULT_MAX_FRAME_SIZE, DEFAULT_MAX_VALUE_SIZE, DEFAULT_PORT, FRAME_HEADER_SIZE,
};
