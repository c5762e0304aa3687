//! Packet queue built from two ring buffers.
//!
//! One ring holds fixed-size info records, the other holds raw payload bytes.
//! The n-th unread info record always describes exactly the next
//! `info.size()` payload bytes:
//!
//! - `write_packet` checks both rings before touching either, then writes
//!   the payload first and the info record second.
//! - `read_packet` reads the info record first, then exactly `size` bytes.
//!
//! A write that fails leaves both rings untouched.

use bytes::{Bytes, BytesMut};

use super::ring_buffer::RingBuffer;
use crate::error::{DebugWireError, Result};

/// Fixed-size metadata record stored per queued packet.
pub trait PacketInfo: Copy + Default {
    /// Payload size in bytes described by this record.
    fn size(&self) -> usize;
}

/// Bounded queue of variable-length packets.
pub struct PacketBuffer<I> {
    info: RingBuffer<I>,
    payload: RingBuffer<u8>,
}

impl<I: PacketInfo> PacketBuffer<I> {
    /// Create a queue with room for `max_packets` records and
    /// `payload_capacity` payload bytes (both rounded up to powers of two).
    pub fn new(max_packets: usize, payload_capacity: usize) -> Self {
        Self {
            info: RingBuffer::with_capacity(max_packets),
            payload: RingBuffer::with_capacity(payload_capacity),
        }
    }

    /// Enqueue one packet. All-or-nothing.
    ///
    /// # Errors
    ///
    /// - `InvalidParameter` if `info.size()` differs from `payload.len()`.
    /// - `OutOfMemory` if there is no free info slot or not enough payload
    ///   space.
    pub fn write_packet(&mut self, info: I, payload: &[u8]) -> Result<()> {
        if info.size() != payload.len() {
            return Err(DebugWireError::InvalidParameter(format!(
                "Packet info size {} does not match payload length {}",
                info.size(),
                payload.len()
            )));
        }
        if self.info.space_left() < 1 {
            return Err(DebugWireError::OutOfMemory(
                "No free packet slots".to_string(),
            ));
        }
        if self.payload.space_left() < payload.len() {
            return Err(DebugWireError::OutOfMemory(format!(
                "Payload of {} bytes exceeds free space {}",
                payload.len(),
                self.payload.space_left()
            )));
        }

        self.payload.write(payload)?;
        self.info.write(std::slice::from_ref(&info))?;
        Ok(())
    }

    /// Dequeue the oldest packet.
    ///
    /// # Errors
    ///
    /// `Unavailable` if the queue is empty.
    pub fn read_packet(&mut self) -> Result<(I, Bytes)> {
        let mut info = [I::default()];
        self.info.read(&mut info)?;
        let info = info[0];

        debug_assert!(self.payload.data_left() >= info.size());
        let mut payload = BytesMut::zeroed(info.size());
        self.payload.read(&mut payload[..])?;

        Ok((info, payload.freeze()))
    }

    /// Number of queued packets.
    #[inline]
    pub fn packets_left(&self) -> usize {
        self.info.data_left()
    }

    /// Number of free packet slots.
    #[inline]
    pub fn packets_space(&self) -> usize {
        self.info.space_left()
    }

    /// Number of queued payload bytes.
    #[inline]
    pub fn payload_left(&self) -> usize {
        self.payload.data_left()
    }

    /// Number of free payload bytes.
    #[inline]
    pub fn payload_space(&self) -> usize {
        self.payload.space_left()
    }

    /// Resize the info ring. Discards queued packets.
    pub fn set_max_packets(&mut self, max_packets: usize) {
        self.clear();
        self.info.resize(max_packets);
    }

    /// Resize the payload ring. Discards queued packets.
    pub fn set_payload_capacity(&mut self, capacity: usize) {
        self.clear();
        self.payload.resize(capacity);
    }

    /// Drop every queued packet, keeping both capacities.
    pub fn clear(&mut self) {
        self.info.clear();
        self.payload.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, Default, PartialEq)]
    struct TestInfo {
        size: u32,
        tag: u8,
    }

    impl PacketInfo for TestInfo {
        fn size(&self) -> usize {
            self.size as usize
        }
    }

    fn info(size: usize, tag: u8) -> TestInfo {
        TestInfo {
            size: size as u32,
            tag,
        }
    }

    #[test]
    fn test_write_read_single_packet() {
        let mut buffer = PacketBuffer::new(4, 64);
        buffer.write_packet(info(5, 1), b"hello").unwrap();

        assert_eq!(buffer.packets_left(), 1);
        assert_eq!(buffer.payload_left(), 5);

        let (meta, payload) = buffer.read_packet().unwrap();
        assert_eq!(meta.tag, 1);
        assert_eq!(&payload[..], b"hello");
        assert_eq!(buffer.packets_left(), 0);
    }

    #[test]
    fn test_payload_capacity_limits_writes() {
        // 64 payload bytes, 4 slots: 20 + 20 + 20 fit, a further 10 does not
        let mut buffer = PacketBuffer::new(4, 64);
        for tag in 0..3 {
            buffer.write_packet(info(20, tag), &[tag; 20]).unwrap();
        }

        let err = buffer.write_packet(info(10, 3), &[3; 10]).unwrap_err();
        assert!(matches!(err, DebugWireError::OutOfMemory(_)));
        assert_eq!(buffer.packets_space(), 1);

        let (first, payload) = buffer.read_packet().unwrap();
        assert_eq!(first.tag, 0);
        assert_eq!(payload.len(), 20);

        buffer.write_packet(info(10, 3), &[3; 10]).unwrap();
        assert_eq!(buffer.packets_left(), 3);
    }

    #[test]
    fn test_slot_limit_leaves_payload_untouched() {
        let mut buffer = PacketBuffer::new(2, 64);
        buffer.write_packet(info(1, 0), b"a").unwrap();
        buffer.write_packet(info(1, 1), b"b").unwrap();

        let err = buffer.write_packet(info(1, 2), b"c").unwrap_err();
        assert!(matches!(err, DebugWireError::OutOfMemory(_)));
        assert_eq!(buffer.payload_left(), 2);
    }

    #[test]
    fn test_size_mismatch_rejected() {
        let mut buffer = PacketBuffer::new(2, 64);
        let err = buffer.write_packet(info(3, 0), b"four").unwrap_err();
        assert!(matches!(err, DebugWireError::InvalidParameter(_)));
        assert_eq!(buffer.packets_left(), 0);
        assert_eq!(buffer.payload_left(), 0);
    }

    #[test]
    fn test_read_empty_is_unavailable() {
        let mut buffer: PacketBuffer<TestInfo> = PacketBuffer::new(2, 16);
        assert!(matches!(
            buffer.read_packet(),
            Err(DebugWireError::Unavailable)
        ));
    }

    #[test]
    fn test_empty_payload_packet() {
        let mut buffer = PacketBuffer::new(2, 16);
        buffer.write_packet(info(0, 9), b"").unwrap();

        let (meta, payload) = buffer.read_packet().unwrap();
        assert_eq!(meta.tag, 9);
        assert!(payload.is_empty());
    }

    #[test]
    fn test_fifo_order_with_wraparound() {
        let mut buffer = PacketBuffer::new(4, 16);
        for round in 0u8..10 {
            buffer.write_packet(info(3, round), &[round; 3]).unwrap();
            buffer.write_packet(info(5, round), &[round; 5]).unwrap();

            let (a, pa) = buffer.read_packet().unwrap();
            let (b, pb) = buffer.read_packet().unwrap();
            assert_eq!((a.size, a.tag, pa.len()), (3, round, 3));
            assert_eq!((b.size, b.tag, pb.len()), (5, round, 5));
            assert!(pb.iter().all(|&x| x == round));
        }
    }

    #[test]
    fn test_clear_resets_both_rings() {
        let mut buffer = PacketBuffer::new(4, 16);
        buffer.write_packet(info(4, 0), b"data").unwrap();
        buffer.clear();

        assert_eq!(buffer.packets_left(), 0);
        assert_eq!(buffer.payload_left(), 0);
        assert_eq!(buffer.packets_space(), 4);
        assert_eq!(buffer.payload_space(), 16);
    }
}
