//! Stream packet peer.
//!
//! Packets travel as length-prefixed frames over a reliable byte stream.
//! Incoming bytes accumulate in a [`FrameBuffer`]; only complete frames are
//! queued. Outgoing frames are staged in a ring buffer and flushed with
//! non-blocking sends on every `put_packet` and `poll`.

use std::collections::VecDeque;

use bytes::Bytes;

use super::peer::PacketPeer;
use super::socket::NetSocket;
use crate::error::{DebugWireError, Result};
use crate::protocol::{
    build_frame, FrameBuffer, PacketBuffer, PacketInfo, RingBuffer, DEFAULT_MAX_FRAME_SIZE,
};

/// Default incoming queue size in payload bytes.
pub const DEFAULT_INPUT_BUFFER_SIZE: usize = 8 * 1024 * 1024;

/// Default outgoing ring size in bytes.
pub const DEFAULT_OUTPUT_BUFFER_SIZE: usize = 8 * 1024 * 1024;

/// Default number of queued incoming packets.
pub const DEFAULT_MAX_PACKETS: usize = 1024;

const READ_CHUNK: usize = 16 * 1024;

/// Queue record for one stream frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamPacketInfo {
    size: u32,
}

impl PacketInfo for StreamPacketInfo {
    fn size(&self) -> usize {
        self.size as usize
    }
}

/// Connection state of a stream peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    Disconnected,
    Connecting,
    Connected,
}

/// Buffer sizes for a [`PacketPeerStream`].
#[derive(Debug, Clone, Copy)]
pub struct StreamLimits {
    pub max_frame_size: u32,
    pub input_buffer_size: usize,
    pub output_buffer_size: usize,
    pub max_packets: usize,
}

impl Default for StreamLimits {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            input_buffer_size: DEFAULT_INPUT_BUFFER_SIZE,
            output_buffer_size: DEFAULT_OUTPUT_BUFFER_SIZE,
            max_packets: DEFAULT_MAX_PACKETS,
        }
    }
}

/// Length-prefixed packet peer over a connected [`NetSocket`].
pub struct PacketPeerStream {
    socket: Option<Box<dyn NetSocket>>,
    status: StreamStatus,
    frames: FrameBuffer,
    queue: PacketBuffer<StreamPacketInfo>,
    /// Complete frames waiting for room in `queue`.
    pending: VecDeque<Bytes>,
    output: RingBuffer<u8>,
    read_chunk: Vec<u8>,
}

impl PacketPeerStream {
    /// Disconnected peer with the given limits.
    pub fn new(limits: StreamLimits) -> Self {
        Self {
            socket: None,
            status: StreamStatus::Disconnected,
            frames: FrameBuffer::with_max_frame_size(limits.max_frame_size),
            queue: PacketBuffer::new(limits.max_packets, limits.input_buffer_size),
            pending: VecDeque::new(),
            output: RingBuffer::with_capacity(limits.output_buffer_size),
            read_chunk: vec![0; READ_CHUNK],
        }
    }

    /// Peer over an already connected socket.
    pub fn with_socket(socket: Box<dyn NetSocket>, limits: StreamLimits) -> Self {
        let mut peer = Self::new(limits);
        peer.set_socket(socket);
        peer
    }

    /// Replace the underlying socket, dropping all buffered data.
    pub fn set_socket(&mut self, socket: Box<dyn NetSocket>) {
        self.close();
        self.status = if socket.is_open() {
            StreamStatus::Connected
        } else {
            StreamStatus::Connecting
        };
        self.socket = Some(socket);
    }

    pub fn status(&self) -> StreamStatus {
        self.status
    }

    pub fn is_connected(&self) -> bool {
        self.status == StreamStatus::Connected
    }

    /// Bytes staged for sending but not yet accepted by the socket.
    pub fn pending_output(&self) -> usize {
        self.output.data_left()
    }

    /// Close the socket and drop all buffered data. Idempotent.
    pub fn close(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            socket.close();
            tracing::debug!("Stream peer closed");
        }
        self.status = StreamStatus::Disconnected;
        self.frames.clear();
        self.queue.clear();
        self.pending.clear();
        self.output.clear();
    }

    fn socket(&mut self) -> Result<&mut Box<dyn NetSocket>> {
        self.socket.as_mut().ok_or(DebugWireError::ConnectionClosed)
    }

    /// Push staged output to the socket until it would block.
    fn flush(&mut self) -> Result<()> {
        while self.output.data_left() > 0 {
            let (first, _) = self.output.as_slices();
            let chunk = first.to_vec();
            let socket = self.socket()?;
            match socket.send(&chunk) {
                Ok(0) => return Err(DebugWireError::ConnectionClosed),
                Ok(sent) => self.output.skip(sent)?,
                Err(DebugWireError::Busy) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Pull available bytes and queue every complete frame.
    ///
    /// Reading stops while the queue is full, leaving the rest in the socket.
    fn read_available(&mut self) -> Result<()> {
        loop {
            self.queue_pending()?;
            if !self.pending.is_empty() {
                return Ok(());
            }

            let socket = self.socket.as_mut().ok_or(DebugWireError::ConnectionClosed)?;
            let read = match socket.recv(&mut self.read_chunk) {
                Ok(0) => return Err(DebugWireError::ConnectionClosed),
                Ok(read) => read,
                Err(DebugWireError::Busy) => return Ok(()),
                Err(e) => return Err(e),
            };

            let frames = self.frames.push(&self.read_chunk[..read])?;
            self.pending.extend(frames);
        }
    }

    /// Move waiting frames into the queue while they fit.
    ///
    /// A frame larger than the whole queue can never fit and is
    /// `OutOfMemory`.
    fn queue_pending(&mut self) -> Result<()> {
        let capacity = self.queue.payload_left() + self.queue.payload_space();
        while let Some(payload) = self.pending.front() {
            if payload.len() > capacity {
                return Err(DebugWireError::OutOfMemory(format!(
                    "Frame of {} bytes exceeds the input buffer of {}",
                    payload.len(),
                    capacity
                )));
            }
            if self.queue.packets_space() == 0 || self.queue.payload_space() < payload.len() {
                break;
            }
            let info = StreamPacketInfo {
                size: payload.len() as u32,
            };
            self.queue.write_packet(info, payload)?;
            self.pending.pop_front();
        }
        Ok(())
    }

    /// Drop the socket after the remote end went away, keeping the packets
    /// already queued.
    fn remote_closed(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            socket.close();
            tracing::debug!("Stream peer closed by remote");
        }
        self.status = StreamStatus::Disconnected;
        self.frames.clear();
        self.output.clear();
    }

    fn fail(&mut self, err: DebugWireError) -> DebugWireError {
        if err.is_connection_fatal() {
            tracing::warn!("Stream peer error, closing: {}", err);
            self.close();
        }
        err
    }
}

impl PacketPeer for PacketPeerStream {
    fn poll(&mut self) -> Result<()> {
        if self.socket.is_none() {
            // Packets received before the remote end closed stay readable.
            self.queue_pending()?;
            if self.queue.packets_left() > 0 {
                return Ok(());
            }
            return Err(DebugWireError::ConnectionClosed);
        }
        self.status = StreamStatus::Connected;

        match self.flush().and_then(|_| self.read_available()) {
            Ok(()) => Ok(()),
            Err(DebugWireError::ConnectionClosed) => {
                self.remote_closed();
                self.queue_pending()?;
                if self.queue.packets_left() > 0 {
                    Ok(())
                } else {
                    Err(DebugWireError::ConnectionClosed)
                }
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    fn available_packet_count(&self) -> usize {
        self.queue.packets_left()
    }

    fn get_packet(&mut self) -> Result<Bytes> {
        if self.queue.packets_left() == 0 && (self.socket.is_some() || !self.pending.is_empty()) {
            self.poll()?;
        }
        let (_, payload) = self.queue.read_packet()?;
        Ok(payload)
    }

    fn put_packet(&mut self, payload: &[u8]) -> Result<()> {
        if self.socket.is_none() {
            return Err(DebugWireError::ConnectionClosed);
        }

        let frame = build_frame(payload)?;
        if frame.len() > self.output.space_left() {
            return Err(self.fail(DebugWireError::OutOfMemory(format!(
                "Output buffer full: frame of {} bytes, {} free",
                frame.len(),
                self.output.space_left()
            ))));
        }
        self.output.write(&frame)?;
        self.flush().map_err(|e| self.fail(e))
    }

    fn max_packet_size(&self) -> usize {
        self.frames.max_frame_size() as usize
    }
}
