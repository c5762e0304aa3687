//! Datagram packet peer.
//!
//! One `recvfrom` is one packet. `poll` drains the socket until it would
//! block and queues every datagram with its source address. When the queue
//! is full the datagram is dropped with a warning; the caller never sees an
//! error for it.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use bytes::Bytes;

use super::peer::PacketPeer;
use super::socket::{IpFamily, NetSocket, PollDirection, SocketType, StdSocket};
use crate::error::{DebugWireError, Result};
use crate::protocol::{PacketBuffer, PacketInfo};

/// Default receive queue size in payload bytes.
pub const DEFAULT_UDP_BUFFER_SIZE: usize = 1 << 16;

/// Default number of queued datagrams.
pub const DEFAULT_UDP_MAX_PACKETS: usize = 16;

/// Largest datagram payload read from the socket.
const MAX_DATAGRAM_SIZE: usize = 1 << 16;

/// Queue record for one received datagram.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UdpPacketInfo {
    size: u32,
    /// Source address, IPv4 stored as IPv4-mapped IPv6.
    ip: [u8; 16],
    port: u16,
}

impl UdpPacketInfo {
    fn new(size: usize, from: SocketAddr) -> Self {
        let ip = match from.ip() {
            IpAddr::V4(v4) => v4.to_ipv6_mapped(),
            IpAddr::V6(v6) => v6,
        };
        Self {
            size: size as u32,
            ip: ip.octets(),
            port: from.port(),
        }
    }

    /// Source address, with IPv4-mapped addresses folded back to IPv4.
    pub fn addr(&self) -> SocketAddr {
        let v6 = Ipv6Addr::from(self.ip);
        let ip = match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        };
        SocketAddr::new(ip, self.port)
    }
}

impl PacketInfo for UdpPacketInfo {
    fn size(&self) -> usize {
        self.size as usize
    }
}

/// UDP packet peer over a [`NetSocket`].
pub struct PacketPeerUdp {
    socket: Box<dyn NetSocket>,
    queue: PacketBuffer<UdpPacketInfo>,
    recv_buffer: Vec<u8>,
    buffer_size: usize,
    max_packets: usize,
    packet_addr: Option<SocketAddr>,
    dest_addr: Option<SocketAddr>,
    blocking: bool,
}

impl PacketPeerUdp {
    pub fn new() -> Self {
        Self::with_socket(Box::new(StdSocket::new()))
    }

    /// Peer over a caller-supplied socket.
    pub fn with_socket(socket: Box<dyn NetSocket>) -> Self {
        Self {
            socket,
            queue: PacketBuffer::new(0, 0),
            recv_buffer: Vec::new(),
            buffer_size: DEFAULT_UDP_BUFFER_SIZE,
            max_packets: DEFAULT_UDP_MAX_PACKETS,
            packet_addr: None,
            dest_addr: None,
            blocking: true,
        }
    }

    /// Queue limits applied on the next `listen` or first send.
    pub fn set_buffer_limits(&mut self, payload_bytes: usize, max_packets: usize) {
        self.buffer_size = payload_bytes;
        self.max_packets = max_packets;
    }

    /// Whether `put_packet` retries on `Busy` instead of returning it.
    pub fn set_blocking_mode(&mut self, enabled: bool) {
        self.blocking = enabled;
    }

    fn set_buffers(&mut self) {
        self.queue = PacketBuffer::new(self.max_packets, self.buffer_size);
        // Sized for any datagram so oversized ones are seen whole and dropped.
        self.recv_buffer = vec![0; MAX_DATAGRAM_SIZE];
    }

    /// Bind to `port` and start queueing datagrams.
    ///
    /// `bind_addr` of `None` binds the IPv4 wildcard. A positive
    /// `recv_buf_size` overrides the queue payload size.
    pub fn listen(
        &mut self,
        port: u16,
        bind_addr: Option<IpAddr>,
        recv_buf_size: usize,
    ) -> Result<()> {
        if self.socket.is_open() {
            return Err(DebugWireError::AlreadyInUse);
        }

        let ip = bind_addr.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        let family = if ip.is_ipv4() { IpFamily::V4 } else { IpFamily::V6 };
        self.socket.open(SocketType::Udp, family)?;
        self.socket.set_blocking(false)?;
        self.socket.set_reuse_address(true)?;
        if let Err(e) = self.socket.bind(SocketAddr::new(ip, port)) {
            self.socket.close();
            return Err(e);
        }

        if recv_buf_size > 0 {
            self.buffer_size = recv_buf_size;
        }
        self.set_buffers();
        tracing::debug!("UDP peer listening on {}:{}", ip, port);
        Ok(())
    }

    pub fn is_listening(&self) -> bool {
        self.socket.is_open()
    }

    /// Address `put_packet` sends to.
    pub fn set_dest_address(&mut self, addr: SocketAddr) {
        self.dest_addr = Some(addr);
    }

    /// Source of the packet most recently returned by `get_packet`.
    pub fn packet_address(&self) -> Option<SocketAddr> {
        self.packet_addr
    }

    /// Block until a datagram is readable.
    pub fn wait(&mut self) -> Result<()> {
        self.socket.poll(PollDirection::In, -1)?;
        Ok(())
    }

    /// Release the socket and drop everything queued. Idempotent.
    pub fn close(&mut self) {
        self.socket.close();
        self.queue.clear();
        self.recv_buffer = Vec::new();
    }
}

impl Default for PacketPeerUdp {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketPeer for PacketPeerUdp {
    fn poll(&mut self) -> Result<()> {
        if !self.socket.is_open() {
            return Err(DebugWireError::Unconfigured(
                "UDP peer is not listening".to_string(),
            ));
        }

        loop {
            let (read, from) = match self.socket.recvfrom(&mut self.recv_buffer) {
                Ok(received) => received,
                Err(DebugWireError::Busy) => break,
                Err(e) => return Err(e),
            };

            if self.queue.payload_space() < read || self.queue.packets_space() < 1 {
                tracing::warn!("Buffer payload full! Dropping data");
                continue;
            }

            let info = UdpPacketInfo::new(read, from);
            self.queue.write_packet(info, &self.recv_buffer[..read])?;
        }
        Ok(())
    }

    fn available_packet_count(&self) -> usize {
        self.queue.packets_left()
    }

    fn get_packet(&mut self) -> Result<Bytes> {
        self.poll()?;
        let (info, payload) = self.queue.read_packet()?;
        self.packet_addr = Some(info.addr());
        Ok(payload)
    }

    fn put_packet(&mut self, payload: &[u8]) -> Result<()> {
        let dest = self.dest_addr.ok_or_else(|| {
            DebugWireError::Unconfigured("UDP peer has no destination address".to_string())
        })?;

        if !self.socket.is_open() {
            let family = if dest.is_ipv4() { IpFamily::V4 } else { IpFamily::V6 };
            self.socket.open(SocketType::Udp, family)?;
            self.socket.set_blocking(false)?;
            let local = match dest {
                SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
                SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
            };
            self.socket.bind(local)?;
            self.set_buffers();
        }

        loop {
            match self.socket.sendto(payload, dest) {
                Ok(_) => return Ok(()),
                Err(DebugWireError::Busy) if self.blocking => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn max_packet_size(&self) -> usize {
        512
    }
}
