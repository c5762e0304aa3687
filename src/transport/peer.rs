//! Packet and message peer traits.
//!
//! [`PacketPeer`] is the surface shared by the datagram and stream peers.
//! [`DebuggerPeer`] sits one level up: it moves whole [`Message`]s and is
//! what the debugger and the controller session talk to.
//!
//! # Example
//!
//! ```ignore
//! use debugwire::transport::{DebuggerPeer, TcpDebuggerPeer, StreamLimits};
//! use debugwire::Message;
//!
//! let mut peer = TcpDebuggerPeer::connect("127.0.0.1:6007".parse()?, StreamLimits::default())?;
//! peer.put_message(&Message::bare("get_stack_dump"))?;
//! peer.poll()?;
//! while peer.has_message() {
//!     let message = peer.get_message()?;
//!     println!("{}", message.name);
//! }
//! ```

use std::net::SocketAddr;
use std::thread;
use std::time::Duration;

use bytes::Bytes;

use super::socket::{IpFamily, NetSocket, SocketType, StdSocket};
use super::stream::{PacketPeerStream, StreamLimits};
use crate::error::{DebugWireError, Result};
use crate::message::Message;
use crate::protocol::DEFAULT_MAX_VALUE_SIZE;

/// Waits between connection attempts, in milliseconds.
const CONNECT_RETRY_WAITS_MS: [u64; 6] = [1, 10, 100, 1000, 1000, 1000];

/// Queue of opaque packets over some transport.
pub trait PacketPeer {
    /// Move pending data between the socket and the queues.
    fn poll(&mut self) -> Result<()>;

    /// Packets already queued, without polling.
    fn available_packet_count(&self) -> usize;

    /// Dequeue one packet. Fails `Unavailable` when none is queued.
    fn get_packet(&mut self) -> Result<Bytes>;

    fn put_packet(&mut self, payload: &[u8]) -> Result<()>;

    fn max_packet_size(&self) -> usize;

    /// Poll, then report the queued packet count.
    fn get_available_packet_count(&mut self) -> Result<usize> {
        self.poll()?;
        Ok(self.available_packet_count())
    }
}

/// Message-level connection to the other end of a debug session.
pub trait DebuggerPeer: Send {
    /// Flush outgoing data and read incoming messages.
    fn poll(&mut self) -> Result<()>;

    fn has_message(&self) -> bool;

    /// Next decoded message. Fails `Unavailable` when none is queued and
    /// `Malformed` when the packet does not decode.
    fn get_message(&mut self) -> Result<Message>;

    fn put_message(&mut self, message: &Message) -> Result<()>;

    fn is_peer_connected(&self) -> bool;

    fn max_message_size(&self) -> usize;

    /// Drop the connection. Safe to call repeatedly.
    fn close(&mut self);

    /// Whether a caller may sleep waiting on this peer.
    fn can_block(&self) -> bool {
        true
    }
}

/// [`DebuggerPeer`] over a length-prefixed TCP stream.
pub struct TcpDebuggerPeer {
    stream: PacketPeerStream,
    max_value_size: usize,
}

impl TcpDebuggerPeer {
    /// Wrap a connected socket.
    pub fn from_socket(socket: Box<dyn NetSocket>, limits: StreamLimits) -> Self {
        Self {
            stream: PacketPeerStream::with_socket(socket, limits),
            max_value_size: DEFAULT_MAX_VALUE_SIZE,
        }
    }

    /// Connect to a listening debugger, retrying a few times with growing
    /// waits before giving up.
    pub fn connect(addr: SocketAddr, limits: StreamLimits) -> Result<Self> {
        let family = if addr.is_ipv4() {
            IpFamily::V4
        } else {
            IpFamily::V6
        };

        let mut last_error = None;
        for wait in CONNECT_RETRY_WAITS_MS {
            match Self::open_stream(addr, family) {
                Ok(socket) => {
                    tracing::debug!("Connected to remote debugger at {}", addr);
                    return Ok(Self::from_socket(Box::new(socket), limits));
                }
                Err(e) => {
                    tracing::debug!("Connect to {} failed ({}), retrying in {} ms", addr, e, wait);
                    last_error = Some(e);
                    thread::sleep(Duration::from_millis(wait));
                }
            }
        }

        let reason = last_error.map_or_else(String::new, |e| e.to_string());
        tracing::error!("Remote debugger failed to connect to {}: {}", addr, reason);
        Err(DebugWireError::Connection(format!(
            "Unable to connect to {}: {}",
            addr, reason
        )))
    }

    fn open_stream(addr: SocketAddr, family: IpFamily) -> Result<StdSocket> {
        let mut socket = StdSocket::new();
        socket.open(SocketType::Tcp, family)?;
        socket.set_tcp_nodelay(true)?;
        socket.connect_to_host(addr)?;
        socket.set_blocking(false)?;
        Ok(socket)
    }

    /// Per-argument size limit applied when encoding outgoing messages.
    pub fn set_max_value_size(&mut self, max_value_size: usize) {
        self.max_value_size = max_value_size;
    }
}

impl DebuggerPeer for TcpDebuggerPeer {
    fn poll(&mut self) -> Result<()> {
        self.stream.poll()
    }

    fn has_message(&self) -> bool {
        self.stream.available_packet_count() > 0
    }

    fn get_message(&mut self) -> Result<Message> {
        let packet = self.stream.get_packet()?;
        Message::decode(&packet).map_err(|e| {
            tracing::warn!("Dropping connection after undecodable message: {}", e);
            self.stream.close();
            e
        })
    }

    fn put_message(&mut self, message: &Message) -> Result<()> {
        let encoded = message.encode(self.max_value_size)?;
        if encoded.len() > self.stream.max_packet_size() {
            return Err(DebugWireError::OutOfMemory(format!(
                "Message '{}' too big: {} bytes, limit {}",
                message.name,
                encoded.len(),
                self.stream.max_packet_size()
            )));
        }
        self.stream.put_packet(&encoded)
    }

    fn is_peer_connected(&self) -> bool {
        self.stream.is_connected()
    }

    fn max_message_size(&self) -> usize {
        self.stream.max_packet_size()
    }

    fn close(&mut self) {
        self.stream.close();
    }
}
