//! Transport module - sockets, packet peers and the debugger server.
//!
//! Layers, bottom up:
//! - [`NetSocket`]: non-blocking socket calls ([`StdSocket`] over `std::net`)
//! - [`PacketPeer`]: opaque packets over UDP or a length-prefixed stream
//! - [`DebuggerPeer`]: whole messages, what sessions talk to ([`TcpDebuggerPeer`],
//!   or [`MemoryPeer`] in-process)
//! - [`DebuggerServer`]: accepts debuggee connections on the controller side

mod memory;
mod peer;
mod server;
mod socket;
mod stream;
mod udp;

pub use memory::MemoryPeer;
pub use peer::{DebuggerPeer, PacketPeer, TcpDebuggerPeer};
pub use server::DebuggerServer;
pub use socket::{map_io_error, IpFamily, NetSocket, PollDirection, PollStatus, SocketType, StdSocket};
pub use stream::{
    PacketPeerStream, StreamLimits, StreamPacketInfo, StreamStatus, DEFAULT_INPUT_BUFFER_SIZE,
    DEFAULT_MAX_PACKETS, DEFAULT_OUTPUT_BUFFER_SIZE,
};
pub use udp::{PacketPeerUdp, UdpPacketInfo, DEFAULT_UDP_BUFFER_SIZE, DEFAULT_UDP_MAX_PACKETS};
