//! Socket abstraction used by the packet peers.
//!
//! [`NetSocket`] is the syscall surface the peers depend on. Once configured,
//! every operation is non-blocking and reports would-block as
//! [`DebugWireError::Busy`]. [`StdSocket`] implements it over `std::net`.
//!
//! # Example
//!
//! ```no_run
//! use debugwire::transport::{IpFamily, NetSocket, SocketType, StdSocket};
//!
//! let mut socket = StdSocket::new();
//! socket.open(SocketType::Udp, IpFamily::V4).unwrap();
//! socket.set_blocking(false).unwrap();
//! socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
//! ```

use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::time::{Duration, Instant};

use crate::error::{DebugWireError, Result};

/// Transport protocol of a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketType {
    Tcp,
    Udp,
}

/// Address family requested at open time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpFamily {
    V4,
    V6,
    /// Decided by the first bind or connect address.
    Any,
}

impl IpFamily {
    fn accepts(self, addr: &SocketAddr) -> bool {
        match self {
            IpFamily::V4 => addr.is_ipv4(),
            IpFamily::V6 => addr.is_ipv6(),
            IpFamily::Any => true,
        }
    }
}

/// What `poll` waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollDirection {
    In,
    Out,
    InOut,
}

/// Outcome of a successful `poll`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    Ready,
    /// Timed out without the socket becoming ready.
    Busy,
}

/// Non-blocking socket operations.
///
/// Errors collapse to `Busy` (would block, retry on the next poll),
/// `AlreadyConnected`, and everything else (`Io` and friends).
pub trait NetSocket: Send {
    fn open(&mut self, socket_type: SocketType, family: IpFamily) -> Result<()>;
    fn bind(&mut self, addr: SocketAddr) -> Result<()>;
    fn listen(&mut self, backlog: u32) -> Result<()>;
    fn connect_to_host(&mut self, addr: SocketAddr) -> Result<()>;
    fn accept(&mut self) -> Result<(Box<dyn NetSocket>, SocketAddr)>;

    fn send(&mut self, buf: &[u8]) -> Result<usize>;
    fn recv(&mut self, buf: &mut [u8]) -> Result<usize>;
    fn sendto(&mut self, buf: &[u8], addr: SocketAddr) -> Result<usize>;
    fn recvfrom(&mut self, buf: &mut [u8]) -> Result<(usize, SocketAddr)>;

    /// Wait for readiness. `timeout_ms`: `-1` blocks, `0` probes, positive
    /// values bound the wait.
    fn poll(&mut self, direction: PollDirection, timeout_ms: i32) -> Result<PollStatus>;

    /// Release the OS socket. Safe to call repeatedly.
    fn close(&mut self);
    fn is_open(&self) -> bool;

    fn set_blocking(&mut self, enabled: bool) -> Result<()>;
    fn set_broadcast(&mut self, enabled: bool) -> Result<()>;
    fn set_reuse_address(&mut self, enabled: bool) -> Result<()>;
    fn set_tcp_nodelay(&mut self, enabled: bool) -> Result<()>;
}

/// Map an I/O error onto the socket error taxonomy.
pub fn map_io_error(err: io::Error) -> DebugWireError {
    match err.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => DebugWireError::Busy,
        io::ErrorKind::AddrInUse => DebugWireError::AlreadyInUse,
        _ => DebugWireError::Io(err),
    }
}

// ============================================================================
// std::net implementation
// ============================================================================

/// Poll interval used where `std::net` offers no readiness wait.
const LISTEN_POLL_INTERVAL: Duration = Duration::from_millis(1);

enum Handle {
    Closed,
    /// Opened but no OS socket yet: `std::net` creates it at bind/connect.
    Pending {
        socket_type: SocketType,
        family: IpFamily,
        bind_addr: Option<SocketAddr>,
    },
    Udp(UdpSocket),
    Listener {
        listener: TcpListener,
        /// Connection picked up by `poll`, handed out by the next `accept`.
        ready: Option<(TcpStream, SocketAddr)>,
    },
    Stream(TcpStream),
}

/// [`NetSocket`] over `std::net`.
///
/// `std::net` creates the OS socket at bind or connect time, so `open` only
/// records the requested type and family. Options set before that are
/// applied once the socket exists. Connecting is synchronous.
pub struct StdSocket {
    handle: Handle,
    blocking: bool,
    broadcast: bool,
    nodelay: bool,
}

impl StdSocket {
    pub fn new() -> Self {
        Self {
            handle: Handle::Closed,
            blocking: true,
            broadcast: false,
            nodelay: false,
        }
    }

    /// Wrap an already connected stream.
    pub fn from_stream(stream: TcpStream) -> Result<Self> {
        let mut socket = Self::new();
        socket.blocking = false;
        socket.attach_stream(stream)?;
        Ok(socket)
    }

    /// Local address of the OS socket, once one exists.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        let addr = match &self.handle {
            Handle::Udp(socket) => socket.local_addr()?,
            Handle::Listener { listener, .. } => listener.local_addr()?,
            Handle::Stream(stream) => stream.local_addr()?,
            Handle::Pending { .. } | Handle::Closed => return Err(Self::unconfigured("local_addr")),
        };
        Ok(addr)
    }

    fn attach_stream(&mut self, stream: TcpStream) -> Result<()> {
        stream.set_nonblocking(!self.blocking)?;
        if self.nodelay {
            stream.set_nodelay(true)?;
        }
        self.handle = Handle::Stream(stream);
        Ok(())
    }

    fn unconfigured(what: &str) -> DebugWireError {
        DebugWireError::Unconfigured(format!("Socket is not ready for {}", what))
    }

    /// Timeout as `std` read-timeout semantics. `None` for a probe.
    fn wait_timeout(timeout_ms: i32) -> Option<Option<Duration>> {
        match timeout_ms {
            0 => None,
            t if t < 0 => Some(None),
            t => Some(Some(Duration::from_millis(t as u64))),
        }
    }

    fn poll_stream(stream: &TcpStream, blocking: bool, timeout_ms: i32) -> Result<PollStatus> {
        let mut probe = [0u8; 1];
        let result = match Self::wait_timeout(timeout_ms) {
            None => {
                stream.set_nonblocking(true)?;
                let result = stream.peek(&mut probe);
                stream.set_nonblocking(!blocking)?;
                result
            }
            Some(timeout) => {
                stream.set_nonblocking(false)?;
                stream.set_read_timeout(timeout)?;
                let result = stream.peek(&mut probe);
                stream.set_read_timeout(None)?;
                stream.set_nonblocking(!blocking)?;
                result
            }
        };
        Self::readiness(result)
    }

    fn poll_udp(socket: &UdpSocket, blocking: bool, timeout_ms: i32) -> Result<PollStatus> {
        let mut probe = [0u8; 1];
        let result = match Self::wait_timeout(timeout_ms) {
            None => {
                socket.set_nonblocking(true)?;
                let result = socket.peek_from(&mut probe).map(|(n, _)| n);
                socket.set_nonblocking(!blocking)?;
                result
            }
            Some(timeout) => {
                socket.set_nonblocking(false)?;
                socket.set_read_timeout(timeout)?;
                let result = socket.peek_from(&mut probe).map(|(n, _)| n);
                socket.set_read_timeout(None)?;
                socket.set_nonblocking(!blocking)?;
                result
            }
        };
        Self::readiness(result)
    }

    fn readiness(result: io::Result<usize>) -> Result<PollStatus> {
        match result {
            // A zero-length peek means the remote closed; recv reports it.
            Ok(_) => Ok(PollStatus::Ready),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => {
                Ok(PollStatus::Busy)
            }
            Err(e) => Err(DebugWireError::Io(e)),
        }
    }

    fn poll_listener(
        listener: &TcpListener,
        ready: &mut Option<(TcpStream, SocketAddr)>,
        timeout_ms: i32,
    ) -> Result<PollStatus> {
        if ready.is_some() {
            return Ok(PollStatus::Ready);
        }
        let deadline = match timeout_ms {
            t if t < 0 => None,
            t => Some(Instant::now() + Duration::from_millis(t as u64)),
        };
        loop {
            match listener.accept() {
                Ok(conn) => {
                    *ready = Some(conn);
                    return Ok(PollStatus::Ready);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(DebugWireError::Io(e)),
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Ok(PollStatus::Busy);
            }
            std::thread::sleep(LISTEN_POLL_INTERVAL);
        }
    }
}

impl Default for StdSocket {
    fn default() -> Self {
        Self::new()
    }
}

impl NetSocket for StdSocket {
    fn open(&mut self, socket_type: SocketType, family: IpFamily) -> Result<()> {
        if self.is_open() {
            return Err(DebugWireError::AlreadyInUse);
        }
        self.handle = Handle::Pending {
            socket_type,
            family,
            bind_addr: None,
        };
        Ok(())
    }

    fn bind(&mut self, addr: SocketAddr) -> Result<()> {
        let (socket_type, family) = match &self.handle {
            Handle::Pending {
                socket_type,
                family,
                ..
            } => (*socket_type, *family),
            _ => return Err(Self::unconfigured("bind")),
        };
        if !family.accepts(&addr) {
            return Err(DebugWireError::InvalidParameter(format!(
                "Address {} does not match socket family {:?}",
                addr, family
            )));
        }

        match socket_type {
            SocketType::Udp => {
                let socket = UdpSocket::bind(addr).map_err(map_io_error)?;
                socket.set_nonblocking(!self.blocking)?;
                socket.set_broadcast(self.broadcast)?;
                self.handle = Handle::Udp(socket);
            }
            // TCP sockets are created by listen or connect.
            SocketType::Tcp => {
                if let Handle::Pending { bind_addr, .. } = &mut self.handle {
                    *bind_addr = Some(addr);
                }
            }
        }
        Ok(())
    }

    fn listen(&mut self, _backlog: u32) -> Result<()> {
        let Handle::Pending {
            socket_type: SocketType::Tcp,
            bind_addr: Some(addr),
            ..
        } = self.handle
        else {
            return Err(Self::unconfigured("listen"));
        };

        let listener = TcpListener::bind(addr).map_err(map_io_error)?;
        listener.set_nonblocking(true)?;
        self.handle = Handle::Listener {
            listener,
            ready: None,
        };
        Ok(())
    }

    fn connect_to_host(&mut self, addr: SocketAddr) -> Result<()> {
        let (socket_type, family) = match &self.handle {
            Handle::Stream(_) => return Err(DebugWireError::AlreadyConnected),
            Handle::Udp(socket) => return socket.connect(addr).map_err(map_io_error),
            Handle::Pending {
                socket_type,
                family,
                ..
            } => (*socket_type, *family),
            Handle::Closed | Handle::Listener { .. } => return Err(Self::unconfigured("connect")),
        };
        if !family.accepts(&addr) {
            return Err(DebugWireError::InvalidParameter(format!(
                "Address {} does not match socket family {:?}",
                addr, family
            )));
        }

        match socket_type {
            SocketType::Udp => {
                let local = if addr.is_ipv6() {
                    SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
                } else {
                    SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
                };
                self.bind(local)?;
                self.connect_to_host(addr)
            }
            SocketType::Tcp => {
                let stream = TcpStream::connect(addr).map_err(map_io_error)?;
                self.attach_stream(stream)
            }
        }
    }

    fn accept(&mut self) -> Result<(Box<dyn NetSocket>, SocketAddr)> {
        let Handle::Listener { listener, ready } = &mut self.handle else {
            return Err(Self::unconfigured("accept"));
        };
        let (stream, addr) = match ready.take() {
            Some(conn) => conn,
            None => listener.accept().map_err(map_io_error)?,
        };

        let mut socket = StdSocket::new();
        socket.blocking = false;
        socket.nodelay = self.nodelay;
        socket.attach_stream(stream)?;
        Ok((Box::new(socket), addr))
    }

    fn send(&mut self, buf: &[u8]) -> Result<usize> {
        match &mut self.handle {
            Handle::Stream(stream) => stream.write(buf).map_err(map_io_error),
            Handle::Udp(socket) => socket.send(buf).map_err(map_io_error),
            _ => Err(Self::unconfigured("send")),
        }
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        match &mut self.handle {
            Handle::Stream(stream) => stream.read(buf).map_err(map_io_error),
            Handle::Udp(socket) => socket.recv(buf).map_err(map_io_error),
            _ => Err(Self::unconfigured("recv")),
        }
    }

    fn sendto(&mut self, buf: &[u8], addr: SocketAddr) -> Result<usize> {
        match &self.handle {
            Handle::Udp(socket) => socket.send_to(buf, addr).map_err(map_io_error),
            _ => Err(Self::unconfigured("sendto")),
        }
    }

    fn recvfrom(&mut self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        match &self.handle {
            Handle::Udp(socket) => socket.recv_from(buf).map_err(map_io_error),
            _ => Err(Self::unconfigured("recvfrom")),
        }
    }

    fn poll(&mut self, direction: PollDirection, timeout_ms: i32) -> Result<PollStatus> {
        // std::net has no writability wait; sends report Busy instead.
        if direction == PollDirection::Out {
            return match self.handle {
                Handle::Udp(_) | Handle::Stream(_) => Ok(PollStatus::Ready),
                _ => Err(Self::unconfigured("poll")),
            };
        }

        match &mut self.handle {
            Handle::Stream(stream) => Self::poll_stream(stream, self.blocking, timeout_ms),
            Handle::Udp(socket) => Self::poll_udp(socket, self.blocking, timeout_ms),
            Handle::Listener { listener, ready } => Self::poll_listener(listener, ready, timeout_ms),
            _ => Err(Self::unconfigured("poll")),
        }
    }

    fn close(&mut self) {
        if let Handle::Stream(stream) = &self.handle {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
        self.handle = Handle::Closed;
    }

    fn is_open(&self) -> bool {
        !matches!(self.handle, Handle::Closed)
    }

    fn set_blocking(&mut self, enabled: bool) -> Result<()> {
        self.blocking = enabled;
        match &self.handle {
            Handle::Stream(stream) => stream.set_nonblocking(!enabled)?,
            Handle::Udp(socket) => socket.set_nonblocking(!enabled)?,
            _ => {}
        }
        Ok(())
    }

    fn set_broadcast(&mut self, enabled: bool) -> Result<()> {
        self.broadcast = enabled;
        if let Handle::Udp(socket) = &self.handle {
            socket.set_broadcast(enabled)?;
        }
        Ok(())
    }

    /// Only `true` is accepted: std::net enables SO_REUSEADDR on Unix
    /// listeners and offers no way to turn it off.
    fn set_reuse_address(&mut self, enabled: bool) -> Result<()> {
        if !enabled {
            return Err(DebugWireError::InvalidParameter(
                "Disabling address reuse is not supported".to_string(),
            ));
        }
        tracing::debug!("Address reuse left to the platform default");
        Ok(())
    }

    fn set_tcp_nodelay(&mut self, enabled: bool) -> Result<()> {
        self.nodelay = enabled;
        if let Handle::Stream(stream) = &self.handle {
            stream.set_nodelay(enabled)?;
        }
        Ok(())
    }
}
