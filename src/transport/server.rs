//! Controller-side TCP server.
//!
//! An accept task owns the `tokio` listener and hands accepted streams over
//! an mpsc channel. The session side picks them up without blocking through
//! [`DebuggerServer::take_connection`] and drives them with the same
//! non-blocking peer used by the debuggee.
//!
//! # Example
//!
//! ```ignore
//! let mut server = DebuggerServer::new(StreamLimits::default());
//! server.start("127.0.0.1:6007".parse()?).await?;
//!
//! loop {
//!     if let Some(peer) = server.take_connection() {
//!         let session = DebuggerSession::new(Box::new(peer));
//!         // ...
//!     }
//!     tokio::time::sleep(Duration::from_millis(10)).await;
//! }
//! ```

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::peer::TcpDebuggerPeer;
use super::socket::StdSocket;
use super::stream::StreamLimits;
use crate::error::{DebugWireError, Result};
use crate::protocol::DEFAULT_MAX_VALUE_SIZE;

/// Accepted connections waiting to be taken.
const PENDING_CONNECTIONS: usize = 16;

type Incoming = (std::net::TcpStream, SocketAddr);

/// Listens for debuggee connections.
pub struct DebuggerServer {
    limits: StreamLimits,
    max_value_size: usize,
    local_addr: Option<SocketAddr>,
    incoming: Option<mpsc::Receiver<Incoming>>,
    accept_task: Option<JoinHandle<()>>,
}

impl DebuggerServer {
    pub fn new(limits: StreamLimits) -> Self {
        Self {
            limits,
            max_value_size: DEFAULT_MAX_VALUE_SIZE,
            local_addr: None,
            incoming: None,
            accept_task: None,
        }
    }

    /// Per-argument size limit for peers handed out by this server.
    pub fn with_max_value_size(mut self, max_value_size: usize) -> Self {
        self.max_value_size = max_value_size;
        self
    }

    /// Bind `addr` and start accepting in the background.
    ///
    /// Fails `AlreadyInUse` if the server is already running.
    pub async fn start(&mut self, addr: SocketAddr) -> Result<()> {
        if self.is_active() {
            return Err(DebugWireError::AlreadyInUse);
        }

        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Debugger server failed to bind {}: {}", addr, e);
            DebugWireError::from(e)
        })?;
        let local_addr = listener.local_addr()?;
        let (tx, rx) = mpsc::channel(PENDING_CONNECTIONS);

        self.accept_task = Some(tokio::spawn(accept_loop(listener, tx)));
        self.incoming = Some(rx);
        self.local_addr = Some(local_addr);

        tracing::debug!("Debugger server listening on {}", local_addr);
        Ok(())
    }

    /// Next accepted connection, if any. Never waits.
    pub fn take_connection(&mut self) -> Option<TcpDebuggerPeer> {
        let (stream, remote) = self.incoming.as_mut()?.try_recv().ok()?;

        let socket = match StdSocket::from_stream(stream) {
            Ok(socket) => socket,
            Err(e) => {
                tracing::warn!("Discarding connection from {}: {}", remote, e);
                return None;
            }
        };

        tracing::debug!("Debug session connected from {}", remote);
        let mut peer = TcpDebuggerPeer::from_socket(Box::new(socket), self.limits);
        peer.set_max_value_size(self.max_value_size);
        Some(peer)
    }

    /// Stop accepting and drop pending connections. Idempotent.
    pub fn stop(&mut self) {
        if let Some(task) = self.accept_task.take() {
            task.abort();
            tracing::debug!("Debugger server stopped");
        }
        self.incoming = None;
        self.local_addr = None;
    }

    pub fn is_active(&self) -> bool {
        self.accept_task
            .as_ref()
            .map_or(false, |task| !task.is_finished())
    }

    /// Bound address while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

impl Default for DebuggerServer {
    fn default() -> Self {
        Self::new(StreamLimits::default())
    }
}

impl Drop for DebuggerServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn accept_loop(listener: TcpListener, tx: mpsc::Sender<Incoming>) {
    loop {
        let (stream, remote) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::error!("Debugger server accept failed: {}", e);
                return;
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            tracing::warn!("Could not disable Nagle for {}: {}", remote, e);
        }

        let stream = match stream.into_std() {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!("Dropping connection from {}: {}", remote, e);
                continue;
            }
        };

        if tx.send((stream, remote)).await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use crate::protocol::build_frame;
    use crate::transport::DebuggerPeer;
    use std::io::Write;
    use std::time::Duration;

    async fn wait_for_connection(server: &mut DebuggerServer) -> TcpDebuggerPeer {
        for _ in 0..200 {
            if let Some(peer) = server.take_connection() {
                return peer;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("no connection accepted");
    }

    #[tokio::test]
    async fn test_take_connection_without_clients() {
        let mut server = DebuggerServer::default();
        assert!(server.take_connection().is_none());

        server.start("127.0.0.1:0".parse().unwrap()).await.unwrap();
        assert!(server.is_active());
        assert!(server.take_connection().is_none());
    }

    #[tokio::test]
    async fn test_accepted_peer_receives_messages() {
        let mut server = DebuggerServer::default();
        server.start("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = server.local_addr().unwrap();

        let mut client = std::net::TcpStream::connect(addr).unwrap();
        let mut peer = wait_for_connection(&mut server).await;

        let message = Message::new("output", vec!["hello".into()]);
        let body = message.encode(DEFAULT_MAX_VALUE_SIZE).unwrap();
        client.write_all(&build_frame(&body).unwrap()).unwrap();

        for _ in 0..200 {
            peer.poll().unwrap();
            if peer.has_message() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(peer.get_message().unwrap(), message);
    }

    #[tokio::test]
    async fn test_start_twice_is_in_use() {
        let mut server = DebuggerServer::default();
        server.start("127.0.0.1:0".parse().unwrap()).await.unwrap();
        assert!(matches!(
            server.start("127.0.0.1:0".parse().unwrap()).await,
            Err(DebugWireError::AlreadyInUse)
        ));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let mut server = DebuggerServer::default();
        server.start("127.0.0.1:0".parse().unwrap()).await.unwrap();

        server.stop();
        server.stop();
        assert!(!server.is_active());
        assert!(server.local_addr().is_none());
        assert!(server.take_connection().is_none());
    }
}
