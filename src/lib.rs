//! # debugwire
//!
//! Remote debugging protocol engine.
//!
//! A running program (the debuggee) and a debugger front-end exchange
//! `[name, args]` messages over one connection. This crate provides both
//! ends and everything between them.
//!
//! ## Architecture
//!
//! - **Buffers** ([`protocol`]): ring buffers and packet queues with fixed
//!   capacity, plus 4-byte little-endian length framing for streams
//! - **Transport** ([`transport`]): non-blocking sockets, UDP and stream
//!   packet peers, message peers and the accepting server
//! - **Messages** ([`message`]): typed records (stack dumps, errors,
//!   profiler frames) flattened into argument lists, MessagePack on the wire
//! - **Session** ([`session`]): breakpoints, stepping, the controller state
//!   machine and live edit handles
//! - **Registry** ([`registry`]): profilers, message captures and URI schemes
//! - **Engine** ([`EngineDebugger`]): the debuggee side, tying it together
//!
//! ## Example
//!
//! ```ignore
//! use debugwire::{DebuggerServer, DebuggerSession, SessionEvent};
//!
//! #[tokio::main]
//! async fn main() -> debugwire::Result<()> {
//!     let mut server = DebuggerServer::default();
//!     server.start("127.0.0.1:6007".parse().unwrap()).await?;
//!
//!     let peer = loop {
//!         if let Some(peer) = server.take_connection() {
//!             break peer;
//!         }
//!         tokio::time::sleep(std::time::Duration::from_millis(50)).await;
//!     };
//!
//!     let mut session = DebuggerSession::new();
//!     session.start(Box::new(peer));
//!     session.set_breakpoint("res://main.gd", 12, true)?;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod message;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod transport;

mod engine;

pub use config::DebugConfig;
pub use engine::{EngineDebugger, EngineDebuggerBuilder, ScriptHost, TCP_SCHEME};
pub use error::{DebugWireError, Result};
pub use message::Message;
pub use registry::DebuggerRegistry;
pub use session::{DebuggerSession, SessionEvent, SessionState};
pub use transport::{DebuggerPeer, DebuggerServer, MemoryPeer, TcpDebuggerPeer};
