//! Error types for debugwire.

use thiserror::Error;

/// Main error type for all debugwire operations.
#[derive(Debug, Error)]
pub enum DebugWireError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error (configuration files only).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Operation would block. Retry on the next poll.
    #[error("Resource busy")]
    Busy,

    /// No data or packet is ready.
    #[error("Unavailable")]
    Unavailable,

    /// Ring buffer write larger than the free space.
    #[error("Out of space: requested {requested}, available {available}")]
    OutOfSpace { requested: usize, available: usize },

    /// Queue capacity exceeded.
    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    /// Malformed call (bad size, bad address, ...).
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Decode validation failed. Always fatal to the message.
    #[error("{0}")]
    Malformed(String),

    /// Command issued in the wrong session state.
    #[error("Failed precondition: {0}")]
    FailedPrecondition(String),

    /// Name already present in a registry table.
    #[error("Already registered: {0}")]
    AlreadyRegistered(String),

    /// Name missing from a registry table.
    #[error("Not registered: {0}")]
    NotRegistered(String),

    /// Peer or socket used before being set up.
    #[error("Unconfigured: {0}")]
    Unconfigured(String),

    /// Socket is already open or listening.
    #[error("Already in use")]
    AlreadyInUse,

    /// Socket is already connected.
    #[error("Already connected")]
    AlreadyConnected,

    /// Underlying transport broke.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Connection closed by the remote end.
    #[error("Connection closed")]
    ConnectionClosed,
}

impl DebugWireError {
    /// Build a `Malformed` error for a message that is shorter than expected.
    pub fn too_short(what: &str, expected: usize, actual: usize) -> Self {
        DebugWireError::Malformed(format!(
            "Malformed {} message, message too short. Expected size: {}, actual size: {}",
            what, expected, actual
        ))
    }

    /// Build a `Malformed` error for a message with trailing values.
    pub fn too_long(what: &str, left: usize) -> Self {
        DebugWireError::Malformed(format!(
            "Malformed {} message, message too long. Size left after parsing: {}",
            what, left
        ))
    }

    /// Whether this error must tear down the session that produced it.
    ///
    /// `Busy` and `Unavailable` are flow control. Everything coming out of
    /// decoding or the transport itself ends the connection.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            DebugWireError::Io(_)
                | DebugWireError::MsgPackDecode(_)
                | DebugWireError::Malformed(_)
                | DebugWireError::OutOfMemory(_)
                | DebugWireError::Connection(_)
                | DebugWireError::ConnectionClosed
        )
    }
}

/// Result type alias using DebugWireError.
pub type Result<T> = std::result::Result<T, DebugWireError>;
