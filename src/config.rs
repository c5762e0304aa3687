//! Debugger configuration.
//!
//! All fields have defaults, so a JSON file only needs the keys it changes:
//!
//! ```ignore
//! let config = DebugConfig::from_json_str(r#"{
//!     "uri": "tcp://127.0.0.1:6007",
//!     "breakpoints": ["res://main.gd:12", "res://player.gd:40"]
//! }"#)?;
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DebugWireError, Result};
use crate::protocol::{DEFAULT_MAX_FRAME_SIZE, DEFAULT_MAX_VALUE_SIZE, DEFAULT_PORT};
use crate::transport::{
    StreamLimits, DEFAULT_INPUT_BUFFER_SIZE, DEFAULT_MAX_PACKETS, DEFAULT_OUTPUT_BUFFER_SIZE,
};

/// Statements executed between two message pumps in `line_poll`.
pub const DEFAULT_POLL_EVERY_LINES: u32 = 2048;

/// Time budget of one controller `process()` call.
pub const DEFAULT_PROCESS_BUDGET_MS: u64 = 20;

/// Output characters forwarded per second before the rest is dropped.
pub const DEFAULT_MAX_CHARS_PER_SECOND: usize = 32768;

/// Errors forwarded per second before the rest is dropped.
pub const DEFAULT_MAX_ERRORS_PER_SECOND: usize = 400;

/// Warnings forwarded per second before the rest is dropped.
pub const DEFAULT_MAX_WARNINGS_PER_SECOND: usize = 400;

/// Separator between scheme and address in a debugger URI.
pub const SCHEME_SEPARATOR: &str = "://";

/// Settings for one debugger instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    /// Remote debugger to connect to. Empty means no remote peer.
    pub uri: String,
    pub skip_breakpoints: bool,
    /// Initial breakpoints as `path:line`.
    pub breakpoints: Vec<String>,
    /// Arguments encoding larger than this are sent as nil.
    pub max_value_size: usize,
    pub max_frame_size: u32,
    pub input_buffer_size: usize,
    pub output_buffer_size: usize,
    pub max_packets: usize,
    pub poll_every_lines: u32,
    pub process_budget_ms: u64,
    pub max_chars_per_second: usize,
    pub max_errors_per_second: usize,
    pub max_warnings_per_second: usize,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            uri: String::new(),
            skip_breakpoints: false,
            breakpoints: Vec::new(),
            max_value_size: DEFAULT_MAX_VALUE_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            input_buffer_size: DEFAULT_INPUT_BUFFER_SIZE,
            output_buffer_size: DEFAULT_OUTPUT_BUFFER_SIZE,
            max_packets: DEFAULT_MAX_PACKETS,
            poll_every_lines: DEFAULT_POLL_EVERY_LINES,
            process_budget_ms: DEFAULT_PROCESS_BUDGET_MS,
            max_chars_per_second: DEFAULT_MAX_CHARS_PER_SECOND,
            max_errors_per_second: DEFAULT_MAX_ERRORS_PER_SECOND,
            max_warnings_per_second: DEFAULT_MAX_WARNINGS_PER_SECOND,
        }
    }
}

impl DebugConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            tracing::error!("Cannot read debugger config {}: {}", path.display(), e);
            DebugWireError::from(e)
        })?;
        Self::from_json_str(&json)
    }

    /// Reject settings no peer could work with.
    pub fn validate(&self) -> Result<()> {
        if self.max_frame_size == 0 {
            return Err(DebugWireError::InvalidParameter(
                "max_frame_size must be positive".to_string(),
            ));
        }
        if self.poll_every_lines == 0 {
            return Err(DebugWireError::InvalidParameter(
                "poll_every_lines must be positive".to_string(),
            ));
        }
        if self.max_packets == 0 || self.input_buffer_size == 0 || self.output_buffer_size == 0 {
            return Err(DebugWireError::InvalidParameter(
                "buffer sizes must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Buffer sizes for stream peers.
    pub fn stream_limits(&self) -> StreamLimits {
        StreamLimits {
            max_frame_size: self.max_frame_size,
            input_buffer_size: self.input_buffer_size,
            output_buffer_size: self.output_buffer_size,
            max_packets: self.max_packets,
        }
    }
}

/// Split a debugger URI into `(scheme, host, port)`.
///
/// The scheme keeps its `://`. The port defaults to 6007 and IPv6 hosts may
/// be bracketed: `tcp://[::1]:6010`.
pub fn parse_uri(uri: &str) -> Result<(String, String, u16)> {
    let split = uri
        .find(SCHEME_SEPARATOR)
        .ok_or_else(|| DebugWireError::InvalidParameter(format!("Missing scheme in URI '{}'", uri)))?;
    let (scheme, address) = uri.split_at(split + SCHEME_SEPARATOR.len());

    let (host, port) = if let Some(bracketed) = address.strip_prefix('[') {
        let (host, rest) = bracketed.split_once(']').ok_or_else(|| {
            DebugWireError::InvalidParameter(format!("Unclosed IPv6 host in URI '{}'", uri))
        })?;
        match rest.strip_prefix(':') {
            Some(port) => (host, Some(port)),
            None if rest.is_empty() => (host, None),
            None => {
                return Err(DebugWireError::InvalidParameter(format!(
                    "Unexpected text after host in URI '{}'",
                    uri
                )))
            }
        }
    } else {
        match address.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (address, None),
        }
    };

    if host.is_empty() {
        return Err(DebugWireError::InvalidParameter(format!(
            "Missing host in URI '{}'",
            uri
        )));
    }

    let port = match port {
        Some(port) => port.parse::<u16>().map_err(|_| {
            DebugWireError::InvalidParameter(format!("Invalid port '{}' in URI '{}'", port, uri))
        })?,
        None => DEFAULT_PORT,
    };

    Ok((scheme.to_string(), host.to_string(), port))
}
