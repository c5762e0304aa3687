//! Message module - envelope and typed debugger records.
//!
//! Every message on the wire is the two-element array `[name, args]`.
//! Typed records flatten into `args` as an ordered value sequence: a count
//! first for every variable-length part, then that many fixed-shape tuples.
//! Field order is the wire contract.
//!
//! # Example
//!
//! ```
//! use debugwire::message::{Message, ScriptStackDump, StackFrame, WireRecord};
//!
//! let dump = ScriptStackDump {
//!     frames: vec![StackFrame::new("res://main.gd", 12, "_ready")],
//! };
//! let message = Message::from_record("stack_dump", &dump);
//! let bytes = message.encode(1024 * 1024).unwrap();
//!
//! let decoded = Message::decode(&bytes).unwrap();
//! assert_eq!(decoded.name, "stack_dump");
//! assert_eq!(ScriptStackDump::from_args(&decoded.args).unwrap(), dump);
//! ```

mod control;
mod profiler;
mod reader;
mod resource;
mod stack;

pub use control::{BreakpointCommand, DebugEnter, StackFrameVars, StartProfiling};
pub use profiler::{
    parse_qualified_name, qualified_name, FrameCategory, FrameFunction, NetworkNodeInfo,
    NetworkProfilerFrame, ProfilerFrame, ProfilerSignature,
};
pub use reader::ArgReader;
pub use resource::{ResourceInfo, ResourceUsage};
pub use stack::{OutputError, ScriptStackDump, StackFrame};

use crate::codec::{MsgPackCodec, Variant};
use crate::error::{DebugWireError, Result};

/// Message names exchanged between debuggee and controller.
pub mod names {
    pub const DEBUG_ENTER: &str = "debug_enter";
    pub const DEBUG_EXIT: &str = "debug_exit";
    pub const STEP: &str = "step";
    pub const NEXT: &str = "next";
    pub const CONTINUE: &str = "continue";
    pub const BREAK: &str = "break";
    pub const BREAKPOINT: &str = "breakpoint";
    pub const SET_SKIP_BREAKPOINTS: &str = "set_skip_breakpoints";
    pub const RELOAD_SCRIPTS: &str = "reload_scripts";
    pub const GET_STACK_DUMP: &str = "get_stack_dump";
    pub const STACK_DUMP: &str = "stack_dump";
    pub const GET_STACK_FRAME_VARS: &str = "get_stack_frame_vars";
    pub const STACK_FRAME_VARS: &str = "stack_frame_vars";
    pub const OUTPUT: &str = "output";
    pub const ERROR: &str = "error";
    pub const PERFORMANCE: &str = "performance";
    pub const SET_PID: &str = "set_pid";
    pub const KILL_ME: &str = "kill_me";
    pub const START_PROFILING: &str = "start_profiling";
    pub const STOP_PROFILING: &str = "stop_profiling";
    pub const START_NETWORK_PROFILING: &str = "start_network_profiling";
    pub const STOP_NETWORK_PROFILING: &str = "stop_network_profiling";
    pub const PROFILE_SIG: &str = "profile_sig";
    pub const PROFILE_FRAME: &str = "profile_frame";
    pub const PROFILE_TOTAL: &str = "profile_total";
    pub const NETWORK_PROFILE: &str = "network_profile";
    pub const NETWORK_BANDWIDTH: &str = "network_bandwidth";
    pub const REQUEST_VIDEO_MEM: &str = "request_video_mem";
    pub const VIDEO_MEM: &str = "video_mem";
    pub const LIVE_NODE_PATH: &str = "live_node_path";
    pub const LIVE_RES_PATH: &str = "live_res_path";
    pub const LIVE_SET_ROOT: &str = "live_set_root";
    pub const LIVE_CREATE_NODE: &str = "live_create_node";
    pub const LIVE_INSTANCE_NODE: &str = "live_instance_node";
    pub const LIVE_REMOVE_NODE: &str = "live_remove_node";
    pub const LIVE_REMOVE_AND_KEEP_NODE: &str = "live_remove_and_keep_node";
    pub const LIVE_RESTORE_NODE: &str = "live_restore_node";
    pub const LIVE_DUPLICATE_NODE: &str = "live_duplicate_node";
    pub const LIVE_REPARENT_NODE: &str = "live_reparent_node";
    pub const LIVE_NODE_PROP: &str = "live_node_prop";
    pub const LIVE_NODE_PROP_RES: &str = "live_node_prop_res";
    pub const LIVE_RES_PROP: &str = "live_res_prop";
    pub const LIVE_RES_PROP_RES: &str = "live_res_prop_res";
    pub const LIVE_NODE_CALL: &str = "live_node_call";
    pub const LIVE_RES_CALL: &str = "live_res_call";

    /// Prefix shared by every live edit message.
    pub const LIVE_PREFIX: &str = "live_";

    /// Prefix of the generic per-profiler toggle, `profiler:<name>`.
    pub const PROFILER_PREFIX: &str = "profiler:";
}

/// A record that flattens into an ordered argument list.
pub trait WireRecord: Sized {
    /// Name used in decode error messages.
    const LABEL: &'static str;

    /// Append this record's values to `out` in wire order.
    fn write_args(&self, out: &mut Vec<Variant>);

    /// Consume this record's values from `reader`.
    fn read_args(reader: &mut ArgReader<'_>) -> Result<Self>;

    fn to_args(&self) -> Vec<Variant> {
        let mut out = Vec::new();
        self.write_args(&mut out);
        out
    }

    /// Decode from a complete argument list. Leftover values are malformed.
    fn from_args(args: &[Variant]) -> Result<Self> {
        let mut reader = ArgReader::new(Self::LABEL, args);
        let record = Self::read_args(&mut reader)?;
        reader.finish()?;
        Ok(record)
    }
}

/// A named message with its arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub name: String,
    pub args: Vec<Variant>,
}

impl Message {
    pub fn new(name: impl Into<String>, args: Vec<Variant>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    /// Message without arguments.
    pub fn bare(name: impl Into<String>) -> Self {
        Self::new(name, Vec::new())
    }

    /// Message whose arguments are a flattened record.
    pub fn from_record<R: WireRecord>(name: impl Into<String>, record: &R) -> Self {
        Self::new(name, record.to_args())
    }

    /// Decode the arguments as a record.
    pub fn parse_args<R: WireRecord>(&self) -> Result<R> {
        R::from_args(&self.args)
    }

    /// Split `prefix:rest` names used for capture routing.
    pub fn capture_prefix(&self) -> Option<(&str, &str)> {
        self.name.split_once(':')
    }

    /// The `[name, args]` envelope.
    pub fn into_variant(self) -> Variant {
        Variant::Array(vec![Variant::String(self.name), Variant::Array(self.args)])
    }

    /// Unwrap a `[name, args]` envelope.
    ///
    /// # Errors
    ///
    /// `Malformed` unless the value is an array of exactly two elements with
    /// a string name and an array of arguments.
    pub fn from_variant(value: Variant) -> Result<Self> {
        let invalid = || DebugWireError::Malformed("Invalid message format".to_string());

        let mut parts = value.into_array().map_err(|_| invalid())?;
        if parts.len() != 2 {
            return Err(invalid());
        }
        let args = parts.pop().ok_or_else(invalid)?.into_array().map_err(|_| invalid())?;
        let name = parts.pop().ok_or_else(invalid)?.into_string().map_err(|_| invalid())?;
        Ok(Self { name, args })
    }

    /// Encode to MsgPack bytes.
    ///
    /// Any argument whose encoded form exceeds `max_value_size` bytes is
    /// replaced with `Nil` and a warning is logged.
    pub fn encode(&self, max_value_size: usize) -> Result<Vec<u8>> {
        let mut args = Vec::with_capacity(self.args.len());
        for (index, arg) in self.args.iter().enumerate() {
            let size = MsgPackCodec::encoded_len(arg)?;
            if size > max_value_size {
                tracing::warn!(
                    "Argument {} of '{}' is {} bytes, over the {} byte limit. Sending null instead",
                    index,
                    self.name,
                    size,
                    max_value_size
                );
                args.push(Variant::Nil);
            } else {
                args.push(arg.clone());
            }
        }

        let envelope = Variant::Array(vec![Variant::String(self.name.clone()), Variant::Array(args)]);
        MsgPackCodec::encode(&envelope)
    }

    /// Decode from MsgPack bytes. Any failure is `Malformed`.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let value: Variant = MsgPackCodec::decode(bytes).map_err(|e| {
            DebugWireError::Malformed(format!("Error decoding variant from peer: {}", e))
        })?;
        Self::from_variant(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_round_trip() {
        let message = Message::new("breakpoint", vec!["a.gd".into(), 4.into(), true.into()]);
        let bytes = message.encode(1024).unwrap();
        assert_eq!(Message::decode(&bytes).unwrap(), message);
    }

    #[test]
    fn test_oversized_argument_replaced_with_nil() {
        let message = Message::new(
            "output",
            vec![Variant::from("x".repeat(100)), Variant::from("small")],
        );
        let bytes = message.encode(32).unwrap();
        let decoded = Message::decode(&bytes).unwrap();

        assert_eq!(decoded.args[0], Variant::Nil);
        assert_eq!(decoded.args[1], Variant::from("small"));
    }

    #[test]
    fn test_invalid_envelopes_rejected() {
        let cases = [
            Variant::Int(1),
            Variant::Array(vec![Variant::from("only_name")]),
            Variant::Array(vec![Variant::Int(1), Variant::Array(vec![])]),
            Variant::Array(vec![Variant::from("name"), Variant::Int(1)]),
            Variant::Array(vec![
                Variant::from("name"),
                Variant::Array(vec![]),
                Variant::Nil,
            ]),
        ];
        for value in cases {
            let bytes = MsgPackCodec::encode(&value).unwrap();
            assert!(matches!(
                Message::decode(&bytes),
                Err(DebugWireError::Malformed(_))
            ));
        }
    }

    #[test]
    fn test_garbage_bytes_are_malformed() {
        assert!(matches!(
            Message::decode(&[0xc1]),
            Err(DebugWireError::Malformed(_))
        ));
    }

    #[test]
    fn test_capture_prefix() {
        let message = Message::bare("scene:inspect_object");
        assert_eq!(message.capture_prefix(), Some(("scene", "inspect_object")));
        assert_eq!(Message::bare("step").capture_prefix(), None);
    }
}
