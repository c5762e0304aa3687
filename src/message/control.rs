//! Arguments of the session control messages.

use super::{ArgReader, WireRecord};
use crate::codec::Variant;
use crate::error::Result;

/// `debug_enter [can_continue, reason]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugEnter {
    pub can_continue: bool,
    pub reason: String,
}

impl WireRecord for DebugEnter {
    const LABEL: &'static str = "debug_enter";

    fn write_args(&self, out: &mut Vec<Variant>) {
        out.push(self.can_continue.into());
        out.push(self.reason.as_str().into());
    }

    fn read_args(reader: &mut ArgReader<'_>) -> Result<Self> {
        reader.require(2)?;
        Ok(Self {
            can_continue: reader.bool()?,
            reason: reader.string()?,
        })
    }
}

/// `breakpoint [source, line, enabled]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakpointCommand {
    pub source: String,
    pub line: i32,
    pub enabled: bool,
}

impl WireRecord for BreakpointCommand {
    const LABEL: &'static str = "breakpoint";

    fn write_args(&self, out: &mut Vec<Variant>) {
        out.push(self.source.as_str().into());
        out.push(self.line.into());
        out.push(self.enabled.into());
    }

    fn read_args(reader: &mut ArgReader<'_>) -> Result<Self> {
        reader.require(3)?;
        Ok(Self {
            source: reader.string()?,
            line: reader.i32()?,
            enabled: reader.bool()?,
        })
    }
}

/// `start_profiling [max_functions]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartProfiling {
    pub max_functions: i64,
}

impl StartProfiling {
    pub const MIN_FUNCTIONS: i64 = 16;
    pub const MAX_FUNCTIONS: i64 = 512;

    /// Request with `max_functions` clamped to the accepted range.
    pub fn clamped(max_functions: i64) -> Self {
        Self {
            max_functions: max_functions.clamp(Self::MIN_FUNCTIONS, Self::MAX_FUNCTIONS),
        }
    }
}

impl WireRecord for StartProfiling {
    const LABEL: &'static str = "start_profiling";

    fn write_args(&self, out: &mut Vec<Variant>) {
        out.push(self.max_functions.into());
    }

    fn read_args(reader: &mut ArgReader<'_>) -> Result<Self> {
        reader.require(1)?;
        Ok(Self {
            max_functions: reader.int()?,
        })
    }
}

/// Variables visible in one stack frame.
///
/// Wire layout: `[n, (name, value)*n]`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StackFrameVars {
    pub variables: Vec<(String, Variant)>,
}

impl WireRecord for StackFrameVars {
    const LABEL: &'static str = "stack_frame_vars";

    fn write_args(&self, out: &mut Vec<Variant>) {
        out.push(Variant::Int(self.variables.len() as i64));
        for (name, value) in &self.variables {
            out.push(name.as_str().into());
            out.push(value.clone());
        }
    }

    fn read_args(reader: &mut ArgReader<'_>) -> Result<Self> {
        reader.require(1)?;
        let count = reader.count()?;
        reader.require_items(count, 2)?;

        let mut variables = Vec::with_capacity(count);
        for _ in 0..count {
            variables.push((reader.string()?, reader.value()?));
        }
        Ok(Self { variables })
    }
}
