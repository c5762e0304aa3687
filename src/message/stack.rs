//! Stack dumps and runtime error reports.

use super::{ArgReader, WireRecord};
use crate::codec::Variant;
use crate::error::Result;

/// One script stack frame.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StackFrame {
    pub file: String,
    pub line: i32,
    pub function: String,
}

impl StackFrame {
    pub fn new(file: impl Into<String>, line: i32, function: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            line,
            function: function.into(),
        }
    }
}

/// Full call stack at a break, innermost frame first.
///
/// Wire layout: `[n, (file, line, function)*n]`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScriptStackDump {
    pub frames: Vec<StackFrame>,
}

impl WireRecord for ScriptStackDump {
    const LABEL: &'static str = "stack_dump";

    fn write_args(&self, out: &mut Vec<Variant>) {
        out.push(Variant::Int(self.frames.len() as i64));
        for frame in &self.frames {
            out.push(frame.file.as_str().into());
            out.push(frame.line.into());
            out.push(frame.function.as_str().into());
        }
    }

    fn read_args(reader: &mut ArgReader<'_>) -> Result<Self> {
        reader.require(1)?;
        let count = reader.count()?;
        reader.require_items(count, 3)?;

        let mut frames = Vec::with_capacity(count);
        for _ in 0..count {
            frames.push(StackFrame {
                file: reader.string()?,
                line: reader.i32()?,
                function: reader.string()?,
            });
        }
        Ok(Self { frames })
    }
}

/// A runtime error or warning raised in the debuggee.
///
/// Wire layout: `[hr, min, sec, msec, source_file, source_func, source_line,
/// error, error_descr, warning, stack_n, (file, func, line)*stack_n]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputError {
    pub hr: i32,
    pub min: i32,
    pub sec: i32,
    pub msec: i32,
    pub source_file: String,
    pub source_func: String,
    pub source_line: i32,
    pub error: String,
    pub error_descr: String,
    pub warning: bool,
    pub callstack: Vec<StackFrame>,
}

impl Default for OutputError {
    fn default() -> Self {
        Self {
            hr: -1,
            min: -1,
            sec: -1,
            msec: -1,
            source_file: String::new(),
            source_func: String::new(),
            source_line: -1,
            error: String::new(),
            error_descr: String::new(),
            warning: false,
            callstack: Vec::new(),
        }
    }
}

impl OutputError {
    /// Fixed fields before the call stack entries.
    const HEADER_LEN: usize = 11;

    /// Title shown for the error: the description if set, else the raw error.
    pub fn title(&self) -> &str {
        if self.error_descr.is_empty() {
            &self.error
        } else {
            &self.error_descr
        }
    }

    /// `h:mm:ss:mmmm` timestamp.
    pub fn timestamp(&self) -> String {
        format!("{}:{:02}:{:02}:{:04}", self.hr, self.min, self.sec, self.msec)
    }
}

impl WireRecord for OutputError {
    const LABEL: &'static str = "error";

    fn write_args(&self, out: &mut Vec<Variant>) {
        out.push(self.hr.into());
        out.push(self.min.into());
        out.push(self.sec.into());
        out.push(self.msec.into());
        out.push(self.source_file.as_str().into());
        out.push(self.source_func.as_str().into());
        out.push(self.source_line.into());
        out.push(self.error.as_str().into());
        out.push(self.error_descr.as_str().into());
        out.push(self.warning.into());
        out.push(Variant::Int(self.callstack.len() as i64));
        for frame in &self.callstack {
            out.push(frame.file.as_str().into());
            out.push(frame.function.as_str().into());
            out.push(frame.line.into());
        }
    }

    fn read_args(reader: &mut ArgReader<'_>) -> Result<Self> {
        reader.require(Self::HEADER_LEN)?;
        let hr = reader.i32()?;
        let min = reader.i32()?;
        let sec = reader.i32()?;
        let msec = reader.i32()?;
        let source_file = reader.string()?;
        let source_func = reader.string()?;
        let source_line = reader.i32()?;
        let error = reader.string()?;
        let error_descr = reader.string()?;
        let warning = reader.bool()?;

        let stack_size = reader.count()?;
        reader.require_items(stack_size, 3)?;
        let mut callstack = Vec::with_capacity(stack_size);
        for _ in 0..stack_size {
            let file = reader.string()?;
            let function = reader.string()?;
            let line = reader.i32()?;
            callstack.push(StackFrame {
                file,
                line,
                function,
            });
        }

        Ok(Self {
            hr,
            min,
            sec,
            msec,
            source_file,
            source_func,
            source_line,
            error,
            error_descr,
            warning,
            callstack,
        })
    }
}
