//! Controller-side debug session.
//!
//! [`DebuggerSession`] drives one debuggee connection from the debugger UI
//! side: it tracks whether the debuggee is running or stopped at a break,
//! checks that commands fit that state, and turns incoming messages into
//! [`SessionEvent`]s.
//!
//! # Example
//!
//! ```ignore
//! let mut session = DebuggerSession::new();
//! session.start(Box::new(peer));
//!
//! loop {
//!     for event in session.process()? {
//!         match event {
//!             SessionEvent::Breaked { reason, .. } => println!("stopped: {}", reason),
//!             SessionEvent::Stopped => return Ok(()),
//!             _ => {}
//!         }
//!     }
//! }
//! ```

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use super::breakpoints::BreakpointSet;
use super::live_edit::{LiveEditCommand, PathHandleCache};
use crate::codec::Variant;
use crate::config::DEFAULT_PROCESS_BUDGET_MS;
use crate::error::{DebugWireError, Result};
use crate::message::{
    names, parse_qualified_name, ArgReader, BreakpointCommand, DebugEnter, Message,
    NetworkProfilerFrame, OutputError, ProfilerFrame, ProfilerSignature, ResourceUsage,
    ScriptStackDump, StackFrameVars, StartProfiling,
};
use crate::transport::DebuggerPeer;

/// Execution state of the debuggee as seen by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Running,
    Breaked { can_continue: bool, reason: String },
}

/// A profiled function with its signature resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfiledFunction {
    /// Function name, or `SigErr <id>` for an unknown signature.
    pub name: String,
    pub script: String,
    pub line: i32,
    pub call_count: i64,
    pub self_time: f64,
    pub total_time: f64,
}

/// Something the debuggee reported, or a change of session state.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Breaked { can_continue: bool, reason: String },
    Resumed,
    StackDump(ScriptStackDump),
    StackFrameVars(StackFrameVars),
    Output(Vec<String>),
    Error(OutputError),
    Performance(Vec<f64>),
    /// `total` is set for `profile_total`, the whole-session aggregate.
    ProfileFrame {
        frame: ProfilerFrame,
        functions: Vec<ProfiledFunction>,
        total: bool,
    },
    NetworkProfile(NetworkProfilerFrame),
    NetworkBandwidth { incoming: i64, outgoing: i64 },
    VideoMem(ResourceUsage),
    Pid(i64),
    /// The debuggee asked to be terminated.
    KillRequested,
    /// Any message the session does not interpret itself.
    Message(Message),
    Stopped,
}

/// One debuggee connection, controller side.
pub struct DebuggerSession {
    peer: Option<Box<dyn DebuggerPeer>>,
    state: SessionState,
    profiling: bool,
    max_functions: i64,
    network_profiling: bool,
    skip_breakpoints: bool,
    live_debug: bool,
    breakpoints: BreakpointSet,
    stack_dump: Option<ScriptStackDump>,
    profiler_signatures: HashMap<i64, String>,
    path_cache: PathHandleCache,
    remote_pid: Option<i64>,
    error_count: usize,
    warning_count: usize,
    process_budget: Duration,
    events: VecDeque<SessionEvent>,
}

impl DebuggerSession {
    pub fn new() -> Self {
        Self {
            peer: None,
            state: SessionState::Running,
            profiling: false,
            max_functions: StartProfiling::MIN_FUNCTIONS,
            network_profiling: false,
            skip_breakpoints: false,
            live_debug: false,
            breakpoints: BreakpointSet::new(),
            stack_dump: None,
            profiler_signatures: HashMap::new(),
            path_cache: PathHandleCache::new(),
            remote_pid: None,
            error_count: 0,
            warning_count: 0,
            process_budget: Duration::from_millis(DEFAULT_PROCESS_BUDGET_MS),
            events: VecDeque::new(),
        }
    }

    /// Upper bound on the time one `process()` call spends reading messages.
    pub fn with_process_budget(mut self, budget: Duration) -> Self {
        self.process_budget = budget;
        self
    }

    /// Attach a new debuggee connection, stopping any previous one.
    ///
    /// Profilers that were on stay on: the start requests are sent again.
    pub fn start(&mut self, peer: Box<dyn DebuggerPeer>) {
        self.stop();
        self.events.clear();
        self.peer = Some(peer);
        self.error_count = 0;
        self.warning_count = 0;
        tracing::debug!("Debug session started");

        if self.profiling {
            let max_functions = self.max_functions;
            if let Err(e) = self.start_profiling(max_functions) {
                tracing::debug!("Could not resume profiling: {}", e);
            }
        }
        if self.network_profiling {
            if let Err(e) = self.start_network_profiling() {
                tracing::debug!("Could not resume network profiling: {}", e);
            }
        }
    }

    /// Drop the connection and reset per-connection state. Idempotent.
    pub fn stop(&mut self) {
        let Some(mut peer) = self.peer.take() else {
            return;
        };
        peer.close();

        self.state = SessionState::Running;
        self.stack_dump = None;
        self.remote_pid = None;
        self.profiler_signatures.clear();
        self.path_cache.clear();
        self.events.push_back(SessionEvent::Stopped);
        tracing::debug!("Debugging process stopped");
    }

    pub fn is_peer_connected(&self) -> bool {
        self.peer
            .as_ref()
            .map_or(false, |peer| peer.is_peer_connected())
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_breaked(&self) -> bool {
        matches!(self.state, SessionState::Breaked { .. })
    }

    pub fn can_continue(&self) -> bool {
        matches!(
            self.state,
            SessionState::Breaked {
                can_continue: true,
                ..
            }
        )
    }

    pub fn is_profiling(&self) -> bool {
        self.profiling
    }

    pub fn is_network_profiling(&self) -> bool {
        self.network_profiling
    }

    pub fn is_skipping_breakpoints(&self) -> bool {
        self.skip_breakpoints
    }

    pub fn breakpoints(&self) -> &BreakpointSet {
        &self.breakpoints
    }

    /// Stack of the current break, once the debuggee has sent it.
    pub fn stack_dump(&self) -> Option<&ScriptStackDump> {
        self.stack_dump.as_ref()
    }

    pub fn profiler_signature(&self, id: i64) -> Option<&str> {
        self.profiler_signatures.get(&id).map(String::as_str)
    }

    pub fn remote_pid(&self) -> Option<i64> {
        self.remote_pid
    }

    pub fn error_count(&self) -> usize {
        self.error_count
    }

    pub fn warning_count(&self) -> usize {
        self.warning_count
    }

    /// Events queued outside `process()`, such as `Stopped`.
    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        self.events.drain(..).collect()
    }

    // ========================================================================
    // Incoming
    // ========================================================================

    /// Read and apply incoming messages for up to the process budget.
    ///
    /// A message that fails to decode stops the session and the error is
    /// returned; the `Stopped` event stays queued for `drain_events`.
    pub fn process(&mut self) -> Result<Vec<SessionEvent>> {
        if let Err(e) = self.pump() {
            match e {
                DebugWireError::ConnectionClosed => self.stop(),
                e if e.is_connection_fatal() => {
                    tracing::error!("Debug session failed: {}", e);
                    self.stop();
                    return Err(e);
                }
                e => return Err(e),
            }
        }
        Ok(self.drain_events())
    }

    fn pump(&mut self) -> Result<()> {
        let Some(peer) = self.peer.as_mut() else {
            return Ok(());
        };
        peer.poll()?;

        let until = Instant::now() + self.process_budget;
        loop {
            let message = match self.peer.as_mut() {
                Some(peer) if peer.has_message() => peer.get_message()?,
                _ => break,
            };
            self.handle_message(message)?;
            if Instant::now() > until {
                return Ok(());
            }
        }

        match self.peer.as_ref() {
            Some(peer) if !peer.is_peer_connected() => Err(DebugWireError::ConnectionClosed),
            _ => Ok(()),
        }
    }

    fn handle_message(&mut self, message: Message) -> Result<()> {
        let event = match message.name.as_str() {
            names::DEBUG_ENTER => {
                let enter: DebugEnter = message.parse_args()?;
                self.put(Message::bare(names::GET_STACK_DUMP))?;
                self.state = SessionState::Breaked {
                    can_continue: enter.can_continue,
                    reason: enter.reason.clone(),
                };
                SessionEvent::Breaked {
                    can_continue: enter.can_continue,
                    reason: enter.reason,
                }
            }
            names::DEBUG_EXIT => {
                self.state = SessionState::Running;
                self.stack_dump = None;
                SessionEvent::Resumed
            }
            names::STACK_DUMP => {
                let dump: ScriptStackDump = message.parse_args()?;
                self.stack_dump = Some(dump.clone());
                SessionEvent::StackDump(dump)
            }
            names::STACK_FRAME_VARS => SessionEvent::StackFrameVars(message.parse_args()?),
            names::OUTPUT => {
                let mut reader = ArgReader::new(names::OUTPUT, &message.args);
                reader.require(1)?;
                let lines = reader
                    .rest()
                    .iter()
                    .map(Variant::to_string)
                    .collect();
                SessionEvent::Output(lines)
            }
            names::ERROR => {
                let error: OutputError = message.parse_args()?;
                if error.warning {
                    self.warning_count += 1;
                } else {
                    self.error_count += 1;
                }
                SessionEvent::Error(error)
            }
            names::PERFORMANCE => {
                let mut reader = ArgReader::new(names::PERFORMANCE, &message.args);
                let mut values = Vec::with_capacity(message.args.len());
                while reader.remaining() > 0 {
                    values.push(reader.float()?);
                }
                SessionEvent::Performance(values)
            }
            names::PROFILE_SIG => {
                let signature: ProfilerSignature = message.parse_args()?;
                self.profiler_signatures.insert(signature.id, signature.name);
                return Ok(());
            }
            names::PROFILE_FRAME | names::PROFILE_TOTAL => {
                let frame: ProfilerFrame = message.parse_args()?;
                let functions = self.resolve_functions(&frame);
                SessionEvent::ProfileFrame {
                    frame,
                    functions,
                    total: message.name == names::PROFILE_TOTAL,
                }
            }
            names::NETWORK_PROFILE => SessionEvent::NetworkProfile(message.parse_args()?),
            names::NETWORK_BANDWIDTH => {
                let mut reader = ArgReader::new(names::NETWORK_BANDWIDTH, &message.args);
                reader.require(2)?;
                SessionEvent::NetworkBandwidth {
                    incoming: reader.int()?,
                    outgoing: reader.int()?,
                }
            }
            names::VIDEO_MEM => SessionEvent::VideoMem(message.parse_args()?),
            names::SET_PID => {
                let mut reader = ArgReader::new(names::SET_PID, &message.args);
                reader.require(1)?;
                let pid = reader.int()?;
                self.remote_pid = Some(pid);
                SessionEvent::Pid(pid)
            }
            names::KILL_ME => {
                self.events.push_back(SessionEvent::KillRequested);
                self.stop();
                return Ok(());
            }
            _ => SessionEvent::Message(message),
        };
        self.events.push_back(event);
        Ok(())
    }

    fn resolve_functions(&self, frame: &ProfilerFrame) -> Vec<ProfiledFunction> {
        frame
            .functions
            .iter()
            .map(|function| {
                let resolved = self
                    .profiler_signatures
                    .get(&function.sig_id)
                    .and_then(|name| parse_qualified_name(name));
                let (script, line, name) = resolved
                    .unwrap_or_else(|| (String::new(), 0, format!("SigErr {}", function.sig_id)));
                ProfiledFunction {
                    name,
                    script,
                    line,
                    call_count: function.call_count,
                    self_time: function.self_time,
                    total_time: function.total_time,
                }
            })
            .collect()
    }

    // ========================================================================
    // Outgoing
    // ========================================================================

    /// Send a message as is.
    pub fn send_message(&mut self, message: Message) -> Result<()> {
        self.put(message)
    }

    fn put(&mut self, message: Message) -> Result<()> {
        let peer = self.peer.as_mut().ok_or_else(|| {
            DebugWireError::FailedPrecondition("Debug session is not connected".to_string())
        })?;
        let result = peer.put_message(&message);
        if let Err(e) = &result {
            if e.is_connection_fatal() {
                tracing::error!("Failed to send '{}': {}", message.name, e);
                self.stop();
            }
        }
        result
    }

    fn require_breaked(&self, command: &str) -> Result<()> {
        if !self.is_breaked() {
            return Err(DebugWireError::FailedPrecondition(format!(
                "'{}' requires a stopped debuggee",
                command
            )));
        }
        Ok(())
    }

    /// Step into the next line.
    pub fn step(&mut self) -> Result<()> {
        self.require_breaked(names::STEP)?;
        self.put(Message::bare(names::STEP))
    }

    /// Step over to the next line.
    pub fn next(&mut self) -> Result<()> {
        self.require_breaked(names::NEXT)?;
        self.put(Message::bare(names::NEXT))
    }

    /// Resume execution.
    pub fn continue_execution(&mut self) -> Result<()> {
        self.require_breaked(names::CONTINUE)?;
        self.put(Message::bare(names::CONTINUE))
    }

    /// Ask a running debuggee to stop.
    pub fn request_break(&mut self) -> Result<()> {
        if self.is_breaked() {
            return Err(DebugWireError::FailedPrecondition(
                "'break' requires a running debuggee".to_string(),
            ));
        }
        self.put(Message::bare(names::BREAK))
    }

    /// Request the variables of a frame of the current stack.
    pub fn request_stack_frame_vars(&mut self, frame: i32) -> Result<()> {
        self.require_breaked(names::GET_STACK_FRAME_VARS)?;
        self.put(Message::new(names::GET_STACK_FRAME_VARS, vec![frame.into()]))
    }

    /// Add or remove a breakpoint and tell the debuggee.
    pub fn set_breakpoint(&mut self, source: &str, line: i32, enabled: bool) -> Result<()> {
        self.breakpoints.set(line, source, enabled);
        let command = BreakpointCommand {
            source: source.to_string(),
            line,
            enabled,
        };
        self.put(Message::from_record(names::BREAKPOINT, &command))
    }

    pub fn set_skip_breakpoints(&mut self, skip: bool) -> Result<()> {
        self.skip_breakpoints = skip;
        self.put(Message::new(names::SET_SKIP_BREAKPOINTS, vec![skip.into()]))
    }

    pub fn reload_scripts(&mut self) -> Result<()> {
        self.put(Message::bare(names::RELOAD_SCRIPTS))
    }

    /// Start the script profiler. `max_functions` is clamped to 16..=512 and
    /// the signature cache starts over.
    pub fn start_profiling(&mut self, max_functions: i64) -> Result<()> {
        let request = StartProfiling::clamped(max_functions);
        self.profiler_signatures.clear();
        self.profiling = true;
        self.max_functions = request.max_functions;
        self.put(Message::from_record(names::START_PROFILING, &request))
    }

    pub fn stop_profiling(&mut self) -> Result<()> {
        self.profiling = false;
        self.put(Message::bare(names::STOP_PROFILING))
    }

    pub fn start_network_profiling(&mut self) -> Result<()> {
        self.network_profiling = true;
        self.put(Message::bare(names::START_NETWORK_PROFILING))
    }

    pub fn stop_network_profiling(&mut self) -> Result<()> {
        self.network_profiling = false;
        self.put(Message::bare(names::STOP_NETWORK_PROFILING))
    }

    pub fn request_video_mem(&mut self) -> Result<()> {
        self.put(Message::bare(names::REQUEST_VIDEO_MEM))
    }

    /// Enable forwarding of live edits.
    pub fn set_live_debugging(&mut self, enabled: bool) {
        self.live_debug = enabled;
    }

    pub fn is_live_debugging(&self) -> bool {
        self.live_debug
    }

    /// Forward a live edit. Returns `false` without sending anything while
    /// live debugging is off.
    pub fn live_edit(&mut self, command: &LiveEditCommand) -> Result<bool> {
        if !self.live_debug {
            return Ok(false);
        }
        for message in command.to_messages(&mut self.path_cache) {
            self.put(message)?;
        }
        Ok(true)
    }
}

impl Default for DebuggerSession {
    fn default() -> Self {
        Self::new()
    }
}
