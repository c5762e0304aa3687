//! Debuggee-side debugger.
//!
//! [`EngineDebugger`] lives inside the running program. It owns the
//! breakpoint state, the registry of profilers and captures, and the
//! connection to the remote debugger. The host program calls it at three
//! points:
//! 1. `line_poll()` on every executed statement, to keep the connection
//!    alive inside long-running scripts
//! 2. `iteration()` once per frame, to tick profilers and pump messages
//! 3. `debug()` when a script stops, which blocks until the debugger
//!    resumes execution
//!
//! # Example
//!
//! ```ignore
//! use debugwire::EngineDebugger;
//!
//! let mut debugger = EngineDebugger::builder()
//!     .uri("tcp://127.0.0.1:6007")
//!     .breakpoint("res://main.gd:12")
//!     .script_host(my_host)
//!     .start()?;
//!
//! loop {
//!     run_frame(&mut debugger);
//!     debugger.iteration(frame_usec, idle_usec, physics_usec, 1.0 / 60.0);
//! }
//! ```

use std::net::ToSocketAddrs;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use crate::codec::Variant;
use crate::config::{parse_uri, DebugConfig};
use crate::error::{DebugWireError, Result};
use crate::message::{
    names, ArgReader, BreakpointCommand, DebugEnter, Message, OutputError, ResourceUsage,
    ScriptStackDump, StackFrameVars,
};
use crate::registry::{
    DebuggerRegistry, FrameTimes, MessageCapture, NetworkProfiler, PeerFactory, Profiler,
    ScriptsProfiler, NETWORK_PROFILER, SCRIPTS_PROFILER,
};
use crate::session::{parse_breakpoint_spec, LiveEditReceiver, LiveEditTarget, ScriptDebugger};
use crate::transport::{DebuggerPeer, StreamLimits, TcpDebuggerPeer};

/// Scheme served by the built-in TCP handler.
pub const TCP_SCHEME: &str = "tcp://";

/// Wait between polls while stopped at a break.
const BREAK_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Interval between two `performance` reports.
const PERFORMANCE_INTERVAL: Duration = Duration::from_secs(1);

/// Window of the output and error rate limits.
const RATE_WINDOW: Duration = Duration::from_secs(1);

const OUTPUT_OVERFLOW_NOTICE: &str = "[output overflow, print less text!]";

/// Access to the script runtime the debugger is attached to.
pub trait ScriptHost: Send {
    /// Call stack of the script that is stopped.
    fn stack_dump(&mut self) -> ScriptStackDump;

    /// Variables of one stack frame, 0 being the innermost.
    fn stack_frame_vars(&mut self, frame: i32) -> Result<StackFrameVars>;

    fn reload_scripts(&mut self) {}

    /// Video memory in use, if the host tracks it.
    fn resource_usage(&mut self) -> Option<ResourceUsage> {
        None
    }

    /// Monitor values reported once a second. Empty disables the report.
    fn performance_monitors(&mut self) -> Vec<f64> {
        Vec::new()
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`EngineDebugger`].
pub struct EngineDebuggerBuilder {
    config: DebugConfig,
    peer: Option<Box<dyn DebuggerPeer>>,
    profilers: Vec<(String, Box<dyn Profiler>)>,
    captures: Vec<(String, Box<dyn MessageCapture>)>,
    uri_handlers: Vec<(String, PeerFactory)>,
    live_target: Option<Box<dyn LiveEditTarget>>,
    script_host: Option<Box<dyn ScriptHost>>,
}

impl EngineDebuggerBuilder {
    pub fn new() -> Self {
        Self {
            config: DebugConfig::default(),
            peer: None,
            profilers: Vec::new(),
            captures: Vec::new(),
            uri_handlers: Vec::new(),
            live_target: None,
            script_host: None,
        }
    }

    /// Replace the whole configuration. Call before the other setters.
    pub fn config(mut self, config: DebugConfig) -> Self {
        self.config = config;
        self
    }

    /// Remote debugger to connect to.
    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.config.uri = uri.into();
        self
    }

    pub fn skip_breakpoints(mut self, skip: bool) -> Self {
        self.config.skip_breakpoints = skip;
        self
    }

    /// Add an initial breakpoint in `path:line` form.
    pub fn breakpoint(mut self, spec: impl Into<String>) -> Self {
        self.config.breakpoints.push(spec.into());
        self
    }

    /// Use an already connected peer instead of resolving the URI.
    pub fn peer(mut self, peer: Box<dyn DebuggerPeer>) -> Self {
        self.peer = Some(peer);
        self
    }

    pub fn profiler<P>(mut self, name: &str, profiler: P) -> Self
    where
        P: Profiler + 'static,
    {
        self.profilers.push((name.to_string(), Box::new(profiler)));
        self
    }

    pub fn capture<C>(mut self, name: &str, capture: C) -> Self
    where
        C: MessageCapture + 'static,
    {
        self.captures.push((name.to_string(), Box::new(capture)));
        self
    }

    /// Serve `scheme` with `factory`. Registering `tcp://` replaces the
    /// built-in TCP handler.
    pub fn uri_handler<F>(mut self, scheme: &str, factory: F) -> Self
    where
        F: Fn(&str) -> Result<Box<dyn DebuggerPeer>> + Send + 'static,
    {
        self.uri_handlers.push((scheme.to_string(), Box::new(factory)));
        self
    }

    /// Receiver of live edits sent by the debugger.
    pub fn live_edit<T>(mut self, target: T) -> Self
    where
        T: LiveEditTarget + 'static,
    {
        self.live_target = Some(Box::new(target));
        self
    }

    pub fn script_host<H>(mut self, host: H) -> Self
    where
        H: ScriptHost + 'static,
    {
        self.script_host = Some(Box::new(host));
        self
    }

    /// Register everything, connect and announce the process.
    ///
    /// A URI that cannot be served leaves the debugger running without a
    /// peer. Registration conflicts and invalid settings are errors.
    pub fn start(self) -> Result<EngineDebugger> {
        self.config.validate()?;

        let mut registry = DebuggerRegistry::new();
        for (scheme, factory) in self.uri_handlers {
            registry.register_uri_handler(&scheme, factory)?;
        }
        if !registry.has_uri_handler(TCP_SCHEME) {
            let factory = tcp_peer_factory(self.config.stream_limits(), self.config.max_value_size);
            registry.register_uri_handler(TCP_SCHEME, factory)?;
        }

        for (name, profiler) in self.profilers {
            registry.register_boxed_profiler(&name, profiler)?;
        }
        if !registry.has_profiler(SCRIPTS_PROFILER) {
            registry.register_profiler(SCRIPTS_PROFILER, ScriptsProfiler::new())?;
        }
        if !registry.has_profiler(NETWORK_PROFILER) {
            registry.register_profiler(NETWORK_PROFILER, NetworkProfiler::new())?;
        }

        for (name, capture) in self.captures {
            registry.register_boxed_capture(&name, capture)?;
        }

        let peer = match self.peer {
            Some(peer) => Some(peer),
            None if self.config.uri.is_empty() => None,
            None => match registry.create_peer(&self.config.uri) {
                Ok(peer) => Some(peer),
                Err(e) => {
                    error!("Remote debugger unavailable at '{}': {}", self.config.uri, e);
                    None
                }
            },
        };

        let mut script_debugger = ScriptDebugger::new();
        script_debugger.set_skip_breakpoints(self.config.skip_breakpoints);
        for spec in &self.config.breakpoints {
            match parse_breakpoint_spec(spec) {
                Ok((source, line)) => script_debugger.insert_breakpoint(line, &source),
                Err(e) => warn!("Skipping breakpoint '{}': {}", spec, e),
            }
        }

        let now = Instant::now();
        let mut debugger = EngineDebugger {
            config: self.config,
            registry,
            script_debugger,
            peer,
            live_edit: LiveEditReceiver::new(),
            live_target: self.live_target,
            script_host: self.script_host,
            poll_every: 0,
            reload_pending: false,
            skip_profile_frame: false,
            last_performance: now,
            output: OutputBuffer::new(now),
            messages_dropped: 0,
            initialized: true,
        };

        if debugger.peer.is_some() {
            let pid = Message::new(names::SET_PID, vec![Variant::Int(std::process::id() as i64)]);
            debugger.send_all(vec![pid]);
            debug!("Remote debugger attached");
        }
        Ok(debugger)
    }
}

impl Default for EngineDebuggerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn tcp_peer_factory(
    limits: StreamLimits,
    max_value_size: usize,
) -> impl Fn(&str) -> Result<Box<dyn DebuggerPeer>> + Send + 'static {
    move |uri: &str| {
        let (_, host, port) = parse_uri(uri)?;
        let addr = (host.as_str(), port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| DebugWireError::InvalidParameter(format!("Cannot resolve host '{}'", host)))?;
        let mut peer = TcpDebuggerPeer::connect(addr, limits)?;
        peer.set_max_value_size(max_value_size);
        Ok(Box::new(peer) as Box<dyn DebuggerPeer>)
    }
}

// ============================================================================
// Output buffering
// ============================================================================

/// Output lines and errors waiting for the next flush, with per-second
/// rate limits.
struct OutputBuffer {
    window_start: Instant,
    chars: usize,
    errors: usize,
    warnings: usize,
    overflowed: bool,
    lines: Vec<String>,
    errors_pending: Vec<OutputError>,
}

impl OutputBuffer {
    fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            chars: 0,
            errors: 0,
            warnings: 0,
            overflowed: false,
            lines: Vec::new(),
            errors_pending: Vec::new(),
        }
    }

    fn roll_window(&mut self) {
        if self.window_start.elapsed() >= RATE_WINDOW {
            self.window_start = Instant::now();
            self.chars = 0;
            self.errors = 0;
            self.warnings = 0;
            self.overflowed = false;
        }
    }

    fn push_line(&mut self, line: String, max_chars: usize) {
        self.roll_window();
        let len = line.chars().count();
        if self.chars + len > max_chars {
            if !self.overflowed {
                self.overflowed = true;
                self.lines.push(OUTPUT_OVERFLOW_NOTICE.to_string());
            }
            return;
        }
        self.chars += len;
        self.lines.push(line);
    }

    fn push_error(&mut self, error: OutputError, max_errors: usize, max_warnings: usize) {
        self.roll_window();
        let (count, limit) = if error.warning {
            (&mut self.warnings, max_warnings)
        } else {
            (&mut self.errors, max_errors)
        };
        *count += 1;
        if *count <= limit {
            self.errors_pending.push(error);
            return;
        }
        if *count == limit + 1 {
            let kind = if error.warning { "warnings" } else { "errors" };
            self.errors_pending.push(OutputError {
                error: format!("Too many {}! Ignoring {} for up to 1 second.", kind, kind),
                warning: error.warning,
                ..error
            });
        }
    }

    fn take(&mut self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(self.errors_pending.len() + 1);
        if !self.lines.is_empty() {
            let lines = self.lines.drain(..).map(Variant::from).collect();
            messages.push(Message::new(names::OUTPUT, lines));
        }
        for error in self.errors_pending.drain(..) {
            messages.push(Message::from_record(names::ERROR, &error));
        }
        messages
    }
}

// ============================================================================
// EngineDebugger
// ============================================================================

/// The debugger embedded in a running program.
pub struct EngineDebugger {
    config: DebugConfig,
    registry: DebuggerRegistry,
    script_debugger: ScriptDebugger,
    peer: Option<Box<dyn DebuggerPeer>>,
    live_edit: LiveEditReceiver,
    live_target: Option<Box<dyn LiveEditTarget>>,
    script_host: Option<Box<dyn ScriptHost>>,
    poll_every: u32,
    reload_pending: bool,
    /// Set after a break so the stalled frame is not profiled.
    skip_profile_frame: bool,
    last_performance: Instant,
    output: OutputBuffer,
    messages_dropped: usize,
    initialized: bool,
}

impl EngineDebugger {
    pub fn builder() -> EngineDebuggerBuilder {
        EngineDebuggerBuilder::new()
    }

    pub fn config(&self) -> &DebugConfig {
        &self.config
    }

    pub fn is_peer_connected(&self) -> bool {
        self.peer.as_ref().map_or(false, |peer| peer.is_peer_connected())
    }

    pub fn script_debugger(&self) -> &ScriptDebugger {
        &self.script_debugger
    }

    pub fn script_debugger_mut(&mut self) -> &mut ScriptDebugger {
        &mut self.script_debugger
    }

    pub fn registry(&self) -> &DebuggerRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut DebuggerRegistry {
        &mut self.registry
    }

    /// Messages the peer refused for lack of space.
    pub fn messages_dropped(&self) -> usize {
        self.messages_dropped
    }

    // ========================================================================
    // Sending
    // ========================================================================

    /// Send a message to the debugger. Without a peer this does nothing.
    ///
    /// Oversized arguments are replaced by nil on encoding. A message the
    /// peer has no room for is counted as dropped.
    pub fn send_message(&mut self, message: &Message) -> Result<()> {
        let Some(peer) = self.peer.as_mut() else {
            return Ok(());
        };
        match peer.put_message(message) {
            Ok(()) => Ok(()),
            Err(DebugWireError::OutOfMemory(reason)) => {
                self.messages_dropped += 1;
                warn!("Dropped message '{}': {}", message.name, reason);
                Err(DebugWireError::OutOfMemory(reason))
            }
            Err(e) => {
                if e.is_connection_fatal() {
                    self.drop_peer(&e);
                }
                Err(e)
            }
        }
    }

    /// Queue a line of program output for the next flush.
    pub fn send_output(&mut self, line: impl Into<String>) {
        if self.peer.is_some() {
            self.output.push_line(line.into(), self.config.max_chars_per_second);
        }
    }

    /// Queue a runtime error or warning for the next flush.
    pub fn send_error(&mut self, error: OutputError) {
        if self.peer.is_some() {
            self.output.push_error(
                error,
                self.config.max_errors_per_second,
                self.config.max_warnings_per_second,
            );
        }
    }

    fn send_all(&mut self, messages: Vec<Message>) {
        for message in messages {
            if let Err(e) = self.send_message(&message) {
                debug!("Could not send '{}': {}", message.name, e);
            }
        }
    }

    fn flush_output(&mut self) {
        let messages = self.output.take();
        self.send_all(messages);
    }

    fn drop_peer(&mut self, reason: &DebugWireError) {
        if let Some(mut peer) = self.peer.take() {
            warn!("Remote debugger connection lost: {}", reason);
            peer.close();
        }
    }

    // ========================================================================
    // Polling
    // ========================================================================

    /// Called per executed statement. Pumps messages every
    /// `poll_every_lines` calls.
    pub fn line_poll(&mut self) {
        if self.poll_every % self.config.poll_every_lines == 0 {
            self.poll_events(false);
        }
        self.poll_every = self.poll_every.wrapping_add(1);
    }

    /// Called once per frame. Times are in microseconds except
    /// `physics_frame_time`, which is in seconds.
    pub fn iteration(
        &mut self,
        frame_usec: u64,
        idle_usec: u64,
        physics_usec: u64,
        physics_frame_time: f64,
    ) {
        let times = FrameTimes {
            frame_time: usec_to_sec(frame_usec),
            idle_time: usec_to_sec(idle_usec),
            physics_time: usec_to_sec(physics_usec),
            physics_frame_time,
        };

        if self.skip_profile_frame {
            self.skip_profile_frame = false;
        } else {
            let mut outbox = Vec::new();
            self.registry.tick_profilers(&times, &mut outbox);
            self.send_all(outbox);
        }

        if self.last_performance.elapsed() >= PERFORMANCE_INTERVAL {
            self.last_performance = Instant::now();
            self.send_performance();
        }

        self.poll_events(true);
    }

    fn send_performance(&mut self) {
        let Some(host) = self.script_host.as_mut() else {
            return;
        };
        let monitors = host.performance_monitors();
        if !monitors.is_empty() {
            let args = monitors.into_iter().map(Variant::from).collect();
            self.send_all(vec![Message::new(names::PERFORMANCE, args)]);
        }
    }

    /// Flush output and handle every message the debugger sent.
    ///
    /// Script reloads requested by the debugger run only on idle polls.
    pub fn poll_events(&mut self, is_idle: bool) {
        if self.pump() {
            while let Some(message) = self.receive() {
                self.dispatch(&message);
            }
        }

        if is_idle && self.reload_pending {
            self.reload_pending = false;
            if let Some(host) = self.script_host.as_mut() {
                debug!("Reloading scripts");
                host.reload_scripts();
            }
        }
    }

    /// Flush and poll the peer. Returns whether a peer is still attached.
    fn pump(&mut self) -> bool {
        if self.peer.is_none() {
            return false;
        }
        self.flush_output();

        let Some(peer) = self.peer.as_mut() else {
            return false;
        };
        match peer.poll() {
            Ok(()) => true,
            Err(e) if e.is_connection_fatal() => {
                self.drop_peer(&e);
                false
            }
            Err(e) => {
                warn!("Remote debugger poll failed: {}", e);
                true
            }
        }
    }

    fn receive(&mut self) -> Option<Message> {
        let peer = self.peer.as_mut()?;
        if !peer.has_message() {
            return None;
        }
        match peer.get_message() {
            Ok(message) => Some(message),
            Err(e) => {
                if e.is_connection_fatal() {
                    self.drop_peer(&e);
                } else {
                    warn!("Could not read debugger message: {}", e);
                }
                None
            }
        }
    }

    /// Handle one message. Arguments that fail to decode close the peer.
    fn dispatch(&mut self, message: &Message) {
        match self.handle_message(message) {
            Ok(()) => {}
            Err(e) if e.is_connection_fatal() => {
                error!("Bad '{}' message from debugger: {}", message.name, e);
                self.drop_peer(&e);
            }
            Err(e) => warn!("Ignoring debugger message '{}': {}", message.name, e),
        }
    }

    fn handle_message(&mut self, message: &Message) -> Result<()> {
        match message.name.as_str() {
            names::BREAKPOINT => {
                let command: BreakpointCommand = message.parse_args()?;
                if command.enabled {
                    self.script_debugger.insert_breakpoint(command.line, &command.source);
                } else {
                    self.script_debugger.remove_breakpoint(command.line, &command.source);
                }
            }
            names::SET_SKIP_BREAKPOINTS => {
                let mut reader = ArgReader::new(names::SET_SKIP_BREAKPOINTS, &message.args);
                reader.require(1)?;
                self.script_debugger.set_skip_breakpoints(reader.bool()?);
            }
            names::RELOAD_SCRIPTS => self.reload_pending = true,
            names::BREAK => self.script_debugger.request_break(),
            names::START_PROFILING => {
                self.registry.profiler_enable(SCRIPTS_PROFILER, true, &message.args)?
            }
            names::STOP_PROFILING => self.registry.profiler_enable(SCRIPTS_PROFILER, false, &[])?,
            names::START_NETWORK_PROFILING => {
                self.registry.profiler_enable(NETWORK_PROFILER, true, &message.args)?
            }
            names::STOP_NETWORK_PROFILING => {
                self.registry.profiler_enable(NETWORK_PROFILER, false, &[])?
            }
            names::REQUEST_VIDEO_MEM => self.send_video_mem(),
            names::STEP
            | names::NEXT
            | names::CONTINUE
            | names::GET_STACK_DUMP
            | names::GET_STACK_FRAME_VARS => {
                debug!("Ignoring '{}' while running", message.name);
            }
            name if LiveEditReceiver::handles(name) => match self.live_target.as_mut() {
                Some(target) => {
                    self.live_edit.apply(message, target.as_mut())?;
                }
                None => debug!("Ignoring '{}', live editing not enabled", name),
            },
            _ => self.capture(message)?,
        }
        Ok(())
    }

    fn capture(&mut self, message: &Message) -> Result<()> {
        let Some((prefix, rest)) = message.capture_prefix() else {
            warn!("Unknown message received from debugger: {}", message.name);
            return Ok(());
        };

        if prefix == PROFILER_CAPTURE {
            let mut reader = ArgReader::new("profiler toggle", &message.args);
            reader.require(1)?;
            let enable = reader.bool()?;
            return self.registry.profiler_enable(rest, enable, reader.rest());
        }

        if !self.registry.has_capture(prefix) {
            warn!("Unknown message received from debugger: {}", message.name);
            return Ok(());
        }
        let mut outbox = Vec::new();
        let captured = self.registry.capture_parse(prefix, rest, &message.args, &mut outbox);
        self.send_all(outbox);
        if !captured? {
            warn!("Capture '{}' did not handle '{}'", prefix, rest);
        }
        Ok(())
    }

    fn send_video_mem(&mut self) {
        let mut usage = self
            .script_host
            .as_mut()
            .and_then(|host| host.resource_usage())
            .unwrap_or_default();
        usage.sort();
        self.send_all(vec![Message::from_record(names::VIDEO_MEM, &usage)]);
    }

    // ========================================================================
    // Break loop
    // ========================================================================

    /// Stop at a break and serve the debugger until it resumes execution.
    ///
    /// Sends `debug_enter`, answers stack requests and handles the usual
    /// commands, and returns after `step`, `next` or `continue` (or when the
    /// connection drops), sending `debug_exit`.
    ///
    /// # Errors
    ///
    /// `Unconfigured` if no debugger is attached.
    pub fn debug(&mut self, can_continue: bool, reason: &str) -> Result<()> {
        if !self.is_peer_connected() {
            error!("Script debugger stopped without a remote debugger: {}", reason);
            return Err(DebugWireError::Unconfigured(
                "No remote debugger attached".to_string(),
            ));
        }

        let enter = DebugEnter {
            can_continue,
            reason: reason.to_string(),
        };
        self.send_message(&Message::from_record(names::DEBUG_ENTER, &enter))?;
        debug!("Entered break: {}", reason);
        self.skip_profile_frame = true;

        while self.pump() {
            let Some(message) = self.receive() else {
                self.wait_for_messages();
                continue;
            };

            match message.name.as_str() {
                names::GET_STACK_DUMP => {
                    let dump = self
                        .script_host
                        .as_mut()
                        .map(|host| host.stack_dump())
                        .unwrap_or_default();
                    self.send_all(vec![Message::from_record(names::STACK_DUMP, &dump)]);
                }
                names::GET_STACK_FRAME_VARS => self.send_stack_frame_vars(&message),
                names::STEP => {
                    self.script_debugger.step();
                    break;
                }
                names::NEXT => {
                    self.script_debugger.next();
                    break;
                }
                names::CONTINUE => {
                    self.script_debugger.resume();
                    break;
                }
                names::BREAK => warn!("Got break while already stopped"),
                _ => self.dispatch(&message),
            }
        }

        self.flush_output();
        self.send_all(vec![Message::bare(names::DEBUG_EXIT)]);
        debug!("Left break");
        Ok(())
    }

    fn send_stack_frame_vars(&mut self, message: &Message) {
        let mut reader = ArgReader::new(names::GET_STACK_FRAME_VARS, &message.args);
        let frame = match reader.require(1).and_then(|_| reader.i32()) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Ignoring stack frame request: {}", e);
                return;
            }
        };

        let vars = match self.script_host.as_mut() {
            Some(host) => match host.stack_frame_vars(frame) {
                Ok(vars) => vars,
                Err(e) => {
                    warn!("No variables for stack frame {}: {}", frame, e);
                    return;
                }
            },
            None => StackFrameVars::default(),
        };
        self.send_all(vec![Message::from_record(names::STACK_FRAME_VARS, &vars)]);
    }

    fn wait_for_messages(&self) {
        match self.peer.as_ref() {
            Some(peer) if peer.can_block() => thread::sleep(BREAK_POLL_INTERVAL),
            _ => thread::yield_now(),
        }
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// Turn off profilers, flush what is left, close the connection and
    /// clear the registry. Safe to call repeatedly.
    pub fn deinitialize(&mut self) {
        if !self.initialized {
            return;
        }
        self.initialized = false;

        self.registry.disable_profilers();
        if self.peer.is_some() {
            self.poll_events(false);
        }
        if let Some(mut peer) = self.peer.take() {
            peer.close();
            debug!("Remote debugger detached");
        }
        self.registry.clear();
        self.live_edit.clear();
    }
}

impl Drop for EngineDebugger {
    fn drop(&mut self) {
        self.deinitialize();
    }
}

/// Capture prefix of `profiler:<name> [enable, opts...]` toggles.
const PROFILER_CAPTURE: &str = "profiler";

fn usec_to_sec(usec: u64) -> f64 {
    usec as f64 / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ProfilerFrame, StackFrame, WireRecord};
    use crate::registry::FnProfiler;
    use crate::session::LiveEditOp;
    use crate::transport::MemoryPeer;
    use std::sync::{Arc, Mutex};

    struct FakeHost {
        reloads: Arc<Mutex<usize>>,
    }

    impl ScriptHost for FakeHost {
        fn stack_dump(&mut self) -> ScriptStackDump {
            ScriptStackDump {
                frames: vec![StackFrame::new("res://main.gd", 12, "_ready")],
            }
        }

        fn stack_frame_vars(&mut self, frame: i32) -> Result<StackFrameVars> {
            if frame != 0 {
                return Err(DebugWireError::InvalidParameter(format!("frame {}", frame)));
            }
            Ok(StackFrameVars {
                variables: vec![("hp".to_string(), Variant::Int(3))],
            })
        }

        fn reload_scripts(&mut self) {
            *self.reloads.lock().unwrap() += 1;
        }
    }

    fn attached() -> (EngineDebuggerBuilder, MemoryPeer) {
        let (local, remote) = MemoryPeer::pair();
        (EngineDebugger::builder().peer(Box::new(local)), remote)
    }

    fn drain(remote: &mut MemoryPeer) -> Vec<Message> {
        remote.poll().unwrap();
        let mut messages = Vec::new();
        while remote.has_message() {
            messages.push(remote.get_message().unwrap());
        }
        messages
    }

    #[test]
    fn test_start_sends_pid_and_applies_breakpoints() {
        let (builder, mut remote) = attached();
        let debugger = builder
            .breakpoint("res://a.gd:42")
            .breakpoint("not-a-breakpoint")
            .skip_breakpoints(true)
            .start()
            .unwrap();

        let messages = drain(&mut remote);
        assert_eq!(messages[0].name, names::SET_PID);
        assert_eq!(messages[0].args, vec![Variant::Int(std::process::id() as i64)]);

        assert!(debugger.script_debugger().is_breakpoint(42, "res://a.gd"));
        assert_eq!(debugger.script_debugger().breakpoints().len(), 1);
        assert!(debugger.script_debugger().is_skipping_breakpoints());
    }

    #[test]
    fn test_start_without_uri_has_no_peer() {
        let mut debugger = EngineDebugger::builder().start().unwrap();
        assert!(!debugger.is_peer_connected());
        assert!(debugger.registry().has_uri_handler(TCP_SCHEME));
        assert!(debugger.send_message(&Message::bare("output")).is_ok());
        assert!(matches!(
            debugger.debug(true, "Breakpoint"),
            Err(DebugWireError::Unconfigured(_))
        ));
    }

    #[test]
    fn test_unknown_scheme_leaves_debugger_detached() {
        let debugger = EngineDebugger::builder().uri("ws://localhost:6007").start().unwrap();
        assert!(!debugger.is_peer_connected());
    }

    #[test]
    fn test_custom_uri_handler() {
        let slot = Arc::new(Mutex::new(Some(MemoryPeer::pair())));
        let remote_slot = Arc::new(Mutex::new(None));
        let (handler_slot, handler_remote) = (slot.clone(), remote_slot.clone());

        let debugger = EngineDebugger::builder()
            .uri("mem://game")
            .uri_handler("mem://", move |_uri: &str| {
                let (local, remote) = handler_slot
                    .lock()
                    .unwrap()
                    .take()
                    .ok_or(DebugWireError::Unavailable)?;
                *handler_remote.lock().unwrap() = Some(remote);
                Ok(Box::new(local) as Box<dyn DebuggerPeer>)
            })
            .start()
            .unwrap();

        assert!(debugger.is_peer_connected());
        let mut remote = remote_slot.lock().unwrap().take().unwrap();
        assert_eq!(drain(&mut remote)[0].name, names::SET_PID);
    }

    #[test]
    fn test_poll_events_dispatches_core_messages() {
        let reloads = Arc::new(Mutex::new(0));
        let (builder, mut remote) = attached();
        let mut debugger = builder
            .script_host(FakeHost {
                reloads: reloads.clone(),
            })
            .start()
            .unwrap();

        let bp = BreakpointCommand {
            source: "res://b.gd".to_string(),
            line: 7,
            enabled: true,
        };
        remote.put_message(&Message::from_record(names::BREAKPOINT, &bp)).unwrap();
        remote
            .put_message(&Message::new(names::SET_SKIP_BREAKPOINTS, vec![true.into()]))
            .unwrap();
        remote.put_message(&Message::bare(names::RELOAD_SCRIPTS)).unwrap();
        remote.put_message(&Message::bare(names::BREAK)).unwrap();

        debugger.poll_events(false);
        assert!(debugger.script_debugger().is_breakpoint(7, "res://b.gd"));
        assert!(debugger.script_debugger().is_skipping_breakpoints());
        assert_eq!(debugger.script_debugger().lines_left(), 1);
        assert_eq!(*reloads.lock().unwrap(), 0);

        debugger.poll_events(true);
        assert_eq!(*reloads.lock().unwrap(), 1);
    }

    #[test]
    fn test_profiler_toggles_and_ticks() {
        let toggles = Arc::new(Mutex::new(Vec::new()));
        let seen = toggles.clone();
        let (builder, mut remote) = attached();
        let mut debugger = builder
            .profiler(
                "fps",
                FnProfiler::new(move |enable, opts| {
                    seen.lock().unwrap().push((enable, opts.to_vec()))
                })
                .on_tick(|times, outbox| {
                    outbox.push(Message::new("fps:frame", vec![times.frame_time.into()]))
                }),
            )
            .start()
            .unwrap();
        drain(&mut remote);

        remote
            .put_message(&Message::new("profiler:fps", vec![true.into(), 30.into()]))
            .unwrap();
        debugger.poll_events(false);
        assert!(debugger.registry().is_profiling("fps"));
        assert_eq!(*toggles.lock().unwrap(), vec![(true, vec![Variant::Int(30)])]);

        debugger.iteration(16_000, 0, 0, 1.0 / 60.0);
        let messages = drain(&mut remote);
        assert_eq!(messages, vec![Message::new("fps:frame", vec![0.016.into()])]);
    }

    #[test]
    fn test_start_profiling_drives_scripts_profiler() {
        let (builder, mut remote) = attached();
        let mut debugger = builder.start().unwrap();
        drain(&mut remote);

        remote
            .put_message(&Message::new(names::START_PROFILING, vec![64.into()]))
            .unwrap();
        debugger.poll_events(false);
        assert!(debugger.registry().is_profiling(SCRIPTS_PROFILER));

        let sample: Vec<Variant> = vec!["res://a.gd::3::run".into(), 1.into(), 0.5.into(), 0.5.into()];
        debugger
            .registry_mut()
            .profiler_add_frame_data(SCRIPTS_PROFILER, &sample)
            .unwrap();
        debugger.iteration(16_000, 1_000, 2_000, 1.0 / 60.0);

        let messages = drain(&mut remote);
        assert_eq!(messages[0].name, names::PROFILE_SIG);
        let frame = ProfilerFrame::from_args(&messages[1].args).unwrap();
        assert_eq!(frame.functions.len(), 1);
        assert_eq!(frame.idle_time, 0.001);

        remote.put_message(&Message::bare(names::STOP_PROFILING)).unwrap();
        debugger.poll_events(false);
        assert!(!debugger.registry().is_profiling(SCRIPTS_PROFILER));
    }

    #[test]
    fn test_captures_receive_prefixed_messages() {
        let (builder, mut remote) = attached();
        let mut debugger = builder
            .capture("game", |msg: &str, args: &[Variant], out: &mut Vec<Message>| {
                out.push(Message::new(format!("game:{}_done", msg), args.to_vec()));
                Ok(true)
            })
            .start()
            .unwrap();
        drain(&mut remote);

        remote
            .put_message(&Message::new("game:pause", vec![1.into()]))
            .unwrap();
        remote.put_message(&Message::bare("nobody:listens")).unwrap();
        debugger.poll_events(false);

        assert_eq!(
            drain(&mut remote),
            vec![Message::new("game:pause_done", vec![1.into()])]
        );
        assert!(debugger.is_peer_connected());
    }

    #[test]
    fn test_live_edits_reach_target() {
        let ops = Arc::new(Mutex::new(Vec::new()));
        let seen = ops.clone();
        let (builder, mut remote) = attached();
        let mut debugger = builder
            .live_edit(move |op: LiveEditOp| seen.lock().unwrap().push(op))
            .start()
            .unwrap();

        remote
            .put_message(&Message::new(names::LIVE_NODE_PATH, vec!["/root/P".into(), 1.into()]))
            .unwrap();
        remote
            .put_message(&Message::new(
                names::LIVE_NODE_PROP,
                vec![1.into(), "speed".into(), 5.into()],
            ))
            .unwrap();
        debugger.poll_events(false);

        assert_eq!(ops.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_debug_serves_stack_until_next() {
        let (builder, mut remote) = attached();
        let mut debugger = builder
            .script_host(FakeHost {
                reloads: Arc::default(),
            })
            .start()
            .unwrap();
        drain(&mut remote);

        remote.put_message(&Message::bare(names::GET_STACK_DUMP)).unwrap();
        remote
            .put_message(&Message::new(names::GET_STACK_FRAME_VARS, vec![0.into()]))
            .unwrap();
        remote
            .put_message(&Message::new(names::GET_STACK_FRAME_VARS, vec![9.into()]))
            .unwrap();
        remote.put_message(&Message::bare(names::NEXT)).unwrap();

        debugger.debug(true, "Breakpoint").unwrap();

        let messages = drain(&mut remote);
        let received: Vec<&str> = messages.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(
            received,
            vec![
                names::DEBUG_ENTER,
                names::STACK_DUMP,
                names::STACK_FRAME_VARS,
                names::DEBUG_EXIT
            ]
        );
        let enter: DebugEnter = messages[0].parse_args().unwrap();
        assert_eq!(enter.reason, "Breakpoint");
        let dump: ScriptStackDump = messages[1].parse_args().unwrap();
        assert_eq!(dump.frames[0].line, 12);

        assert_eq!(debugger.script_debugger().lines_left(), 1);
        assert_eq!(debugger.script_debugger().depth(), 0);
    }

    #[test]
    fn test_debug_returns_when_connection_drops() {
        let (local, mut remote) = MemoryPeer::pair();
        local.inject_raw(&[0xc1]).unwrap();
        let mut debugger = EngineDebugger::builder().peer(Box::new(local)).start().unwrap();

        debugger.debug(false, "Parse error").unwrap();
        assert!(!debugger.is_peer_connected());

        let received = drain(&mut remote);
        assert_eq!(received.last().unwrap().name, names::DEBUG_ENTER);
    }

    #[test]
    fn test_malformed_message_closes_peer() {
        let (local, _remote) = MemoryPeer::pair();
        local.inject_raw(b"not msgpack at all").unwrap();
        let mut debugger = EngineDebugger::builder().peer(Box::new(local)).start().unwrap();
        assert!(debugger.is_peer_connected());

        debugger.poll_events(false);
        assert!(!debugger.is_peer_connected());
    }

    #[test]
    fn test_truncated_arguments_close_peer() {
        let (builder, mut remote) = attached();
        let mut debugger = builder.start().unwrap();

        remote
            .put_message(&Message::new(
                names::BREAKPOINT,
                vec!["res://a.gd".into(), Variant::Int(3)],
            ))
            .unwrap();
        debugger.poll_events(false);
        assert!(!debugger.is_peer_connected());
        assert!(debugger.script_debugger().breakpoints().is_empty());
    }

    #[test]
    fn test_unknown_profiler_toggle_keeps_peer() {
        let (builder, mut remote) = attached();
        let mut debugger = builder.start().unwrap();

        remote
            .put_message(&Message::new("profiler:missing", vec![Variant::Bool(true)]))
            .unwrap();
        debugger.poll_events(false);
        assert!(debugger.is_peer_connected());
    }

    #[test]
    fn test_error_rate_limit() {
        let (builder, mut remote) = attached();
        let mut config = DebugConfig::default();
        config.max_errors_per_second = 2;
        let mut debugger = builder.config(config).start().unwrap();
        drain(&mut remote);

        for _ in 0..5 {
            debugger.send_error(OutputError {
                error: "boom".to_string(),
                ..OutputError::default()
            });
        }
        debugger.send_output("hello");
        debugger.poll_events(false);

        let messages = drain(&mut remote);
        assert_eq!(messages[0], Message::new(names::OUTPUT, vec!["hello".into()]));
        let errors: Vec<OutputError> = messages[1..]
            .iter()
            .map(|m| m.parse_args().unwrap())
            .collect();
        assert_eq!(errors.len(), 3);
        assert!(errors[2].error.starts_with("Too many errors!"));
    }

    #[test]
    fn test_output_overflow_notice() {
        let (builder, mut remote) = attached();
        let mut config = DebugConfig::default();
        config.max_chars_per_second = 8;
        let mut debugger = builder.config(config).start().unwrap();
        drain(&mut remote);

        debugger.send_output("12345");
        debugger.send_output("67890");
        debugger.send_output("more");
        debugger.poll_events(false);

        assert_eq!(
            drain(&mut remote),
            vec![Message::new(
                names::OUTPUT,
                vec!["12345".into(), OUTPUT_OVERFLOW_NOTICE.into()]
            )]
        );
    }

    #[test]
    fn test_deinitialize_disables_profilers_and_is_idempotent() {
        let toggles = Arc::new(Mutex::new(Vec::new()));
        let seen = toggles.clone();
        let (builder, mut remote) = attached();
        let mut debugger = builder
            .profiler("fps", FnProfiler::new(move |on, _| seen.lock().unwrap().push(on)))
            .start()
            .unwrap();
        debugger.registry_mut().profiler_enable("fps", true, &[]).unwrap();
        debugger.send_output("bye");

        debugger.deinitialize();
        debugger.deinitialize();

        assert_eq!(*toggles.lock().unwrap(), vec![true, false]);
        assert!(!debugger.registry().has_profiler("fps"));
        assert!(!debugger.is_peer_connected());
        assert!(!remote.is_peer_connected());
        assert!(remote.poll().is_ok());
        let mut received = Vec::new();
        while remote.has_message() {
            received.push(remote.get_message().unwrap().name);
        }
        assert_eq!(received, vec![names::SET_PID.to_string(), names::OUTPUT.to_string()]);
    }

    #[test]
    fn test_line_poll_pumps_periodically() {
        let (builder, mut remote) = attached();
        let mut config = DebugConfig::default();
        config.poll_every_lines = 3;
        let mut debugger = builder.config(config).start().unwrap();
        drain(&mut remote);

        debugger.line_poll();
        remote.put_message(&Message::bare(names::BREAK)).unwrap();
        debugger.line_poll();
        debugger.line_poll();
        assert_eq!(debugger.script_debugger().lines_left(), -1);
        debugger.line_poll();
        assert_eq!(debugger.script_debugger().lines_left(), 1);
    }
}
