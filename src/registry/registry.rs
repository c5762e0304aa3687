//! Registry of profilers, message captures and URI schemes.
//!
//! One `DebuggerRegistry` belongs to one debugger instance. Profilers are
//! keyed by name and carry an active flag. Captures are keyed by the
//! prefix they own. URI handlers map a scheme (`tcp://`) to a factory that
//! opens a [`DebuggerPeer`].
//!
//! Registering a name twice fails with `AlreadyRegistered`, removing an
//! unknown name fails with `NotRegistered`. Both are logged as errors, since
//! they point at a wiring bug in the host.
//!
//! The registry is single-owner. Wrap it in a [`SharedRegistry`] to reach
//! it from more than one thread.
//!
//! # Example
//!
//! ```ignore
//! use debugwire::registry::{DebuggerRegistry, FnProfiler};
//!
//! let mut registry = DebuggerRegistry::new();
//!
//! registry.register_profiler("fps", FnProfiler::new(|on, _| println!("fps: {}", on)))?;
//! registry.register_capture("game", |msg: &str, _args: &[Variant], _out: &mut Vec<Message>| {
//!     Ok(msg == "pause")
//! })?;
//!
//! registry.profiler_enable("fps", true, &[])?;
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, error};

use super::capture::MessageCapture;
use super::profiler::{FrameTimes, Profiler};
use crate::codec::Variant;
use crate::config::SCHEME_SEPARATOR;
use crate::error::{DebugWireError, Result};
use crate::message::Message;
use crate::transport::DebuggerPeer;

/// Opens a peer for a full URI.
pub type PeerFactory = Box<dyn Fn(&str) -> Result<Box<dyn DebuggerPeer>> + Send>;

/// Registry shared between threads.
pub type SharedRegistry = Arc<Mutex<DebuggerRegistry>>;

struct ProfilerEntry {
    profiler: Box<dyn Profiler>,
    active: bool,
}

/// Profilers, captures and URI handlers of one debugger.
pub struct DebuggerRegistry {
    profilers: HashMap<String, ProfilerEntry>,
    captures: HashMap<String, Box<dyn MessageCapture>>,
    uri_handlers: HashMap<String, PeerFactory>,
}

fn already_registered(kind: &str, name: &str) -> DebugWireError {
    error!("{} already registered: {}", kind, name);
    DebugWireError::AlreadyRegistered(format!("{} '{}'", kind, name))
}

fn not_registered(kind: &str, name: &str) -> DebugWireError {
    error!("{} not registered: {}", kind, name);
    DebugWireError::NotRegistered(format!("{} '{}'", kind, name))
}

impl DebuggerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            profilers: HashMap::new(),
            captures: HashMap::new(),
            uri_handlers: HashMap::new(),
        }
    }

    /// Wrap the registry for use from several threads.
    pub fn into_shared(self) -> SharedRegistry {
        Arc::new(Mutex::new(self))
    }

    // ========================================================================
    // Profilers
    // ========================================================================

    /// Register a profiler under `name`. It starts inactive.
    pub fn register_profiler<P>(&mut self, name: &str, profiler: P) -> Result<()>
    where
        P: Profiler + 'static,
    {
        self.register_boxed_profiler(name, Box::new(profiler))
    }

    /// Register an already boxed profiler.
    pub fn register_boxed_profiler(&mut self, name: &str, profiler: Box<dyn Profiler>) -> Result<()> {
        if self.profilers.contains_key(name) {
            return Err(already_registered("Profiler", name));
        }
        debug!("Registered profiler '{}'", name);
        self.profilers.insert(
            name.to_string(),
            ProfilerEntry {
                profiler,
                active: false,
            },
        );
        Ok(())
    }

    /// Remove a profiler, turning it off first if it is running.
    pub fn unregister_profiler(&mut self, name: &str) -> Result<()> {
        let mut entry = self
            .profilers
            .remove(name)
            .ok_or_else(|| not_registered("Profiler", name))?;
        if entry.active {
            entry.profiler.toggle(false, &[]);
        }
        debug!("Unregistered profiler '{}'", name);
        Ok(())
    }

    pub fn has_profiler(&self, name: &str) -> bool {
        self.profilers.contains_key(name)
    }

    /// Whether `name` is registered and active.
    pub fn is_profiling(&self, name: &str) -> bool {
        self.profilers.get(name).map_or(false, |entry| entry.active)
    }

    /// Names of all registered profilers.
    pub fn profiler_names(&self) -> impl Iterator<Item = &str> {
        self.profilers.keys().map(String::as_str)
    }

    /// Toggle a profiler. `opts` are passed through to it.
    pub fn profiler_enable(&mut self, name: &str, enable: bool, opts: &[Variant]) -> Result<()> {
        let entry = self
            .profilers
            .get_mut(name)
            .ok_or_else(|| not_registered("Profiler", name))?;
        entry.profiler.toggle(enable, opts);
        entry.active = enable;
        debug!("Profiler '{}' {}", name, if enable { "enabled" } else { "disabled" });
        Ok(())
    }

    /// Hand one sample to a profiler.
    pub fn profiler_add_frame_data(&mut self, name: &str, data: &[Variant]) -> Result<()> {
        let entry = self
            .profilers
            .get_mut(name)
            .ok_or_else(|| not_registered("Profiler", name))?;
        entry.profiler.add(data);
        Ok(())
    }

    /// Tick every active profiler. Their reports land in `outbox`.
    pub fn tick_profilers(&mut self, times: &FrameTimes, outbox: &mut Vec<Message>) {
        for entry in self.profilers.values_mut().filter(|entry| entry.active) {
            entry.profiler.tick(times, outbox);
        }
    }

    /// Turn off every active profiler.
    pub fn disable_profilers(&mut self) {
        for (name, entry) in self.profilers.iter_mut().filter(|(_, entry)| entry.active) {
            entry.profiler.toggle(false, &[]);
            entry.active = false;
            debug!("Profiler '{}' disabled", name);
        }
    }

    // ========================================================================
    // Message captures
    // ========================================================================

    /// Register the capture owning the `name:` prefix.
    pub fn register_capture<C>(&mut self, name: &str, capture: C) -> Result<()>
    where
        C: MessageCapture + 'static,
    {
        self.register_boxed_capture(name, Box::new(capture))
    }

    /// Register an already boxed capture.
    pub fn register_boxed_capture(&mut self, name: &str, capture: Box<dyn MessageCapture>) -> Result<()> {
        if self.captures.contains_key(name) {
            return Err(already_registered("Capture", name));
        }
        debug!("Registered capture '{}'", name);
        self.captures.insert(name.to_string(), capture);
        Ok(())
    }

    pub fn unregister_capture(&mut self, name: &str) -> Result<()> {
        let _capture = self
            .captures
            .remove(name)
            .ok_or_else(|| not_registered("Capture", name))?;
        debug!("Unregistered capture '{}'", name);
        Ok(())
    }

    pub fn has_capture(&self, name: &str) -> bool {
        self.captures.contains_key(name)
    }

    /// Route `message` to the capture registered as `name`.
    ///
    /// Returns whether the capture recognized the message.
    pub fn capture_parse(
        &mut self,
        name: &str,
        message: &str,
        args: &[Variant],
        outbox: &mut Vec<Message>,
    ) -> Result<bool> {
        let capture = self
            .captures
            .get_mut(name)
            .ok_or_else(|| not_registered("Capture", name))?;
        capture.capture(message, args, outbox)
    }

    // ========================================================================
    // URI handlers
    // ========================================================================

    /// Register the factory for `scheme`, which includes the `://`.
    pub fn register_uri_handler<F>(&mut self, scheme: &str, factory: F) -> Result<()>
    where
        F: Fn(&str) -> Result<Box<dyn DebuggerPeer>> + Send + 'static,
    {
        if self.uri_handlers.contains_key(scheme) {
            return Err(already_registered("URI handler", scheme));
        }
        debug!("Registered URI handler '{}'", scheme);
        self.uri_handlers.insert(scheme.to_string(), Box::new(factory));
        Ok(())
    }

    pub fn unregister_uri_handler(&mut self, scheme: &str) -> Result<()> {
        let _factory = self
            .uri_handlers
            .remove(scheme)
            .ok_or_else(|| not_registered("URI handler", scheme))?;
        debug!("Unregistered URI handler '{}'", scheme);
        Ok(())
    }

    pub fn has_uri_handler(&self, scheme: &str) -> bool {
        self.uri_handlers.contains_key(scheme)
    }

    /// Open a peer for `uri` through the handler of its scheme.
    pub fn create_peer(&self, uri: &str) -> Result<Box<dyn DebuggerPeer>> {
        let end = uri.find(SCHEME_SEPARATOR).ok_or_else(|| {
            DebugWireError::InvalidParameter(format!("Missing scheme in URI '{}'", uri))
        })?;
        let scheme = &uri[..end + SCHEME_SEPARATOR.len()];
        let factory = self.uri_handlers.get(scheme).ok_or_else(|| {
            DebugWireError::NotRegistered(format!("No handler for scheme '{}'", scheme))
        })?;
        factory(uri)
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// Drop every profiler, capture and URI handler.
    pub fn clear(&mut self) {
        self.profilers.clear();
        self.captures.clear();
        self.uri_handlers.clear();
    }

    /// Turn off active profilers, then clear every table.
    pub fn shutdown(&mut self) {
        self.disable_profilers();
        self.clear();
    }
}

impl Default for DebuggerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::FnProfiler;
    use crate::transport::MemoryPeer;

    fn recording_profiler() -> (FnProfiler, Arc<Mutex<Vec<bool>>>) {
        let toggles = Arc::new(Mutex::new(Vec::new()));
        let seen = toggles.clone();
        let profiler = FnProfiler::new(move |enable, _| seen.lock().unwrap().push(enable))
            .on_tick(|_, outbox| outbox.push(Message::bare("tick")));
        (profiler, toggles)
    }

    #[test]
    fn test_register_profiler_twice_fails() {
        let mut registry = DebuggerRegistry::new();
        let (first, _) = recording_profiler();
        let (second, _) = recording_profiler();

        registry.register_profiler("fps", first).unwrap();
        assert!(matches!(
            registry.register_profiler("fps", second),
            Err(DebugWireError::AlreadyRegistered(_))
        ));
        assert!(registry.has_profiler("fps"));
    }

    #[test]
    fn test_unregister_toggles_active_profiler_off() {
        let mut registry = DebuggerRegistry::new();
        let (profiler, toggles) = recording_profiler();
        registry.register_profiler("fps", profiler).unwrap();

        registry.profiler_enable("fps", true, &[]).unwrap();
        assert!(registry.is_profiling("fps"));
        registry.unregister_profiler("fps").unwrap();

        assert_eq!(*toggles.lock().unwrap(), vec![true, false]);
        assert!(!registry.has_profiler("fps"));
        assert!(matches!(
            registry.unregister_profiler("fps"),
            Err(DebugWireError::NotRegistered(_))
        ));
    }

    #[test]
    fn test_only_active_profilers_tick() {
        let mut registry = DebuggerRegistry::new();
        let (a, _) = recording_profiler();
        let (b, _) = recording_profiler();
        registry.register_profiler("a", a).unwrap();
        registry.register_profiler("b", b).unwrap();
        registry.profiler_enable("b", true, &[]).unwrap();

        let mut outbox = Vec::new();
        registry.tick_profilers(&FrameTimes::default(), &mut outbox);
        assert_eq!(outbox.len(), 1);

        assert!(registry.profiler_enable("missing", true, &[]).is_err());
        assert!(registry.profiler_add_frame_data("missing", &[]).is_err());
    }

    #[test]
    fn test_capture_parse() {
        let mut registry = DebuggerRegistry::new();
        registry
            .register_capture("game", |msg: &str, args: &[Variant], out: &mut Vec<Message>| {
                if msg != "ping" {
                    return Ok(false);
                }
                out.push(Message::new("game:pong", args.to_vec()));
                Ok(true)
            })
            .unwrap();

        let mut outbox = Vec::new();
        assert!(registry
            .capture_parse("game", "ping", &[Variant::Int(1)], &mut outbox)
            .unwrap());
        assert!(!registry.capture_parse("game", "other", &[], &mut outbox).unwrap());
        assert_eq!(outbox, vec![Message::new("game:pong", vec![Variant::Int(1)])]);

        assert!(registry.capture_parse("nope", "ping", &[], &mut outbox).is_err());
        registry.unregister_capture("game").unwrap();
        assert!(!registry.has_capture("game"));
    }

    #[test]
    fn test_create_peer_by_scheme() {
        let mut registry = DebuggerRegistry::new();
        registry
            .register_uri_handler("mem://", |_uri: &str| {
                let (peer, _other) = MemoryPeer::pair();
                Ok(Box::new(peer) as Box<dyn DebuggerPeer>)
            })
            .unwrap();

        assert!(registry.create_peer("mem://anything").is_ok());
        assert!(matches!(
            registry.create_peer("udp://host:1"),
            Err(DebugWireError::NotRegistered(_))
        ));
        assert!(matches!(
            registry.create_peer("no-scheme"),
            Err(DebugWireError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_unregister_uri_handler() {
        let mut registry = DebuggerRegistry::new();
        registry
            .register_uri_handler("mem://", |_uri: &str| Err(DebugWireError::Unavailable))
            .unwrap();

        registry.unregister_uri_handler("mem://").unwrap();
        assert!(!registry.has_uri_handler("mem://"));
        assert!(matches!(
            registry.unregister_uri_handler("mem://"),
            Err(DebugWireError::NotRegistered(_))
        ));
    }

    #[test]
    fn test_shutdown_disables_then_clears() {
        let mut registry = DebuggerRegistry::new();
        let (profiler, toggles) = recording_profiler();
        registry.register_profiler("fps", profiler).unwrap();
        registry.profiler_enable("fps", true, &[]).unwrap();

        registry.shutdown();
        assert_eq!(*toggles.lock().unwrap(), vec![true, false]);
        assert!(!registry.has_profiler("fps"));
    }

    #[test]
    fn test_shared_registry() {
        let shared = DebuggerRegistry::new().into_shared();
        let worker = {
            let shared = shared.clone();
            std::thread::spawn(move || {
                let (profiler, _) = recording_profiler();
                shared.lock().unwrap().register_profiler("fps", profiler)
            })
        };
        worker.join().unwrap().unwrap();
        assert!(shared.lock().unwrap().has_profiler("fps"));
    }
}
