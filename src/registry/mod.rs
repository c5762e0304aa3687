//! Registry module - profilers, message captures and URI handlers.

mod capture;
mod profiler;
#[allow(clippy::module_inception)]
mod registry;

pub use capture::MessageCapture;
pub use profiler::{
    FnProfiler, FrameTimes, NetworkProfiler, Profiler, ScriptsProfiler, NETWORK_PROFILER,
    SCRIPTS_PROFILER,
};
pub use registry::{DebuggerRegistry, PeerFactory, SharedRegistry};
