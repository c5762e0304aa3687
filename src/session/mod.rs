//! Session state: breakpoints, stepping, the controller state machine and
//! live edit handle tables.

mod breakpoints;
mod controller;
mod live_edit;
mod script_debugger;

pub use breakpoints::{parse_breakpoint_spec, BreakpointSet};
pub use controller::{DebuggerSession, ProfiledFunction, SessionEvent, SessionState};
pub use live_edit::{LiveEditCommand, LiveEditOp, LiveEditReceiver, LiveEditTarget, PathHandleCache};
pub use script_debugger::ScriptDebugger;
