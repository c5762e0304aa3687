//! Debuggee-side stepping state.
//!
//! The script runtime reports each executed line through
//! [`ScriptDebugger::should_break`] and each call boundary through
//! [`ScriptDebugger::enter_function`] / [`ScriptDebugger::exit_function`].
//! Stepping is a countdown: `lines_left` lines still to run before breaking,
//! counted only while `depth` is at or below zero.
//!
//! | command    | `lines_left` | `depth` |
//! |------------|--------------|---------|
//! | `step`     | 1            | -1      |
//! | `next`     | 1            | 0       |
//! | `continue` | -1           | -1      |
//! | `break`    | 1            | -1      |

use super::breakpoints::BreakpointSet;

/// Breakpoints plus the stepping counters of the running script.
#[derive(Debug, Clone)]
pub struct ScriptDebugger {
    breakpoints: BreakpointSet,
    lines_left: i32,
    depth: i32,
    skip_breakpoints: bool,
}

impl ScriptDebugger {
    pub fn new() -> Self {
        Self {
            breakpoints: BreakpointSet::new(),
            lines_left: -1,
            depth: -1,
            skip_breakpoints: false,
        }
    }

    pub fn breakpoints(&self) -> &BreakpointSet {
        &self.breakpoints
    }

    pub fn insert_breakpoint(&mut self, line: i32, source: &str) {
        self.breakpoints.insert(line, source);
    }

    pub fn remove_breakpoint(&mut self, line: i32, source: &str) {
        self.breakpoints.remove(line, source);
    }

    pub fn is_breakpoint(&self, line: i32, source: &str) -> bool {
        self.breakpoints.is_breakpoint(line, source)
    }

    pub fn is_breakpoint_line(&self, line: i32) -> bool {
        self.breakpoints.is_breakpoint_line(line)
    }

    pub fn clear_breakpoints(&mut self) {
        self.breakpoints.clear();
    }

    pub fn set_skip_breakpoints(&mut self, skip: bool) {
        self.skip_breakpoints = skip;
    }

    pub fn is_skipping_breakpoints(&self) -> bool {
        self.skip_breakpoints
    }

    pub fn lines_left(&self) -> i32 {
        self.lines_left
    }

    pub fn set_lines_left(&mut self, lines_left: i32) {
        self.lines_left = lines_left;
    }

    pub fn depth(&self) -> i32 {
        self.depth
    }

    pub fn set_depth(&mut self, depth: i32) {
        self.depth = depth;
    }

    /// Break on the next executed line, entering calls.
    pub fn step(&mut self) {
        self.lines_left = 1;
        self.depth = -1;
    }

    /// Break on the next line of the current function.
    pub fn next(&mut self) {
        self.lines_left = 1;
        self.depth = 0;
    }

    /// Run until a breakpoint.
    pub fn resume(&mut self) {
        self.lines_left = -1;
        self.depth = -1;
    }

    /// Break as soon as possible, wherever execution is.
    pub fn request_break(&mut self) {
        self.lines_left = 1;
        self.depth = -1;
    }

    pub fn enter_function(&mut self) {
        if self.lines_left > 0 && self.depth >= 0 {
            self.depth += 1;
        }
    }

    pub fn exit_function(&mut self) {
        if self.lines_left > 0 && self.depth >= 0 {
            self.depth -= 1;
        }
    }

    /// Account for one executed line and report whether to break on it.
    pub fn should_break(&mut self, line: i32, source: &str) -> bool {
        let mut stop = false;
        if self.lines_left > 0 {
            if self.depth <= 0 {
                self.lines_left -= 1;
            }
            if self.lines_left <= 0 {
                stop = true;
            }
        }

        if !self.skip_breakpoints && self.breakpoints.is_breakpoint(line, source) {
            stop = true;
        }
        stop
    }
}

impl Default for ScriptDebugger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_script_breaks_only_on_breakpoints() {
        let mut debugger = ScriptDebugger::new();
        debugger.insert_breakpoint(3, "a.gd");

        assert!(!debugger.should_break(1, "a.gd"));
        assert!(!debugger.should_break(3, "b.gd"));
        assert!(debugger.should_break(3, "a.gd"));
    }

    #[test]
    fn test_step_breaks_on_next_line_even_inside_calls() {
        let mut debugger = ScriptDebugger::new();
        debugger.step();

        debugger.enter_function();
        assert_eq!(debugger.depth(), -1);
        assert!(debugger.should_break(10, "callee.gd"));
    }

    #[test]
    fn test_next_steps_over_calls() {
        let mut debugger = ScriptDebugger::new();
        debugger.next();

        debugger.enter_function();
        assert_eq!(debugger.depth(), 1);
        assert!(!debugger.should_break(10, "callee.gd"));
        assert!(!debugger.should_break(11, "callee.gd"));
        debugger.exit_function();

        assert!(debugger.should_break(5, "caller.gd"));
    }

    #[test]
    fn test_resume_clears_stepping() {
        let mut debugger = ScriptDebugger::new();
        debugger.step();
        debugger.resume();
        assert!(!debugger.should_break(1, "a.gd"));
        assert_eq!(debugger.lines_left(), -1);
    }

    #[test]
    fn test_skip_suppresses_breakpoints_not_stepping() {
        let mut debugger = ScriptDebugger::new();
        debugger.insert_breakpoint(7, "a.gd");
        debugger.set_skip_breakpoints(true);

        assert!(!debugger.should_break(7, "a.gd"));

        debugger.request_break();
        assert!(debugger.should_break(8, "a.gd"));
    }
}
