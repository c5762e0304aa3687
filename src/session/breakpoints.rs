//! Breakpoint set.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{DebugWireError, Result};

/// Breakpoints keyed by line, each line holding the sources that break on it.
///
/// A line entry exists only while its source set is non-empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BreakpointSet {
    lines: BTreeMap<i32, BTreeSet<String>>,
}

impl BreakpointSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `source` to `line`. Returns `false` if it was already there.
    pub fn insert(&mut self, line: i32, source: &str) -> bool {
        self.lines
            .entry(line)
            .or_default()
            .insert(source.to_string())
    }

    /// Remove `source` from `line`, erasing the line once nothing is left.
    /// Returns `false` if it was not set.
    pub fn remove(&mut self, line: i32, source: &str) -> bool {
        let Some(sources) = self.lines.get_mut(&line) else {
            return false;
        };
        let removed = sources.remove(source);
        if sources.is_empty() {
            self.lines.remove(&line);
        }
        removed
    }

    /// Insert or remove depending on `enabled`.
    pub fn set(&mut self, line: i32, source: &str, enabled: bool) {
        if enabled {
            self.insert(line, source);
        } else {
            self.remove(line, source);
        }
    }

    pub fn is_breakpoint(&self, line: i32, source: &str) -> bool {
        self.lines
            .get(&line)
            .map_or(false, |sources| sources.contains(source))
    }

    /// Cheap pre-check before comparing sources.
    pub fn is_breakpoint_line(&self, line: i32) -> bool {
        self.lines.contains_key(&line)
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Total number of `(line, source)` pairs.
    pub fn len(&self) -> usize {
        self.lines.values().map(BTreeSet::len).sum()
    }

    /// All breakpoints in line order.
    pub fn iter(&self) -> impl Iterator<Item = (i32, &str)> + '_ {
        self.lines
            .iter()
            .flat_map(|(line, sources)| sources.iter().map(move |s| (*line, s.as_str())))
    }
}

/// Parse a `path:line` breakpoint. The path may itself contain `:`
/// (`res://main.gd:12`), so the split is on the last one.
pub fn parse_breakpoint_spec(spec: &str) -> Result<(String, i32)> {
    let invalid = || DebugWireError::InvalidParameter(format!("Invalid breakpoint: '{}'", spec));

    let (path, line) = spec.rsplit_once(':').ok_or_else(invalid)?;
    if path.is_empty() {
        return Err(invalid());
    }
    let line = line.trim().parse::<i32>().map_err(|_| invalid())?;
    Ok((path.to_string(), line))
}
