//! Profiler signatures and frame records.

use super::{ArgReader, WireRecord};
use crate::codec::Variant;
use crate::error::Result;

/// Build the `script::line::function` name a signature stands for.
pub fn qualified_name(script: &str, line: i32, function: &str) -> String {
    format!("{}::{}::{}", script, line, function)
}

/// Split a qualified name into `(script, line, function)`.
///
/// Built-in scripts carry a `::` in their own path, so four parts are
/// accepted too and the first two are joined back together.
pub fn parse_qualified_name(name: &str) -> Option<(String, i32, String)> {
    let parts: Vec<&str> = name.split("::").collect();
    let (script, line, function) = match parts.as_slice() {
        [script, line, function] => (script.to_string(), *line, *function),
        [a, b, line, function] => (format!("{}::{}", a, b), *line, *function),
        _ => return None,
    };
    let line = line.parse().ok()?;
    Some((script, line, function.to_string()))
}

/// Maps a small id to a qualified function name.
///
/// Wire layout: `[name, id]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfilerSignature {
    pub name: String,
    pub id: i64,
}

impl WireRecord for ProfilerSignature {
    const LABEL: &'static str = "profile_sig";

    fn write_args(&self, out: &mut Vec<Variant>) {
        out.push(self.name.as_str().into());
        out.push(self.id.into());
    }

    fn read_args(reader: &mut ArgReader<'_>) -> Result<Self> {
        reader.require(2)?;
        Ok(Self {
            name: reader.string()?,
            id: reader.int()?,
        })
    }
}

/// Named group of `(item, seconds)` timings.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FrameCategory {
    pub name: String,
    pub items: Vec<(String, f64)>,
}

impl FrameCategory {
    pub fn total_time(&self) -> f64 {
        self.items.iter().map(|(_, time)| time).sum()
    }
}

/// Per-function timing, keyed by signature id.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FrameFunction {
    pub sig_id: i64,
    pub call_count: i64,
    pub self_time: f64,
    pub total_time: f64,
}

/// One sampled frame.
///
/// Wire layout: `[frame_number, frame_time, idle_time, physics_time,
/// physics_frame_time, script_time, group_count, function_count,
/// (group_name, pair_count, (name, time)*pair_count)*group_count,
/// (sig_id, call_count, self_time, total_time)*function_count]`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProfilerFrame {
    pub frame_number: i64,
    pub frame_time: f64,
    pub idle_time: f64,
    pub physics_time: f64,
    pub physics_frame_time: f64,
    pub script_time: f64,
    pub categories: Vec<FrameCategory>,
    pub functions: Vec<FrameFunction>,
}

impl WireRecord for ProfilerFrame {
    const LABEL: &'static str = "profile_frame";

    fn write_args(&self, out: &mut Vec<Variant>) {
        out.push(self.frame_number.into());
        out.push(self.frame_time.into());
        out.push(self.idle_time.into());
        out.push(self.physics_time.into());
        out.push(self.physics_frame_time.into());
        out.push(self.script_time.into());
        out.push(Variant::Int(self.categories.len() as i64));
        out.push(Variant::Int(self.functions.len() as i64));

        for category in &self.categories {
            out.push(category.name.as_str().into());
            out.push(Variant::Int(category.items.len() as i64));
            for (name, time) in &category.items {
                out.push(name.as_str().into());
                out.push((*time).into());
            }
        }
        for function in &self.functions {
            out.push(function.sig_id.into());
            out.push(function.call_count.into());
            out.push(function.self_time.into());
            out.push(function.total_time.into());
        }
    }

    fn read_args(reader: &mut ArgReader<'_>) -> Result<Self> {
        reader.require(8)?;
        let frame_number = reader.int()?;
        let frame_time = reader.float()?;
        let idle_time = reader.float()?;
        let physics_time = reader.float()?;
        let physics_frame_time = reader.float()?;
        let script_time = reader.float()?;
        let group_count = reader.count()?;
        let function_count = reader.count()?;

        // Each group takes at least its name and pair count.
        reader.require_items(group_count, 2)?;
        let mut categories = Vec::with_capacity(group_count);
        for _ in 0..group_count {
            reader.require(2)?;
            let name = reader.string()?;
            let pair_count = reader.count()?;
            reader.require_items(pair_count, 2)?;

            let mut items = Vec::with_capacity(pair_count);
            for _ in 0..pair_count {
                items.push((reader.string()?, reader.float()?));
            }
            categories.push(FrameCategory { name, items });
        }

        reader.require_items(function_count, 4)?;
        let mut functions = Vec::with_capacity(function_count);
        for _ in 0..function_count {
            functions.push(FrameFunction {
                sig_id: reader.int()?,
                call_count: reader.int()?,
                self_time: reader.float()?,
                total_time: reader.float()?,
            });
        }

        Ok(Self {
            frame_number,
            frame_time,
            idle_time,
            physics_time,
            physics_frame_time,
            script_time,
            categories,
            functions,
        })
    }
}

/// Multiplayer traffic counters for one node.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NetworkNodeInfo {
    pub node: i64,
    pub node_path: String,
    pub incoming_rpc: i64,
    pub incoming_rset: i64,
    pub outgoing_rpc: i64,
    pub outgoing_rset: i64,
}

/// Wire layout: `[n, (node, node_path, incoming_rpc, incoming_rset,
/// outgoing_rpc, outgoing_rset)*n]`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NetworkProfilerFrame {
    pub infos: Vec<NetworkNodeInfo>,
}

impl WireRecord for NetworkProfilerFrame {
    const LABEL: &'static str = "network_profile";

    fn write_args(&self, out: &mut Vec<Variant>) {
        out.push(Variant::Int(self.infos.len() as i64));
        for info in &self.infos {
            out.push(info.node.into());
            out.push(info.node_path.as_str().into());
            out.push(info.incoming_rpc.into());
            out.push(info.incoming_rset.into());
            out.push(info.outgoing_rpc.into());
            out.push(info.outgoing_rset.into());
        }
    }

    fn read_args(reader: &mut ArgReader<'_>) -> Result<Self> {
        reader.require(1)?;
        let count = reader.count()?;
        reader.require_items(count, 6)?;

        let mut infos = Vec::with_capacity(count);
        for _ in 0..count {
            infos.push(NetworkNodeInfo {
                node: reader.int()?,
                node_path: reader.string()?,
                incoming_rpc: reader.int()?,
                incoming_rset: reader.int()?,
                outgoing_rpc: reader.int()?,
                outgoing_rset: reader.int()?,
            });
        }
        Ok(Self { infos })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DebugWireError;

    fn sample_frame() -> ProfilerFrame {
        ProfilerFrame {
            frame_number: 120,
            frame_time: 0.016,
            idle_time: 0.01,
            physics_time: 0.004,
            physics_frame_time: 0.0166,
            script_time: 0.002,
            categories: vec![FrameCategory {
                name: "physics".to_string(),
                items: vec![("step".to_string(), 0.001), ("sync".to_string(), 0.0005)],
            }],
            functions: vec![FrameFunction {
                sig_id: 3,
                call_count: 10,
                self_time: 0.0008,
                total_time: 0.0012,
            }],
        }
    }

    #[test]
    fn test_profiler_frame_round_trip() {
        let frame = sample_frame();
        let args = frame.to_args();
        assert_eq!(args[6], Variant::Int(1));
        assert_eq!(args[7], Variant::Int(1));
        assert_eq!(ProfilerFrame::from_args(&args).unwrap(), frame);
    }

    #[test]
    fn test_profiler_frame_truncated() {
        let args = sample_frame().to_args();
        for cut in 1..args.len() {
            let result = ProfilerFrame::from_args(&args[..args.len() - cut]);
            assert!(
                matches!(result, Err(DebugWireError::Malformed(_))),
                "cut {} accepted",
                cut
            );
        }
    }

    #[test]
    fn test_signature_round_trip() {
        let sig = ProfilerSignature {
            name: qualified_name("res://player.gd", 42, "_process"),
            id: 7,
        };
        assert_eq!(ProfilerSignature::from_args(&sig.to_args()).unwrap(), sig);
    }

    #[test]
    fn test_parse_qualified_name() {
        assert_eq!(
            parse_qualified_name("res://a.gd::12::run"),
            Some(("res://a.gd".to_string(), 12, "run".to_string()))
        );
        assert_eq!(
            parse_qualified_name("res://scene.tscn::1::5::_ready"),
            Some(("res://scene.tscn::1".to_string(), 5, "_ready".to_string()))
        );
        assert_eq!(parse_qualified_name("bogus"), None);
        assert_eq!(parse_qualified_name("a::x::f"), None);
    }

    #[test]
    fn test_network_frame_round_trip() {
        let frame = NetworkProfilerFrame {
            infos: vec![NetworkNodeInfo {
                node: 99,
                node_path: "/root/Player".to_string(),
                incoming_rpc: 1,
                incoming_rset: 2,
                outgoing_rpc: 3,
                outgoing_rset: 4,
            }],
        };
        let args = frame.to_args();
        assert_eq!(args.len(), 7);
        assert_eq!(NetworkProfilerFrame::from_args(&args).unwrap(), frame);
    }

    #[test]
    fn test_category_total() {
        let frame = sample_frame();
        assert!((frame.categories[0].total_time() - 0.0015).abs() < 1e-12);
    }
}
