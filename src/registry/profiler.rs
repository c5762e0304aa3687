//! Profilers plugged into the debugger.
//!
//! A profiler is toggled by the controller, fed samples through `add` by
//! whatever code it measures, and ticked once per frame with the frame
//! timings. Anything it wants to report goes into the tick outbox.
//!
//! # Example
//!
//! ```ignore
//! let fps = FnProfiler::new(|enabled, _opts| println!("fps profiler: {}", enabled))
//!     .on_tick(|times, outbox| {
//!         outbox.push(Message::new("fps:frame", vec![times.frame_time.into()]));
//!     });
//! registry.register_profiler("fps", fps)?;
//! ```

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::codec::Variant;
use crate::message::{
    names, ArgReader, FrameFunction, Message, NetworkNodeInfo, NetworkProfilerFrame,
    ProfilerFrame, ProfilerSignature, StartProfiling, WireRecord,
};

/// Timings of one frame, in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameTimes {
    pub frame_time: f64,
    pub idle_time: f64,
    pub physics_time: f64,
    pub physics_frame_time: f64,
}

/// A pluggable profiler.
pub trait Profiler: Send {
    /// Turn the profiler on or off. `opts` are the extra arguments of the
    /// request that toggled it.
    fn toggle(&mut self, enable: bool, opts: &[Variant]);

    /// Accept one sample.
    fn add(&mut self, _data: &[Variant]) {}

    /// Called once per frame while active.
    fn tick(&mut self, _times: &FrameTimes, _outbox: &mut Vec<Message>) {}
}

type ToggleFn = Box<dyn FnMut(bool, &[Variant]) + Send>;
type AddFn = Box<dyn FnMut(&[Variant]) + Send>;
type TickFn = Box<dyn FnMut(&FrameTimes, &mut Vec<Message>) + Send>;

/// [`Profiler`] assembled from closures.
pub struct FnProfiler {
    toggle: ToggleFn,
    add: Option<AddFn>,
    tick: Option<TickFn>,
}

impl FnProfiler {
    pub fn new<F>(toggle: F) -> Self
    where
        F: FnMut(bool, &[Variant]) + Send + 'static,
    {
        Self {
            toggle: Box::new(toggle),
            add: None,
            tick: None,
        }
    }

    pub fn on_add<F>(mut self, add: F) -> Self
    where
        F: FnMut(&[Variant]) + Send + 'static,
    {
        self.add = Some(Box::new(add));
        self
    }

    pub fn on_tick<F>(mut self, tick: F) -> Self
    where
        F: FnMut(&FrameTimes, &mut Vec<Message>) + Send + 'static,
    {
        self.tick = Some(Box::new(tick));
        self
    }
}

impl Profiler for FnProfiler {
    fn toggle(&mut self, enable: bool, opts: &[Variant]) {
        (self.toggle)(enable, opts)
    }

    fn add(&mut self, data: &[Variant]) {
        if let Some(add) = self.add.as_mut() {
            add(data)
        }
    }

    fn tick(&mut self, times: &FrameTimes, outbox: &mut Vec<Message>) {
        if let Some(tick) = self.tick.as_mut() {
            tick(times, outbox)
        }
    }
}

// ============================================================================
// Script function profiler
// ============================================================================

/// Name the script profiler is registered under.
pub const SCRIPTS_PROFILER: &str = "scripts";

/// Aggregates per-function script timings and reports the most expensive
/// ones every frame.
///
/// Samples are `[qualified_name, call_count, self_time, total_time]`, with
/// names in `script::line::function` form. Each name gets a small signature
/// id, announced once with `profile_sig` before the first frame using it.
/// Toggle options: `[max_functions]`, clamped to 16..=512.
pub struct ScriptsProfiler {
    max_functions: usize,
    signatures: HashMap<String, i64>,
    pending: HashMap<String, FrameFunction>,
    frame_number: i64,
}

impl ScriptsProfiler {
    pub fn new() -> Self {
        Self {
            max_functions: StartProfiling::MIN_FUNCTIONS as usize,
            signatures: HashMap::new(),
            pending: HashMap::new(),
            frame_number: 0,
        }
    }

    fn signature(&mut self, name: &str, outbox: &mut Vec<Message>) -> i64 {
        if let Some(id) = self.signatures.get(name) {
            return *id;
        }
        let id = self.signatures.len() as i64 + 1;
        self.signatures.insert(name.to_string(), id);
        let signature = ProfilerSignature {
            name: name.to_string(),
            id,
        };
        outbox.push(Message::new(names::PROFILE_SIG, signature.to_args()));
        id
    }
}

impl Default for ScriptsProfiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Profiler for ScriptsProfiler {
    fn toggle(&mut self, enable: bool, opts: &[Variant]) {
        self.pending.clear();
        if !enable {
            return;
        }
        let requested = opts
            .first()
            .and_then(Variant::as_int)
            .unwrap_or(StartProfiling::MIN_FUNCTIONS);
        self.max_functions = StartProfiling::clamped(requested).max_functions as usize;
        self.signatures.clear();
        self.frame_number = 0;
    }

    fn add(&mut self, data: &[Variant]) {
        let mut reader = ArgReader::new("script profiler sample", data);
        let sample = reader.require(4).and_then(|_| {
            Ok((reader.string()?, reader.int()?, reader.float()?, reader.float()?))
        });
        let (name, calls, self_time, total_time) = match sample {
            Ok(sample) => sample,
            Err(e) => {
                tracing::warn!("Ignoring script profiler sample: {}", e);
                return;
            }
        };

        let entry = self.pending.entry(name).or_default();
        entry.call_count += calls;
        entry.self_time += self_time;
        entry.total_time += total_time;
    }

    fn tick(&mut self, times: &FrameTimes, outbox: &mut Vec<Message>) {
        let mut samples: Vec<(String, FrameFunction)> = self.pending.drain().collect();
        samples.sort_by(|a, b| b.1.self_time.total_cmp(&a.1.self_time));
        let script_time = samples.iter().map(|(_, f)| f.self_time).sum();
        samples.truncate(self.max_functions);

        let mut functions = Vec::with_capacity(samples.len());
        for (name, mut function) in samples {
            function.sig_id = self.signature(&name, outbox);
            functions.push(function);
        }

        self.frame_number += 1;
        let frame = ProfilerFrame {
            frame_number: self.frame_number,
            frame_time: times.frame_time,
            idle_time: times.idle_time,
            physics_time: times.physics_time,
            physics_frame_time: times.physics_frame_time,
            script_time,
            categories: Vec::new(),
            functions,
        };
        outbox.push(Message::new(names::PROFILE_FRAME, frame.to_args()));
    }
}

// ============================================================================
// Network profiler
// ============================================================================

/// Name the network profiler is registered under.
pub const NETWORK_PROFILER: &str = "network";

/// Minimum time between two network reports.
const NETWORK_REPORT_INTERVAL: Duration = Duration::from_millis(100);

/// Accumulates per-node RPC counters and bandwidth.
///
/// Samples are either a node record `[node, node_path, incoming_rpc,
/// incoming_rset, outgoing_rpc, outgoing_rset]` or a bandwidth reading
/// `[incoming, outgoing]`. Reports go out at most every 100 ms as
/// `network_profile` plus `network_bandwidth`.
pub struct NetworkProfiler {
    nodes: HashMap<i64, NetworkNodeInfo>,
    bandwidth: Option<(i64, i64)>,
    last_report: Option<Instant>,
}

impl NetworkProfiler {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            bandwidth: None,
            last_report: None,
        }
    }

    fn add_node(&mut self, reader: &mut ArgReader<'_>) -> crate::error::Result<()> {
        let node = reader.int()?;
        let node_path = reader.string()?;
        let counters = [reader.int()?, reader.int()?, reader.int()?, reader.int()?];

        let info = self.nodes.entry(node).or_insert_with(|| NetworkNodeInfo {
            node,
            node_path,
            ..NetworkNodeInfo::default()
        });
        info.incoming_rpc += counters[0];
        info.incoming_rset += counters[1];
        info.outgoing_rpc += counters[2];
        info.outgoing_rset += counters[3];
        Ok(())
    }
}

impl Default for NetworkProfiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Profiler for NetworkProfiler {
    fn toggle(&mut self, _enable: bool, _opts: &[Variant]) {
        self.nodes.clear();
        self.bandwidth = None;
        self.last_report = None;
    }

    fn add(&mut self, data: &[Variant]) {
        let mut reader = ArgReader::new("network profiler sample", data);
        let result = match data.len() {
            2 => reader
                .int()
                .and_then(|incoming| Ok((incoming, reader.int()?)))
                .map(|bandwidth| self.bandwidth = Some(bandwidth)),
            6 => self.add_node(&mut reader),
            n => Err(crate::error::DebugWireError::Malformed(format!(
                "Malformed network profiler sample, expected 2 or 6 values, got {}",
                n
            ))),
        };
        if let Err(e) = result {
            tracing::warn!("Ignoring network profiler sample: {}", e);
        }
    }

    fn tick(&mut self, _times: &FrameTimes, outbox: &mut Vec<Message>) {
        let now = Instant::now();
        if let Some(last) = self.last_report {
            if now.duration_since(last) < NETWORK_REPORT_INTERVAL {
                return;
            }
        }
        self.last_report = Some(now);

        let mut infos: Vec<NetworkNodeInfo> = self.nodes.drain().map(|(_, info)| info).collect();
        infos.sort_by_key(|info| info.node);
        let frame = NetworkProfilerFrame { infos };
        outbox.push(Message::new(names::NETWORK_PROFILE, frame.to_args()));

        if let Some((incoming, outgoing)) = self.bandwidth {
            outbox.push(Message::new(
                names::NETWORK_BANDWIDTH,
                vec![incoming.into(), outgoing.into()],
            ));
        }
    }
}
