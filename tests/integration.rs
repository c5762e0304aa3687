//! Integration tests for debugwire.
//!
//! These tests drive both ends of a debug session through the public API.

use std::thread;
use std::time::{Duration, Instant};

use debugwire::codec::Variant;
use debugwire::message::{
    OutputError, ScriptStackDump, StackFrame, StackFrameVars, WireRecord,
};
use debugwire::protocol::{build_frame, FrameBuffer, PacketBuffer, PacketInfo};
use debugwire::session::BreakpointSet;
use debugwire::{
    DebugWireError, DebuggerServer, DebuggerSession, EngineDebugger, MemoryPeer, Message,
    ScriptHost, SessionEvent, TcpDebuggerPeer,
};

const DEADLINE: Duration = Duration::from_secs(10);

struct GameHost;

impl ScriptHost for GameHost {
    fn stack_dump(&mut self) -> ScriptStackDump {
        ScriptStackDump {
            frames: vec![
                StackFrame::new("res://main.gd", 12, "_process"),
                StackFrame::new("res://main.gd", 3, "_ready"),
            ],
        }
    }

    fn stack_frame_vars(&mut self, frame: i32) -> debugwire::Result<StackFrameVars> {
        Ok(StackFrameVars {
            variables: vec![
                ("frame".to_string(), Variant::Int(frame as i64)),
                ("delta".to_string(), Variant::Float(0.016)),
            ],
        })
    }
}

/// Process the session until an event matching `pred` shows up. Events
/// after the match stay in `backlog` for the next call.
async fn wait_for<F>(
    session: &mut DebuggerSession,
    backlog: &mut Vec<SessionEvent>,
    pred: F,
) -> SessionEvent
where
    F: Fn(&SessionEvent) -> bool,
{
    let start = Instant::now();
    loop {
        if let Some(index) = backlog.iter().position(&pred) {
            return backlog.drain(..=index).last().unwrap();
        }
        backlog.extend(session.process().unwrap());
        assert!(start.elapsed() < DEADLINE, "timed out, events so far: {:?}", backlog);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

async fn accept(server: &mut DebuggerServer) -> TcpDebuggerPeer {
    let start = Instant::now();
    loop {
        if let Some(peer) = server.take_connection() {
            return peer;
        }
        assert!(start.elapsed() < DEADLINE, "no debuggee connected");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Full break cycle over TCP: breakpoint, stack inspection, continue.
#[tokio::test]
async fn test_break_cycle_over_tcp() {
    let mut server = DebuggerServer::default();
    server.start("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let addr = server.local_addr().unwrap();

    let debuggee = thread::spawn(move || {
        let mut debugger = EngineDebugger::builder()
            .uri(format!("tcp://{}", addr))
            .script_host(GameHost)
            .start()
            .unwrap();
        assert!(debugger.is_peer_connected());

        let start = Instant::now();
        while !debugger.script_debugger().is_breakpoint(12, "res://main.gd") {
            debugger.poll_events(false);
            assert!(start.elapsed() < DEADLINE, "breakpoint never arrived");
            thread::sleep(Duration::from_millis(5));
        }

        assert!(!debugger.script_debugger_mut().should_break(11, "res://main.gd"));
        assert!(debugger.script_debugger_mut().should_break(12, "res://main.gd"));
        debugger.debug(true, "Breakpoint").unwrap();

        debugger.send_output("resumed");
        debugger.poll_events(false);
        debugger.deinitialize();
    });

    let peer = accept(&mut server).await;
    let mut session = DebuggerSession::new();
    session.start(Box::new(peer));
    let mut backlog = Vec::new();

    let pid = wait_for(&mut session, &mut backlog, |e| matches!(e, SessionEvent::Pid(_))).await;
    assert_eq!(pid, SessionEvent::Pid(std::process::id() as i64));

    assert!(matches!(
        session.next(),
        Err(DebugWireError::FailedPrecondition(_))
    ));
    session.set_breakpoint("res://main.gd", 12, true).unwrap();

    let breaked = wait_for(&mut session, &mut backlog, |e| {
        matches!(e, SessionEvent::Breaked { .. })
    })
    .await;
    assert_eq!(
        breaked,
        SessionEvent::Breaked {
            can_continue: true,
            reason: "Breakpoint".to_string()
        }
    );
    assert!(session.is_breaked());

    wait_for(&mut session, &mut backlog, |e| matches!(e, SessionEvent::StackDump(_))).await;
    let dump = session.stack_dump().unwrap();
    assert_eq!(dump.frames.len(), 2);
    assert_eq!(dump.frames[0].function, "_process");

    session.request_stack_frame_vars(1).unwrap();
    let vars = wait_for(&mut session, &mut backlog, |e| {
        matches!(e, SessionEvent::StackFrameVars(_))
    })
    .await;
    match vars {
        SessionEvent::StackFrameVars(vars) => {
            assert_eq!(vars.variables[0], ("frame".to_string(), Variant::Int(1)));
        }
        other => panic!("unexpected event {:?}", other),
    }

    session.continue_execution().unwrap();
    wait_for(&mut session, &mut backlog, |e| matches!(e, SessionEvent::Resumed)).await;
    assert!(!session.is_breaked());

    let output = wait_for(&mut session, &mut backlog, |e| matches!(e, SessionEvent::Output(_))).await;
    assert_eq!(output, SessionEvent::Output(vec!["resumed".to_string()]));

    wait_for(&mut session, &mut backlog, |e| matches!(e, SessionEvent::Stopped)).await;
    assert!(!session.is_peer_connected());

    debuggee.join().unwrap();
    server.stop();
}

/// Stepping over an in-process connection.
#[test]
fn test_step_commands_over_memory_peer() {
    let (engine_end, session_end) = MemoryPeer::pair();
    let mut debugger = EngineDebugger::builder()
        .peer(Box::new(engine_end))
        .start()
        .unwrap();
    let mut session = DebuggerSession::new();
    session.start(Box::new(session_end));

    session.request_break().unwrap();
    debugger.poll_events(false);
    assert!(debugger.script_debugger_mut().should_break(1, "res://a.gd"));

    // Queue the answer first: the break loop only returns on a resume command.
    session
        .send_message(Message::bare(debugwire::message::names::STEP))
        .unwrap();
    debugger.debug(true, "Break").unwrap();

    let events = session.process().unwrap();
    assert!(events.contains(&SessionEvent::Breaked {
        can_continue: true,
        reason: "Break".to_string()
    }));
    assert!(events.contains(&SessionEvent::Resumed));
    assert_eq!(debugger.script_debugger().lines_left(), 1);
    assert_eq!(debugger.script_debugger().depth(), -1);
}

#[test]
fn test_breakpoints_shared_line() {
    let mut set = BreakpointSet::new();
    set.insert(42, "a.gd");
    set.insert(42, "b.gd");

    set.remove(42, "a.gd");
    assert!(set.is_breakpoint_line(42));
    assert!(set.is_breakpoint(42, "b.gd"));

    set.remove(42, "b.gd");
    assert!(!set.is_breakpoint_line(42));
}

#[test]
fn test_output_error_round_trip_and_truncation() {
    let error = OutputError {
        hr: 1,
        min: 2,
        sec: 3,
        msec: 4,
        source_file: "x.gd".to_string(),
        source_func: "f".to_string(),
        source_line: 10,
        error: "E".to_string(),
        error_descr: String::new(),
        warning: false,
        callstack: Vec::new(),
    };

    let message = Message::from_record("error", &error);
    let encoded = message.encode(1024 * 1024).unwrap();
    let decoded = Message::decode(&encoded).unwrap();
    assert_eq!(decoded.parse_args::<OutputError>().unwrap(), error);

    let args = error.to_args();
    assert!(matches!(
        OutputError::from_args(&args[..args.len() - 1]),
        Err(DebugWireError::Malformed(_))
    ));
}

#[derive(Debug, Clone, Copy, Default)]
struct TestInfo(usize);

impl PacketInfo for TestInfo {
    fn size(&self) -> usize {
        self.0
    }
}

#[test]
fn test_packet_buffer_space_accounting() {
    let mut buffer: PacketBuffer<TestInfo> = PacketBuffer::new(4, 64);

    for _ in 0..3 {
        buffer.write_packet(TestInfo(20), &[7u8; 20]).unwrap();
    }
    assert!(matches!(
        buffer.write_packet(TestInfo(10), &[1u8; 10]),
        Err(DebugWireError::OutOfMemory(_))
    ));
    assert_eq!(buffer.packets_left(), 3);

    let (info, payload) = buffer.read_packet().unwrap();
    assert_eq!(info.size(), payload.len());
    buffer.write_packet(TestInfo(10), &[1u8; 10]).unwrap();
    assert_eq!(buffer.packets_left(), 3);
}

#[test]
fn test_stream_frames_survive_byte_splits() {
    let first = Message::new("output", vec!["hello".into()]).encode(1024).unwrap();
    let second = Message::bare("continue").encode(1024).unwrap();
    let mut wire = build_frame(&first).unwrap();
    wire.extend(build_frame(&second).unwrap());

    let mut buffer = FrameBuffer::new();
    let mut frames = Vec::new();
    for chunk in wire.chunks(3) {
        frames.extend(buffer.push(chunk).unwrap());
    }

    assert_eq!(frames.len(), 2);
    assert_eq!(Message::decode(&frames[0]).unwrap().name, "output");
    assert_eq!(Message::decode(&frames[1]).unwrap().name, "continue");
    assert!(buffer.is_empty());
}

#[test]
fn test_oversized_argument_sent_as_nil() {
    let big = "x".repeat(4096);
    let message = Message::new("output", vec![big.as_str().into(), "small".into()]);
    let decoded = Message::decode(&message.encode(1024).unwrap()).unwrap();
    assert_eq!(decoded.args, vec![Variant::Nil, Variant::from("small")]);
}
