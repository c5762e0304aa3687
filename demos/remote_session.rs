//! Remote Session - both ends of a debug session in one process.
//!
//! This example demonstrates:
//! - Accepting a debuggee connection with `DebuggerServer`
//! - Running an `EngineDebugger` on its own thread, connected over TCP
//! - Setting a breakpoint, inspecting the stack and resuming
//!
//! # Running
//!
//! ```text
//! RUST_LOG=debugwire=debug cargo run --example remote_session
//! ```

use std::thread;
use std::time::Duration;

use debugwire::message::{ScriptStackDump, StackFrame, StackFrameVars};
use debugwire::{
    DebuggerServer, DebuggerSession, EngineDebugger, ScriptHost, SessionEvent,
};
use tracing_subscriber::EnvFilter;

const SCRIPT: &str = "res://player.gd";
const BREAK_LINE: i32 = 27;

/// Pretend script runtime: one call stack, one local.
struct Player {
    line: i32,
}

impl ScriptHost for Player {
    fn stack_dump(&mut self) -> ScriptStackDump {
        ScriptStackDump {
            frames: vec![
                StackFrame::new(SCRIPT, self.line, "_physics_process"),
                StackFrame::new("res://world.gd", 8, "_process"),
            ],
        }
    }

    fn stack_frame_vars(&mut self, _frame: i32) -> debugwire::Result<StackFrameVars> {
        Ok(StackFrameVars {
            variables: vec![("line".to_string(), (self.line as i64).into())],
        })
    }
}

/// Debuggee side: run "script lines" until the breakpoint hits.
fn run_game(uri: String) -> debugwire::Result<()> {
    let mut debugger = EngineDebugger::builder()
        .uri(uri)
        .script_host(Player { line: 0 })
        .start()?;

    for frame in 0..200 {
        for line in 20..30 {
            debugger.line_poll();
            if debugger.script_debugger_mut().should_break(line, SCRIPT) {
                debugger.send_output(format!("hit {}:{} on frame {}", SCRIPT, line, frame));
                debugger.debug(true, "Breakpoint")?;
                debugger.deinitialize();
                return Ok(());
            }
        }
        debugger.iteration(16_000, 4_000, 2_000, 1.0 / 60.0);
        thread::sleep(Duration::from_millis(16));
    }

    debugger.deinitialize();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut server = DebuggerServer::default();
    server.start("127.0.0.1:0".parse()?).await?;
    let addr = server.local_addr().ok_or("server has no address")?;
    println!("Debugger listening on {}", addr);

    let game = thread::spawn(move || run_game(format!("tcp://{}", addr)));

    let peer = loop {
        if let Some(peer) = server.take_connection() {
            break peer;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    };

    let mut session = DebuggerSession::new();
    session.start(Box::new(peer));
    session.set_breakpoint(SCRIPT, BREAK_LINE, true)?;

    'session: loop {
        for event in session.process()? {
            match event {
                SessionEvent::Pid(pid) => println!("Debuggee pid {}", pid),
                SessionEvent::Output(lines) => {
                    for line in lines {
                        println!("[game] {}", line);
                    }
                }
                SessionEvent::Breaked { reason, .. } => {
                    println!("Stopped: {}", reason);
                    session.request_stack_frame_vars(0)?;
                }
                SessionEvent::StackDump(dump) => {
                    for (depth, frame) in dump.frames.iter().enumerate() {
                        println!("  #{} {}:{} in {}", depth, frame.file, frame.line, frame.function);
                    }
                }
                SessionEvent::StackFrameVars(vars) => {
                    for (name, value) in &vars.variables {
                        println!("  {} = {:?}", name, value);
                    }
                    session.continue_execution()?;
                }
                SessionEvent::Resumed => println!("Resumed"),
                SessionEvent::Stopped => break 'session,
                _ => {}
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    game.join().map_err(|_| "game thread panicked")??;
    server.stop();
    Ok(())
}
