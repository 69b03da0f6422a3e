//! The target: a worker running under controller supervision
//!
//! A target owns the worker thread, its interrupt token and its
//! [`StepTracer`]. An agent task applies [`ControlCommand`]s from the
//! controller and reports [`TargetEvent`]s back. Two transports produce the
//! same [`Connection`]:
//!
//! - [`launch_in_process`] - worker thread inside the calling process
//! - [`launch_process`] - worker inside a child `ih target` process, bridged
//!   over stdin/stdout JSON lines
//!
//! # Lifecycle
//!
//! ```text
//! VmStarted ─▶ (CreateStepRequest, Resume) ─▶ Step* ─▶ ThreadDeath ─▶ VmDeath ─▶ Disconnected
//!                                                 └── Exit{code} ─▶ VmDeath ─▶ Disconnected
//! ```

mod process;
mod tracer;

pub use process::{launch_process, serve_stdio};
pub use tracer::{StepTracer, WORKER_METHOD};

use std::sync::Arc;
use std::thread;

use eyre::{Context, Result};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::SignalError;
use crate::interrupt::{InterruptToken, Interruptible};
use crate::protocol::{ControlCommand, TargetEvent, TargetExit, ThreadId};
use crate::worker::{Worker, WorkerConfig, WorkerError};

/// Identity of the worker thread in every target
pub const MAIN_THREAD: ThreadId = ThreadId(1);

/// Controller's handle for sending commands to a target
#[derive(Clone, Debug)]
pub struct CommandSender {
    tx: mpsc::UnboundedSender<ControlCommand>,
}

impl CommandSender {
    pub fn new(tx: mpsc::UnboundedSender<ControlCommand>) -> Self {
        Self { tx }
    }

    /// Queue a command; fails once the target has closed its end
    pub fn send(&self, command: ControlCommand) -> Result<(), SignalError> {
        self.tx.send(command).map_err(|_| SignalError::Disconnected)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Both directions of the control channel
pub struct Connection {
    pub events: mpsc::UnboundedReceiver<TargetEvent>,
    pub commands: CommandSender,
}

impl Connection {
    /// Build a connection from raw channel ends
    pub fn new(events: mpsc::UnboundedReceiver<TargetEvent>, commands: mpsc::UnboundedSender<ControlCommand>) -> Self {
        Self {
            events,
            commands: CommandSender::new(commands),
        }
    }
}

/// Start a target inside this process
///
/// Must be called from within a tokio runtime; the agent runs as a task.
pub fn launch_in_process(config: WorkerConfig) -> Result<Connection> {
    debug!(mode = %config.mode, iterations = config.iterations, "launch_in_process: called");
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (exit_tx, exit_rx) = oneshot::channel();

    let token = Arc::new(InterruptToken::new());
    let tracer = Arc::new(StepTracer::new(MAIN_THREAD, event_tx.clone()));
    let worker = Worker::new(config, token.clone(), tracer.clone());

    let main_tracer = tracer.clone();
    thread::Builder::new()
        .name("target-main".to_string())
        .spawn(move || {
            let exit = match main_tracer.await_start() {
                Ok(()) => exit_for(worker.run()),
                Err(_) => TargetExit::forced(crate::protocol::EXIT_FORCED, "detached before start"),
            };
            // The agent may already be gone after a forced exit.
            let _ = exit_tx.send(exit);
        })
        .context("Failed to spawn target main thread")?;

    let _ = event_tx.send(TargetEvent::VmStarted { main_thread: MAIN_THREAD });

    let agent = Agent {
        token,
        tracer,
        events: event_tx,
    };
    tokio::spawn(agent.run(command_rx, exit_rx));

    Ok(Connection::new(event_rx, command_tx))
}

fn exit_for(result: Result<crate::worker::WorkerReport, WorkerError>) -> TargetExit {
    match result {
        Ok(report) => {
            info!(
                observed = report.interrupts_observed,
                sent = ?report.interrupts_sent,
                "Goodbye from target"
            );
            TargetExit::passed(report)
        }
        Err(e) => {
            warn!(error = %e, "Target worker failed");
            TargetExit::failed(e.to_string())
        }
    }
}

/// Applies controller commands to the running target
struct Agent {
    token: Arc<InterruptToken>,
    tracer: Arc<StepTracer>,
    events: mpsc::UnboundedSender<TargetEvent>,
}

impl Agent {
    async fn run(self, mut commands: mpsc::UnboundedReceiver<ControlCommand>, mut exited: oneshot::Receiver<TargetExit>) {
        let (exit, thread_died) = loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => {
                        if let Some(exit) = self.apply(command) {
                            break (exit, false);
                        }
                    }
                    None => {
                        debug!("Agent::run: controller went away, detaching");
                        self.tracer.detach();
                        break (TargetExit::forced(crate::protocol::EXIT_FORCED, "controller detached"), false);
                    }
                },
                exit = &mut exited => {
                    let exit = exit.unwrap_or_else(|_| TargetExit::failed("target main thread panicked"));
                    break (exit, true);
                }
            }
        };

        if thread_died {
            let _ = self.events.send(TargetEvent::ThreadDeath {
                thread: self.tracer.thread(),
            });
        }
        info!(code = exit.code, "Agent::run: target exiting");
        let _ = self.events.send(TargetEvent::VmDeath { exit });

        // Close the command channel before announcing the disconnect so that
        // anyone still signalling sees it as gone.
        drop(commands);
        let _ = self.events.send(TargetEvent::Disconnected);
    }

    /// Returns the exit when the command terminates the target
    fn apply(&self, command: ControlCommand) -> Option<TargetExit> {
        debug!(?command, "Agent::apply: called");
        match command {
            ControlCommand::CreateStepRequest { thread, suspend } => {
                if thread == self.tracer.thread() {
                    self.tracer.enable(suspend);
                } else {
                    warn!(%thread, "Agent::apply: step request for unknown thread");
                }
                None
            }
            ControlCommand::Resume => {
                self.tracer.resume();
                None
            }
            ControlCommand::Interrupt { thread } => {
                if thread == self.tracer.thread() {
                    self.token.interrupt();
                } else {
                    warn!(%thread, "Agent::apply: interrupt for unknown thread");
                }
                None
            }
            ControlCommand::Exit { code } => {
                info!(code, "Agent::apply: exit requested");
                self.tracer.detach();
                self.token.interrupt();
                Some(TargetExit::forced(code, "terminated by controller"))
            }
        }
    }
}
