//! The controller: single-steps a target and watches for hangs
//!
//! The controller owns the event side of a [`Connection`]. It installs a step
//! request on the target's main thread, counts step events into a
//! [`StepCounter`], and starts a [`Watchdog`] at the first step. In remote
//! mode it also runs the interrupt generator, signalling the target through a
//! [`ThreadRef`].

mod journal;
mod thread_ref;
mod watchdog;

pub use journal::{EventJournal, JournalEntry, read_journal};
pub use thread_ref::ThreadRef;
pub use watchdog::{HangReport, StepCounter, Watchdog, WatchdogHandle};

use std::sync::Arc;
use std::time::Duration;

use eyre::{Context, Result, eyre};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::generator::{Generator, GeneratorHandle, RemoteGenerator, RemoteThread};
use crate::mode::Mode;
use crate::protocol::{ControlCommand, EXIT_FORCED, SuspendPolicy, TargetEvent, TargetExit};
use crate::report::RunReport;
use crate::target::{CommandSender, Connection};
use crate::worker::DEFAULT_GENERATOR_PAUSE;

/// Watchdog interval before the timeout factor is applied
pub const DEFAULT_WATCHDOG_INTERVAL: Duration = Duration::from_secs(20);

/// How long a hung target gets to disconnect after `Exit`
pub const DEFAULT_EXIT_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControllerConfig {
    pub mode: Mode,
    /// Effective interval, already scaled by the timeout factor
    pub watchdog_interval: Duration,
    pub suspend: SuspendPolicy,
    pub remote_pause: Duration,
    pub exit_grace: Duration,
}

impl ControllerConfig {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            watchdog_interval: DEFAULT_WATCHDOG_INTERVAL,
            suspend: SuspendPolicy::Thread,
            remote_pause: DEFAULT_GENERATOR_PAUSE,
            exit_grace: DEFAULT_EXIT_GRACE,
        }
    }
}

/// Scale a base interval by the timeout factor
///
/// Fails when the product is negative, not finite, or does not fit a `Duration`.
pub fn scaled_interval(base: Duration, factor: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(base.as_secs_f64() * factor)
        .context(format!("Watchdog interval {:?} scaled by {} is out of range", base, factor))
}

pub struct Controller {
    config: ControllerConfig,
    run_id: String,
    steps: Arc<StepCounter>,
    journal: Option<EventJournal>,
}

/// Per-run state owned by the event loop
#[derive(Default)]
struct RunState {
    thread: Option<ThreadRef>,
    remote: Option<GeneratorHandle>,
    watchdog: Option<WatchdogHandle>,
    exit: Option<TargetExit>,
}

impl Controller {
    pub fn new(config: ControllerConfig) -> Self {
        Self {
            config,
            run_id: Uuid::now_v7().to_string(),
            steps: Arc::new(StepCounter::new()),
            journal: None,
        }
    }

    pub fn with_journal(mut self, journal: EventJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Drive the target until it disconnects or hangs
    pub async fn run(mut self, connection: Connection) -> Result<RunReport> {
        info!(run_id = %self.run_id, mode = %self.config.mode, "Controller::run: started");
        let Connection { mut events, commands } = connection;
        let mut state = RunState::default();
        let mut hang = None;

        loop {
            let event = tokio::select! {
                event = events.recv() => event,
                report = hang_verdict(&mut state.watchdog) => {
                    hang = Some(report);
                    break;
                }
            };
            let Some(event) = event else {
                debug!("Controller::run: event channel closed");
                break;
            };
            if self.handle(event, &commands, &mut state)? {
                break;
            }
        }

        if let Some(report) = &hang {
            warn!(steps = report.steps, "Controller::run: forcing target exit");
            self.force_exit(&mut events, &commands, &mut state).await;
        }

        // A dead reference ends the remote generator even if the target never
        // disconnected.
        if let Some(thread) = &state.thread {
            thread.mark_dead();
        }
        drop(commands);

        let remote = match state.remote.take() {
            Some(handle) => Some(join_remote(handle).await?),
            None => None,
        };
        if let Some(watchdog) = state.watchdog.take() {
            watchdog.cancel().await;
        }

        let report = RunReport {
            run_id: self.run_id,
            mode: self.config.mode,
            steps: self.steps.get(),
            hang,
            exit: state.exit,
            remote,
        };
        info!(run_id = %report.run_id, passed = report.passed(), steps = report.steps, "Controller::run: finished");
        Ok(report)
    }

    /// Apply one event; returns true once the target has disconnected
    fn handle(&mut self, event: TargetEvent, commands: &CommandSender, state: &mut RunState) -> Result<bool> {
        self.record(&event);
        match event {
            TargetEvent::VmStarted { main_thread } => {
                debug!(%main_thread, "Controller::handle: target started");
                let thread = ThreadRef::new(main_thread, commands.clone());
                send(
                    commands,
                    ControlCommand::CreateStepRequest {
                        thread: main_thread,
                        suspend: self.config.suspend,
                    },
                );
                if self.config.mode == Mode::Remote {
                    let generator = RemoteGenerator::new(Box::new(thread.clone()), self.config.remote_pause);
                    let handle = Generator::Remote(generator)
                        .spawn()
                        .context("Failed to spawn remote generator")?;
                    state.remote = Some(handle);
                }
                state.thread = Some(thread);
                send(commands, ControlCommand::Resume);
            }
            TargetEvent::Step {
                thread,
                location,
                suspended,
            } => {
                let count = self.steps.increment();
                if state.watchdog.is_none() {
                    state.watchdog = Some(Watchdog::new(self.config.watchdog_interval, self.steps.clone()).spawn());
                }
                if count % 1000 == 0 {
                    debug!(count, %thread, %location, "Controller::handle: steps");
                }
                if suspended {
                    send(commands, ControlCommand::Resume);
                }
            }
            TargetEvent::ThreadDeath { thread } => {
                debug!(%thread, "Controller::handle: thread died");
                if let Some(known) = state.thread.as_ref().filter(|t| t.id() == thread) {
                    known.mark_dead();
                }
            }
            TargetEvent::VmDeath { exit } => {
                info!(code = exit.code, "Controller::handle: target exited");
                state.exit = Some(exit);
            }
            TargetEvent::Disconnected => {
                debug!("Controller::handle: target disconnected");
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Send `Exit` and collect the target's last events within the grace period
    async fn force_exit(
        &mut self,
        events: &mut mpsc::UnboundedReceiver<TargetEvent>,
        commands: &CommandSender,
        state: &mut RunState,
    ) {
        send(commands, ControlCommand::Exit { code: EXIT_FORCED });

        let grace = self.config.exit_grace;
        let drained = tokio::time::timeout(grace, async {
            while let Some(event) = events.recv().await {
                self.record(&event);
                match event {
                    TargetEvent::VmDeath { exit } => state.exit = Some(exit),
                    TargetEvent::Disconnected => break,
                    _ => {}
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(grace_secs = grace.as_secs_f64(), "Target did not disconnect after Exit");
        }
    }

    fn record(&mut self, event: &TargetEvent) {
        let Some(journal) = self.journal.as_mut() else {
            return;
        };
        if let Err(e) = journal.record(event) {
            warn!(path = ?journal.path(), error = %e, "Failed to journal event; journaling disabled");
            self.journal = None;
        }
    }
}

async fn hang_verdict(watchdog: &mut Option<WatchdogHandle>) -> HangReport {
    match watchdog {
        Some(watchdog) => watchdog.verdict().await,
        None => std::future::pending().await,
    }
}

fn send(commands: &CommandSender, command: ControlCommand) {
    if let Err(e) = commands.send(command) {
        // The target is going away; its Disconnected will end the loop.
        debug!(error = %e, "Controller: command not delivered");
    }
}

async fn join_remote(handle: GeneratorHandle) -> Result<Result<crate::generator::GeneratorReport, String>> {
    debug!(name = handle.name(), "join_remote: waiting");
    let result = tokio::task::spawn_blocking(move || handle.join())
        .await
        .map_err(|e| eyre!("Remote generator join task failed: {}", e))?;
    Ok(result.map_err(|e| e.to_string()))
}
