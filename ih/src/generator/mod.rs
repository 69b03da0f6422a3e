//! Interrupt generators
//!
//! A generator repeatedly aborts the worker's blocking wait. The strategy
//! decides how it is paced and whether it coordinates with the worker:
//!
//! - [`PreciseGenerator`] - one interrupt per worker iteration, hand-off
//!   through a [`Rendezvous`]
//! - [`AggressiveGenerator`] - fixed short pace, no coordination
//! - [`RemoteGenerator`] - controller side, signals through a [`RemoteThread`]
//!
//! Every strategy shares the [`Generator::run`] contract: run until the
//! `stop` token is interrupted (or, for remote, until the target goes away)
//! and report how many interrupts were sent.

mod aggressive;
mod precise;
mod remote;

pub use aggressive::AggressiveGenerator;
pub use precise::PreciseGenerator;
pub use remote::{RemoteGenerator, RemoteThread};

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::error::{SignalError, WaitError};
use crate::interrupt::{InterruptToken, Interruptible};
use crate::mode::Mode;
use crate::rendezvous::Rendezvous;

/// Final count reported by a generator
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratorReport {
    pub strategy: Mode,
    pub interrupts_sent: u64,
}

/// Fatal generator failures
#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("Generator wait failed: {0}")]
    Wait(#[from] WaitError),

    #[error("Generator was interrupted unexpectedly after {sent} interrupts sent")]
    UnexpectedInterrupt { sent: u64 },

    #[error("Signal failed after {sent} interrupts sent: {source}")]
    Signal {
        sent: u64,
        #[source]
        source: SignalError,
    },

    #[error("Generator thread panicked")]
    Panicked,
}

/// A generator strategy with its strategy-specific state
pub enum Generator {
    Precise(PreciseGenerator),
    Aggressive(AggressiveGenerator),
    Remote(RemoteGenerator),
}

impl Generator {
    pub fn strategy(&self) -> Mode {
        match self {
            Generator::Precise(_) => Mode::Precise,
            Generator::Aggressive(_) => Mode::Aggressive,
            Generator::Remote(_) => Mode::Remote,
        }
    }

    fn thread_name(&self) -> &'static str {
        match self {
            Generator::Precise(_) => "precise-interruptor",
            Generator::Aggressive(_) => "aggressive-interruptor",
            Generator::Remote(_) => "remote-interruptor",
        }
    }

    /// Run on the calling thread until stopped
    pub fn run(self, stop: &dyn Interruptible) -> Result<GeneratorReport, GeneratorError> {
        match self {
            Generator::Precise(g) => g.run(stop),
            Generator::Aggressive(g) => g.run(stop),
            Generator::Remote(g) => g.run(stop),
        }
    }

    /// Run on a dedicated named thread
    pub fn spawn(self) -> io::Result<GeneratorHandle> {
        let name = self.thread_name();
        let rendezvous = match &self {
            Generator::Precise(g) => Some(g.rendezvous()),
            _ => None,
        };
        let stop = Arc::new(InterruptToken::new());
        let thread_stop = stop.clone();

        debug!(name, "Generator::spawn: starting thread");
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || self.run(thread_stop.as_ref()))?;

        Ok(GeneratorHandle {
            name,
            stop,
            rendezvous,
            thread,
        })
    }
}

/// A generator running on its own thread
pub struct GeneratorHandle {
    name: &'static str,
    stop: Arc<InterruptToken>,
    rendezvous: Option<Arc<Rendezvous>>,
    thread: JoinHandle<Result<GeneratorReport, GeneratorError>>,
}

impl GeneratorHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Interrupt the generator thread
    ///
    /// In precise mode the interrupt is delivered under the rendezvous lock so
    /// it cannot slip between a hand-off and the generator's next wait.
    pub fn stop(&self) -> Result<(), WaitError> {
        debug!(name = self.name, "GeneratorHandle::stop: called");
        match &self.rendezvous {
            Some(rendezvous) => rendezvous.interrupt(self.stop.as_ref()),
            None => {
                self.stop.interrupt();
                Ok(())
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the generator to exit
    pub fn join(self) -> Result<GeneratorReport, GeneratorError> {
        debug!(name = self.name, "GeneratorHandle::join: waiting");
        self.thread.join().map_err(|_| GeneratorError::Panicked)?
    }
}
