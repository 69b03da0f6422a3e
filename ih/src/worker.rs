//! The interruptible worker
//!
//! Runs a fixed number of iterations, each one a blocking sleep that must be
//! aborted by an interrupt. Owns its local generator (precise and aggressive
//! modes) and stops it on every exit path.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::{ProtocolViolation, WaitError};
use crate::generator::{AggressiveGenerator, Generator, GeneratorError, GeneratorHandle, PreciseGenerator};
use crate::interrupt::{Interruptible, SleepOutcome};
use crate::mode::Mode;
use crate::rendezvous::Rendezvous;

/// Default number of iterations per run
pub const DEFAULT_ITERATIONS: u32 = 200;

/// Default length of each blocking wait
pub const DEFAULT_SLEEP: Duration = Duration::from_millis(100);

/// Default pace of the aggressive and remote generators
pub const DEFAULT_GENERATOR_PAUSE: Duration = Duration::from_millis(5);

/// Source lines reported to the step probe
pub mod lines {
    pub const LOOP: u32 = 1;
    pub const SLEEP: u32 = 2;
    pub const CAUGHT: u32 = 3;
    pub const ACK: u32 = 4;
    pub const CHECK: u32 = 5;
    pub const DONE: u32 = 6;
}

/// The probe was detached because the target is being torn down
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("Step probe detached")]
pub struct Detached;

/// Observer of the worker's line-by-line progress
pub trait StepProbe: Send + Sync {
    /// Called at each source-line boundary of the worker loop
    fn line(&self, line: u32) -> Result<(), Detached>;
}

/// Probe for untraced runs
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProbe;

impl StepProbe for NoProbe {
    fn line(&self, _line: u32) -> Result<(), Detached> {
        Ok(())
    }
}

/// Worker errors
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Violation(#[from] ProtocolViolation),

    #[error("Wait failed: {0}")]
    Wait(#[from] WaitError),

    #[error("Worker detached: target terminated")]
    Detached(#[from] Detached),

    #[error("Generator failed: {0}")]
    Generator(#[from] GeneratorError),

    #[error("Failed to spawn generator: {0}")]
    Spawn(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerConfig {
    pub mode: Mode,
    pub iterations: u32,
    pub sleep: Duration,
    pub generator_pause: Duration,
}

impl WorkerConfig {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            iterations: DEFAULT_ITERATIONS,
            sleep: DEFAULT_SLEEP,
            generator_pause: DEFAULT_GENERATOR_PAUSE,
        }
    }
}

/// Counters reported when the worker finishes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerReport {
    pub mode: Mode,
    pub iterations_completed: u32,
    pub interrupts_observed: u64,
    /// Count from the local generator; `None` when the generator is remote
    pub interrupts_sent: Option<u64>,
}

pub struct Worker {
    config: WorkerConfig,
    token: Arc<dyn Interruptible>,
    probe: Arc<dyn StepProbe>,
    iterations_completed: u32,
    interrupts_observed: u64,
}

impl Worker {
    /// `token` must be the interrupt token of the thread that calls [`Worker::run`]
    pub fn new(config: WorkerConfig, token: Arc<dyn Interruptible>, probe: Arc<dyn StepProbe>) -> Self {
        Self {
            config,
            token,
            probe,
            iterations_completed: 0,
            interrupts_observed: 0,
        }
    }

    pub fn run(mut self) -> Result<WorkerReport, WorkerError> {
        debug!(mode = %self.config.mode, iterations = self.config.iterations, "Worker::run: called");

        let rendezvous = (self.config.mode == Mode::Precise).then(|| Arc::new(Rendezvous::new()));
        let generator = self.spawn_generator(rendezvous.clone())?;

        let outcome = self.iterate(rendezvous.as_deref());

        let sent = match generator {
            Some(handle) => match Self::stop_generator(handle) {
                Ok(sent) => Some(sent),
                Err(e) => {
                    // The loop's own failure is the more specific one.
                    outcome?;
                    return Err(e);
                }
            },
            None => None,
        };
        outcome?;

        if let Some(sent) = sent {
            info!("interrupts sent: {}", sent);
        }

        if self.config.mode == Mode::Precise {
            let sent = sent.unwrap_or_default();
            if sent != self.interrupts_observed + 1 {
                return Err(ProtocolViolation::AccountingMismatch {
                    sent,
                    observed: self.interrupts_observed,
                }
                .into());
            }
        }

        Ok(WorkerReport {
            mode: self.config.mode,
            iterations_completed: self.iterations_completed,
            interrupts_observed: self.interrupts_observed,
            interrupts_sent: sent,
        })
    }

    fn spawn_generator(&self, rendezvous: Option<Arc<Rendezvous>>) -> Result<Option<GeneratorHandle>, WorkerError> {
        let generator = match (self.config.mode, rendezvous) {
            (Mode::Precise, Some(rendezvous)) => Generator::Precise(PreciseGenerator::new(self.token.clone(), rendezvous)),
            (Mode::Aggressive, _) => {
                Generator::Aggressive(AggressiveGenerator::new(self.token.clone(), self.config.generator_pause))
            }
            _ => return Ok(None),
        };
        Ok(Some(generator.spawn()?))
    }

    fn stop_generator(handle: GeneratorHandle) -> Result<u64, WorkerError> {
        handle.stop()?;
        let report = handle.join()?;
        Ok(report.interrupts_sent)
    }

    fn iterate(&mut self, rendezvous: Option<&Rendezvous>) -> Result<(), WorkerError> {
        for iteration in 0..self.config.iterations {
            self.probe.line(lines::LOOP)?;
            let mut was_interrupted = false;

            self.probe.line(lines::SLEEP)?;
            if self.token.sleep(self.config.sleep)? == SleepOutcome::Interrupted {
                self.probe.line(lines::CAUGHT)?;
                self.interrupts_observed += 1;
                was_interrupted = true;

                let is_interrupted = self.token.is_interrupted();
                debug!(iteration, is_interrupted, "Worker::iterate: interruptee");

                // Precise mode only: the next interrupt cannot arrive before
                // the acknowledgement below, so the status must read clear.
                if let Some(rendezvous) = rendezvous {
                    if is_interrupted {
                        warn!(iteration, "Worker::iterate: interrupted status still set after abort");
                        return Err(ProtocolViolation::StatusNotCleared { iteration }.into());
                    }
                    self.probe.line(lines::ACK)?;
                    rendezvous.acknowledge()?;
                }
            }

            self.probe.line(lines::CHECK)?;
            if !was_interrupted {
                return Err(ProtocolViolation::NotInterrupted { iteration }.into());
            }
            self.iterations_completed += 1;
        }
        self.probe.line(lines::DONE)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interrupt::InterruptToken;
    use proptest::prelude::*;

    fn config(mode: Mode, iterations: u32) -> WorkerConfig {
        WorkerConfig {
            mode,
            iterations,
            sleep: Duration::from_secs(5),
            generator_pause: Duration::from_millis(1),
        }
    }

    fn worker(config: WorkerConfig, token: Arc<dyn Interruptible>) -> Worker {
        Worker::new(config, token, Arc::new(NoProbe))
    }

    /// Re-raises its own interrupt after every abort
    struct StickyToken(InterruptToken);

    impl Interruptible for StickyToken {
        fn interrupt(&self) {
            self.0.interrupt()
        }

        fn is_interrupted(&self) -> bool {
            self.0.is_interrupted()
        }

        fn clear_interrupt(&self) -> bool {
            self.0.clear_interrupt()
        }

        fn sleep(&self, duration: Duration) -> Result<SleepOutcome, WaitError> {
            let outcome = self.0.sleep(duration)?;
            if outcome == SleepOutcome::Interrupted {
                self.0.interrupt();
            }
            Ok(outcome)
        }
    }

    #[test]
    fn test_precise_accounting() {
        let report = worker(config(Mode::Precise, 25), Arc::new(InterruptToken::new()))
            .run()
            .unwrap();

        assert_eq!(report.iterations_completed, 25);
        assert_eq!(report.interrupts_observed, 25);
        assert_eq!(report.interrupts_sent, Some(26));
    }

    #[test]
    fn test_precise_single_iteration() {
        let report = worker(config(Mode::Precise, 1), Arc::new(InterruptToken::new()))
            .run()
            .unwrap();

        assert_eq!(report.interrupts_observed, 1);
        assert_eq!(report.interrupts_sent, Some(2));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn prop_precise_sends_one_more_than_observed(n in 1u32..40) {
            let report = worker(config(Mode::Precise, n), Arc::new(InterruptToken::new()))
                .run()
                .unwrap();

            prop_assert_eq!(report.iterations_completed, n);
            prop_assert_eq!(report.interrupts_observed, u64::from(n));
            prop_assert_eq!(report.interrupts_sent, Some(u64::from(n) + 1));
        }
    }

    #[test]
    fn test_aggressive_liveness() {
        let report = worker(config(Mode::Aggressive, 25), Arc::new(InterruptToken::new()))
            .run()
            .unwrap();

        assert_eq!(report.iterations_completed, 25);
        assert_eq!(report.interrupts_observed, 25);
        assert!(report.interrupts_sent.unwrap() >= 25);
    }

    #[test]
    fn test_uninterrupted_wait_is_fatal() {
        let mut cfg = config(Mode::Remote, 3);
        cfg.sleep = Duration::from_millis(10);

        let err = worker(cfg, Arc::new(InterruptToken::new())).run().unwrap_err();
        assert!(matches!(
            err,
            WorkerError::Violation(ProtocolViolation::NotInterrupted { iteration: 0 })
        ));
    }

    #[test]
    fn test_remote_mode_uses_external_interrupts() {
        let token = Arc::new(InterruptToken::new());
        token.interrupt();
        let mut cfg = config(Mode::Remote, 1);
        cfg.sleep = Duration::from_millis(10);

        let report = worker(cfg, token).run().unwrap();
        assert_eq!(report.interrupts_observed, 1);
        assert_eq!(report.interrupts_sent, None);
    }

    #[test]
    fn test_sticky_status_is_fatal_in_precise_mode() {
        let token = Arc::new(StickyToken(InterruptToken::new()));
        let err = worker(config(Mode::Precise, 10), token).run().unwrap_err();

        assert!(matches!(
            err,
            WorkerError::Violation(ProtocolViolation::StatusNotCleared { iteration: 0 })
        ));
    }

    #[test]
    fn test_sticky_status_tolerated_in_aggressive_mode() {
        let token = Arc::new(StickyToken(InterruptToken::new()));
        let report = worker(config(Mode::Aggressive, 10), token).run().unwrap();
        assert_eq!(report.iterations_completed, 10);
    }

    #[test]
    fn test_detached_probe_stops_worker() {
        struct DetachAfter(u32, std::sync::atomic::AtomicU32);

        impl StepProbe for DetachAfter {
            fn line(&self, _line: u32) -> Result<(), Detached> {
                let seen = self.1.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                if seen >= self.0 { Err(Detached) } else { Ok(()) }
            }
        }

        let probe = Arc::new(DetachAfter(7, Default::default()));
        let err = Worker::new(config(Mode::Precise, 200), Arc::new(InterruptToken::new()), probe)
            .run()
            .unwrap_err();
        assert!(matches!(err, WorkerError::Detached(Detached)));
    }
}
