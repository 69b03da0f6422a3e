//! Remote strategy: interrupts injected from outside the target

use std::time::Duration;

use tracing::{error, info};

use super::{GeneratorError, GeneratorReport};
use crate::error::SignalError;
use crate::interrupt::{Interruptible, SleepOutcome};
use crate::mode::Mode;
use crate::protocol::ThreadId;

/// Handle to a thread the caller does not own
pub trait RemoteThread: Send {
    fn id(&self) -> ThreadId;

    /// Fire-and-forget interrupt of the referenced thread
    fn signal(&self) -> Result<(), SignalError>;
}

/// Signals a remote thread every `pause` until the target goes away
pub struct RemoteGenerator {
    thread: Box<dyn RemoteThread>,
    pause: Duration,
    sent: u64,
}

impl RemoteGenerator {
    pub fn new(thread: Box<dyn RemoteThread>, pause: Duration) -> Self {
        Self { thread, pause, sent: 0 }
    }

    /// Run until the reference becomes invalid
    ///
    /// `stop` is never expected to fire; an interrupt of this generator's own
    /// pause is a fatal error.
    pub fn run(mut self, stop: &dyn Interruptible) -> Result<GeneratorReport, GeneratorError> {
        let thread = self.thread.id();
        loop {
            match self.thread.signal() {
                Ok(()) => {}
                Err(e) if e.is_target_gone() => {
                    info!(
                        %thread,
                        "RemoteInterruptor thread: Got expected {} after {} interrupts sent. Exiting.", e, self.sent
                    );
                    return Ok(GeneratorReport {
                        strategy: Mode::Remote,
                        interrupts_sent: self.sent,
                    });
                }
                Err(e) => {
                    error!(
                        %thread,
                        error = %e,
                        "RemoteInterruptor thread: Got unexpected error after {} interrupts sent. Exiting with error.",
                        self.sent
                    );
                    return Err(GeneratorError::Signal {
                        sent: self.sent,
                        source: e,
                    });
                }
            }
            self.sent += 1;

            if stop.sleep(self.pause)? == SleepOutcome::Interrupted {
                error!(%thread, sent = self.sent, "RemoteInterruptor thread: Unexpected Interrupt");
                return Err(GeneratorError::UnexpectedInterrupt { sent: self.sent });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interrupt::InterruptToken;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Accepts `budget` signals, then fails with `then`
    struct ScriptedThread {
        delivered: Arc<AtomicU64>,
        budget: u64,
        then: SignalError,
    }

    impl RemoteThread for ScriptedThread {
        fn id(&self) -> ThreadId {
            ThreadId(1)
        }

        fn signal(&self) -> Result<(), SignalError> {
            if self.delivered.load(Ordering::SeqCst) >= self.budget {
                return Err(self.then.clone());
            }
            self.delivered.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn scripted(budget: u64, then: SignalError) -> (Box<dyn RemoteThread>, Arc<AtomicU64>) {
        let delivered = Arc::new(AtomicU64::new(0));
        let thread = ScriptedThread {
            delivered: delivered.clone(),
            budget,
            then,
        };
        (Box::new(thread), delivered)
    }

    #[test]
    fn test_disconnect_is_clean_exit() {
        let (thread, delivered) = scripted(4, SignalError::Disconnected);
        let stop = InterruptToken::new();

        let report = RemoteGenerator::new(thread, Duration::from_millis(1)).run(&stop).unwrap();
        assert_eq!(report.strategy, Mode::Remote);
        assert_eq!(report.interrupts_sent, 4);
        assert_eq!(delivered.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_dead_thread_is_clean_exit() {
        let (thread, _) = scripted(2, SignalError::IllegalThreadState(ThreadId(1)));
        let stop = InterruptToken::new();

        let report = RemoteGenerator::new(thread, Duration::from_millis(1)).run(&stop).unwrap();
        assert_eq!(report.interrupts_sent, 2);
    }

    #[test]
    fn test_transport_error_is_fatal() {
        let (thread, _) = scripted(3, SignalError::Transport("broken pipe".to_string()));
        let stop = InterruptToken::new();

        let err = RemoteGenerator::new(thread, Duration::from_millis(1)).run(&stop).unwrap_err();
        match err {
            GeneratorError::Signal { sent, source } => {
                assert_eq!(sent, 3);
                assert_eq!(source, SignalError::Transport("broken pipe".to_string()));
            }
            other => panic!("Expected Signal error, got {:?}", other),
        }
    }

    #[test]
    fn test_own_interrupt_is_fatal() {
        let (thread, _) = scripted(u64::MAX, SignalError::Disconnected);
        let stop = InterruptToken::new();
        stop.interrupt();

        let err = RemoteGenerator::new(thread, Duration::from_secs(10)).run(&stop).unwrap_err();
        assert!(matches!(err, GeneratorError::UnexpectedInterrupt { sent: 1 }));
    }
}
