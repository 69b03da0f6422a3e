//! Step tracing inside the target
//!
//! The tracer is the worker's [`StepProbe`]. It starts parked so the
//! controller can install its step request before the first line runs.

use std::sync::{Condvar, Mutex, PoisonError};

use tokio::sync::mpsc;
use tracing::debug;

use crate::protocol::{Location, SuspendPolicy, TargetEvent, ThreadId};
use crate::worker::{Detached, StepProbe};

/// Method name reported for worker lines
pub const WORKER_METHOD: &str = "Worker::iterate";

#[derive(Debug)]
struct TraceState {
    request: Option<SuspendPolicy>,
    suspended: bool,
    detached: bool,
}

pub struct StepTracer {
    thread: ThreadId,
    events: mpsc::UnboundedSender<TargetEvent>,
    state: Mutex<TraceState>,
    resumed: Condvar,
}

impl StepTracer {
    pub fn new(thread: ThreadId, events: mpsc::UnboundedSender<TargetEvent>) -> Self {
        Self {
            thread,
            events,
            state: Mutex::new(TraceState {
                request: None,
                suspended: true,
                detached: false,
            }),
            resumed: Condvar::new(),
        }
    }

    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    /// Block until the first `Resume`
    pub fn await_start(&self) -> Result<(), Detached> {
        debug!(thread = %self.thread, "StepTracer::await_start: parked");
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        self.park(state)
    }

    /// Install (or replace) the step request
    pub fn enable(&self, suspend: SuspendPolicy) {
        debug!(thread = %self.thread, ?suspend, "StepTracer::enable: called");
        self.state.lock().unwrap_or_else(PoisonError::into_inner).request = Some(suspend);
    }

    /// Release the parked thread, if any
    pub fn resume(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.suspended = false;
        self.resumed.notify_all();
    }

    /// Detach the tracer; the worker fails its next line with [`Detached`]
    pub fn detach(&self) {
        debug!(thread = %self.thread, "StepTracer::detach: called");
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.detached = true;
        self.resumed.notify_all();
    }

    fn park(&self, state: std::sync::MutexGuard<'_, TraceState>) -> Result<(), Detached> {
        let state = self
            .resumed
            .wait_while(state, |s| s.suspended && !s.detached)
            .unwrap_or_else(PoisonError::into_inner);
        if state.detached { Err(Detached) } else { Ok(()) }
    }
}

impl StepProbe for StepTracer {
    fn line(&self, line: u32) -> Result<(), Detached> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.detached {
            return Err(Detached);
        }
        let Some(policy) = state.request else {
            return Ok(());
        };

        let suspended = policy == SuspendPolicy::Thread;
        state.suspended = suspended;
        let event = TargetEvent::Step {
            thread: self.thread,
            location: Location {
                method: WORKER_METHOD.to_string(),
                line,
            },
            suspended,
        };
        if self.events.send(event).is_err() {
            // Nobody is listening any more; behave as if detached.
            state.detached = true;
            return Err(Detached);
        }

        if suspended { self.park(state) } else { Ok(()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_no_events_without_request() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let tracer = StepTracer::new(ThreadId(1), tx);
        tracer.resume();

        tracer.line(1).unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_step_events_without_suspension() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let tracer = StepTracer::new(ThreadId(1), tx);
        tracer.enable(SuspendPolicy::None);
        tracer.resume();

        tracer.line(2).unwrap();
        tracer.line(3).unwrap();

        match rx.try_recv().unwrap() {
            TargetEvent::Step { location, suspended, .. } => {
                assert_eq!(location.line, 2);
                assert_eq!(location.method, WORKER_METHOD);
                assert!(!suspended);
            }
            other => panic!("Expected Step, got {:?}", other),
        }
        assert!(matches!(rx.try_recv().unwrap(), TargetEvent::Step { .. }));
    }

    #[test]
    fn test_suspended_step_waits_for_resume() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let tracer = Arc::new(StepTracer::new(ThreadId(1), tx));
        tracer.enable(SuspendPolicy::Thread);
        tracer.resume();

        let stepping = {
            let tracer = tracer.clone();
            thread::spawn(move || tracer.line(4))
        };

        let event = rx.blocking_recv().unwrap();
        assert!(matches!(event, TargetEvent::Step { suspended: true, .. }));
        thread::sleep(Duration::from_millis(20));
        assert!(!stepping.is_finished());

        tracer.resume();
        assert_eq!(stepping.join().unwrap(), Ok(()));
    }

    #[test]
    fn test_detach_releases_parked_thread() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let tracer = Arc::new(StepTracer::new(ThreadId(1), tx));

        let starting = {
            let tracer = tracer.clone();
            thread::spawn(move || tracer.await_start())
        };
        thread::sleep(Duration::from_millis(20));
        tracer.detach();

        assert_eq!(starting.join().unwrap(), Err(Detached));
        assert_eq!(tracer.line(1), Err(Detached));
    }

    #[test]
    fn test_closed_channel_detaches() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let tracer = StepTracer::new(ThreadId(1), tx);
        tracer.enable(SuspendPolicy::Thread);
        tracer.resume();

        assert_eq!(tracer.line(1), Err(Detached));
    }
}
