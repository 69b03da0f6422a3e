//! Hang watchdog
//!
//! Polls the published step count at a fixed interval. If the count has not
//! moved since the previous check the target is declared hung.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Step count written by the controller's event loop, read by the watchdog
#[derive(Debug, Default)]
pub struct StepCounter(AtomicU64);

impl StepCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one step; returns the new count
    pub fn increment(&self) -> u64 {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }
}

/// Outcome of a hang declaration
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HangReport {
    /// Step count frozen across the last check
    pub steps: u64,
    /// Time since the count last moved
    pub idle: Duration,
    /// Check interval in effect
    pub interval: Duration,
}

pub struct Watchdog {
    interval: Duration,
    steps: Arc<StepCounter>,
}

impl Watchdog {
    pub fn new(interval: Duration, steps: Arc<StepCounter>) -> Self {
        Self { interval, steps }
    }

    /// Run on the current runtime until hung or cancelled
    pub fn spawn(self) -> WatchdogHandle {
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let task = tokio::spawn(self.run(cancel_rx));
        WatchdogHandle {
            cancel: Some(cancel_tx),
            task: Some(task),
        }
    }

    /// Returns `Some` when a hang is declared, `None` when cancelled
    ///
    /// Dropping the cancel sender also cancels.
    pub async fn run(self, mut cancel: oneshot::Receiver<()>) -> Option<HangReport> {
        info!(interval_secs = self.interval.as_secs_f64(), "Timer watching for steps");
        let mut last = self.steps.get();
        let mut last_progress = Instant::now();

        loop {
            tokio::select! {
                _ = &mut cancel => {
                    debug!("Watchdog::run: cancelled");
                    return None;
                }
                _ = tokio::time::sleep(self.interval) => {}
            }

            let current = self.steps.get();
            debug!(steps = current, "Watchdog::run: check");
            if current == last {
                let report = HangReport {
                    steps: current,
                    idle: last_progress.elapsed(),
                    interval: self.interval,
                };
                warn!(
                    steps = current,
                    "Target appears to be hung (no steps for {:.1}s)",
                    report.idle.as_secs_f64()
                );
                return Some(report);
            }
            last = current;
            last_progress = Instant::now();
        }
    }
}

/// Handle to a spawned watchdog
pub struct WatchdogHandle {
    cancel: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<Option<HangReport>>>,
}

impl WatchdogHandle {
    /// Wait for a hang verdict
    ///
    /// Never resolves once the watchdog was cancelled or already reported.
    pub async fn verdict(&mut self) -> HangReport {
        if let Some(task) = self.task.as_mut() {
            let result = task.await;
            self.task = None;
            if let Ok(Some(report)) = result {
                return report;
            }
        }
        std::future::pending().await
    }

    /// Stop the watchdog and wait for its task to finish
    pub async fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for WatchdogHandle {
    fn drop(&mut self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}
