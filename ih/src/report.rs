//! Run verdicts

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::controller::HangReport;
use crate::generator::GeneratorReport;
use crate::mode::Mode;
use crate::protocol::TargetExit;

/// Everything the controller learned about one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub mode: Mode,
    /// Step events received
    pub steps: u64,
    pub hang: Option<HangReport>,
    /// `None` when the target vanished without a `VmDeath`
    pub exit: Option<TargetExit>,
    /// Outcome of the controller-side generator, remote mode only
    pub remote: Option<Result<GeneratorReport, String>>,
}

impl RunReport {
    pub fn passed(&self) -> bool {
        self.failures().is_empty()
    }

    /// Human-readable reasons the run failed; empty on success
    pub fn failures(&self) -> Vec<String> {
        let mut failures = Vec::new();

        if let Some(hang) = &self.hang {
            failures.push(format!(
                "Target appears to be hung: no steps for {:.1}s (interval {:.1}s, {} steps total)",
                hang.idle.as_secs_f64(),
                hang.interval.as_secs_f64(),
                hang.steps
            ));
        }

        match &self.exit {
            Some(exit) if exit.is_success() => {}
            Some(exit) => failures.push(format!(
                "Target exited with code {}: {}",
                exit.code,
                exit.failure.as_deref().unwrap_or("unknown failure")
            )),
            None => failures.push("Target disconnected without reporting an exit".to_string()),
        }

        if let Some(Err(e)) = &self.remote {
            failures.push(format!("Remote generator failed: {}", e));
        }

        failures
    }

    pub fn interrupts_observed(&self) -> Option<u64> {
        self.exit.as_ref()?.report.as_ref().map(|r| r.interrupts_observed)
    }

    /// Local count in precise/aggressive mode, controller count in remote mode
    pub fn interrupts_sent(&self) -> Option<u64> {
        match &self.remote {
            Some(Ok(remote)) => Some(remote.interrupts_sent),
            Some(Err(_)) => None,
            None => self.exit.as_ref()?.report.as_ref()?.interrupts_sent,
        }
    }
}

fn count(value: Option<u64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Run {} ({})", self.run_id, self.mode)?;
        writeln!(f, "  steps:               {}", self.steps)?;
        writeln!(f, "  interrupts sent:     {}", count(self.interrupts_sent()))?;
        writeln!(f, "  interrupts observed: {}", count(self.interrupts_observed()))?;
        if self.passed() {
            write!(f, "  verdict:             passed")
        } else {
            write!(f, "  verdict:             FAILED")?;
            for failure in self.failures() {
                write!(f, "\n    - {}", failure)?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::EXIT_FORCED;
    use crate::worker::WorkerReport;
    use std::time::Duration;

    fn passing(mode: Mode) -> RunReport {
        RunReport {
            run_id: "run".to_string(),
            mode,
            steps: 1000,
            hang: None,
            exit: Some(TargetExit::passed(WorkerReport {
                mode,
                iterations_completed: 200,
                interrupts_observed: 200,
                interrupts_sent: (mode == Mode::Precise).then_some(201),
            })),
            remote: None,
        }
    }

    #[test]
    fn test_clean_run_passes() {
        let report = passing(Mode::Precise);
        assert!(report.passed());
        assert_eq!(report.interrupts_sent(), Some(201));
        assert_eq!(report.interrupts_observed(), Some(200));
        assert!(report.to_string().contains("passed"));
    }

    #[test]
    fn test_hang_fails_with_idle_time() {
        let mut report = passing(Mode::Aggressive);
        report.hang = Some(HangReport {
            steps: 42,
            idle: Duration::from_secs(20),
            interval: Duration::from_secs(20),
        });
        report.exit = Some(TargetExit::forced(EXIT_FORCED, "terminated by controller"));

        let failures = report.failures();
        assert_eq!(failures.len(), 2);
        assert!(failures[0].contains("20.0s"));
        assert!(failures[1].contains("code -1"));
        assert!(report.to_string().contains("FAILED"));
    }

    #[test]
    fn test_remote_counts_come_from_controller() {
        let mut report = passing(Mode::Remote);
        report.remote = Some(Ok(GeneratorReport {
            strategy: Mode::Remote,
            interrupts_sent: 350,
        }));
        assert!(report.passed());
        assert_eq!(report.interrupts_sent(), Some(350));
    }

    #[test]
    fn test_remote_failure_fails_run() {
        let mut report = passing(Mode::Remote);
        report.remote = Some(Err("Generator was interrupted unexpectedly".to_string()));
        assert!(!report.passed());
        assert_eq!(report.interrupts_sent(), None);
    }

    #[test]
    fn test_missing_exit_fails() {
        let mut report = passing(Mode::Precise);
        report.exit = None;
        assert_eq!(report.failures(), vec!["Target disconnected without reporting an exit"]);
    }
}
