//! Control channel between the controller and a target
//!
//! Events flow from the target to the controller, commands flow the other
//! way. Over the process transport each message is one JSON object per line.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::worker::WorkerReport;

/// Exit code of a target whose worker finished cleanly
pub const EXIT_PASSED: i32 = 0;

/// Exit code of a target whose worker hit a fatal error
pub const EXIT_FAILED: i32 = 1;

/// Exit code the controller requests when it force-terminates a target
pub const EXIT_FORCED: i32 = -1;

/// Opaque identity of a thread inside the target
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThreadId(pub u64);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Source position of a step event
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub method: String,
    pub line: u32,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.method, self.line)
    }
}

/// Whether a step event parks the stepping thread until resumed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SuspendPolicy {
    None,
    #[default]
    Thread,
}

/// How a target ended
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetExit {
    pub code: i32,
    pub report: Option<WorkerReport>,
    pub failure: Option<String>,
}

impl TargetExit {
    pub fn passed(report: WorkerReport) -> Self {
        Self {
            code: EXIT_PASSED,
            report: Some(report),
            failure: None,
        }
    }

    pub fn failed(failure: impl Into<String>) -> Self {
        Self {
            code: EXIT_FAILED,
            report: None,
            failure: Some(failure.into()),
        }
    }

    pub fn forced(code: i32, reason: impl Into<String>) -> Self {
        Self {
            code,
            report: None,
            failure: Some(reason.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == EXIT_PASSED
    }
}

/// Target to controller
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TargetEvent {
    /// Target is up with its main thread parked until the first `Resume`
    VmStarted { main_thread: ThreadId },
    /// The traced thread reached a new source line
    Step {
        thread: ThreadId,
        location: Location,
        suspended: bool,
    },
    /// A thread finished
    ThreadDeath { thread: ThreadId },
    /// The target is exiting
    VmDeath { exit: TargetExit },
    /// The channel is closed; no further events follow
    Disconnected,
}

impl TargetEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            TargetEvent::VmStarted { .. } => "VmStarted",
            TargetEvent::Step { .. } => "Step",
            TargetEvent::ThreadDeath { .. } => "ThreadDeath",
            TargetEvent::VmDeath { .. } => "VmDeath",
            TargetEvent::Disconnected => "Disconnected",
        }
    }
}

/// Controller to target
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlCommand {
    /// Report line-boundary steps of `thread`, stepping over helper frames
    CreateStepRequest { thread: ThreadId, suspend: SuspendPolicy },
    /// Release a thread parked at start-up or on a step event
    Resume,
    /// Abort the thread's current or next blocking wait
    Interrupt { thread: ThreadId },
    /// Terminate the target with the given code
    Exit { code: i32 },
}
