//! InterruptHang - interrupt-delivery stress harness with hang detection
//!
//! A worker thread repeatedly blocks on an interruptible sleep while an
//! interrupt generator races to wake it. A controller single-steps the worker
//! through a control channel, counts step events, and runs a watchdog that
//! fails the run when steps stop arriving.
//!
//! # Core Concepts
//!
//! - **Every wait must be aborted**: a sleep that runs to completion is a
//!   protocol violation
//! - **Precise accounting**: in precise mode the generator sends exactly one
//!   more interrupt than the worker observes
//! - **Liveness over the channel**: a hang is a step count that stops moving
//!
//! # Modules
//!
//! - [`interrupt`] - Interruptible sleep primitive
//! - [`rendezvous`] - Worker/generator hand-off for precise mode
//! - [`generator`] - Precise, aggressive and remote interrupt generators
//! - [`worker`] - The interruptible worker loop
//! - [`protocol`] - Control channel events and commands
//! - [`target`] - Worker side of the channel, in-process or child process
//! - [`controller`] - Stepping controller, watchdog and event journal
//! - [`report`] - Run verdicts
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod config;
pub mod controller;
pub mod error;
pub mod generator;
pub mod interrupt;
pub mod mode;
pub mod protocol;
pub mod rendezvous;
pub mod report;
pub mod target;
pub mod worker;

pub use config::{Config, Transport};
pub use controller::{Controller, ControllerConfig, HangReport};
pub use error::{ProtocolViolation, SignalError, WaitError};
pub use interrupt::{InterruptToken, Interruptible, SleepOutcome};
pub use mode::{Mode, ModeError};
pub use report::RunReport;
pub use target::{Connection, launch_in_process, launch_process};
pub use worker::{Worker, WorkerConfig, WorkerError, WorkerReport};
