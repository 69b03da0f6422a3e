//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::Transport;
use crate::mode::Mode;

/// InterruptHang - interrupt-delivery stress harness with hang detection
#[derive(Parser)]
#[command(
    name = "ih",
    about = "Interrupt-delivery stress harness with single-step hang detection",
    version,
    after_help = "Logs are written to: ~/.local/share/interrupthang/logs/ih.log"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the stress protocol under a single-stepping controller
    Run {
        /// Interrupt generator strategy (precise, aggressive, remote)
        #[arg(short, long)]
        mode: Mode,

        /// Worker iterations
        #[arg(short, long)]
        iterations: Option<u32>,

        /// Watchdog interval multiplier (overrides IH_TIMEOUT_FACTOR)
        #[arg(short, long)]
        timeout_factor: Option<f64>,

        /// Where the worker runs
        #[arg(long, value_enum)]
        transport: Option<Transport>,

        /// Append every target event to this JSONL file
        #[arg(short, long)]
        journal: Option<PathBuf>,
    },

    /// Internal: run a worker speaking the control protocol on stdio (used by `run`)
    #[command(hide = true)]
    Target {
        #[arg(long)]
        mode: Mode,

        #[arg(long)]
        iterations: u32,

        #[arg(long)]
        sleep_ms: u64,

        #[arg(long)]
        pause_ms: u64,
    },
}
