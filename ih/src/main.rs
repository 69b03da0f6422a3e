//! InterruptHang - interrupt-delivery stress harness
//!
//! CLI entry point for the stepping controller and its worker target.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use colored::*;
use eyre::{Context, Result, eyre};
use tracing::{debug, info};

use interrupthang::cli::{Cli, Command};
use interrupthang::config::{Config, Transport};
use interrupthang::controller::{Controller, EventJournal};
use interrupthang::mode::Mode;
use interrupthang::report::RunReport;
use interrupthang::target::{launch_in_process, launch_process, serve_stdio};
use interrupthang::worker::WorkerConfig;

fn setup_logging(file_name: &str, cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("interrupthang")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(log_dir.join(file_name)).context("Failed to create log file")?;

    // Stdout carries the control protocol in target mode, so never log there.
    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_thread_names(true)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_file = match cli.command {
        Command::Target { .. } => "ih-target.log",
        Command::Run { .. } => "ih.log",
    };
    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(log_file, cli.log_level.as_deref(), config_log_level.as_deref())
        .context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Run {
            mode,
            iterations,
            timeout_factor,
            transport,
            journal,
        } => {
            let overrides = RunOverrides {
                iterations,
                timeout_factor,
                transport,
                journal,
            };
            cmd_run(config, mode, overrides).await
        }
        Command::Target {
            mode,
            iterations,
            sleep_ms,
            pause_ms,
        } => {
            let worker = WorkerConfig {
                mode,
                iterations,
                sleep: Duration::from_millis(sleep_ms),
                generator_pause: Duration::from_millis(pause_ms),
            };
            let code = serve_stdio(worker).await?;
            info!(code, "main: target finished");
            // A pending stdin read would otherwise hold the runtime open.
            std::process::exit(code)
        }
    }
}

/// Command-line values that take precedence over the config file
struct RunOverrides {
    iterations: Option<u32>,
    timeout_factor: Option<f64>,
    transport: Option<Transport>,
    journal: Option<PathBuf>,
}

async fn cmd_run(mut config: Config, mode: Mode, overrides: RunOverrides) -> Result<()> {
    debug!(%mode, "cmd_run: called");
    config.apply_env()?;
    if let Some(iterations) = overrides.iterations {
        config.run.iterations = iterations;
    }
    if let Some(factor) = overrides.timeout_factor {
        config.watchdog.timeout_factor = factor;
    }
    if let Some(transport) = overrides.transport {
        config.run.transport = transport;
    }
    if overrides.journal.is_some() {
        config.journal = overrides.journal;
    }
    config.validate().context("Invalid configuration")?;

    let worker = config.worker_config(mode);
    let controller_config = config.controller_config(mode)?;
    let watchdog_interval = controller_config.watchdog_interval;
    let controller = Controller::new(controller_config);
    let controller = match &config.journal {
        Some(path) => {
            let journal = EventJournal::open(path, controller.run_id())?;
            controller.with_journal(journal)
        }
        None => controller,
    };

    println!(
        "Running {} mode: {} iterations, watchdog {:.1}s, transport {:?}",
        mode.to_string().cyan(),
        config.run.iterations,
        watchdog_interval.as_secs_f64(),
        config.run.transport
    );

    let connection = match config.run.transport {
        Transport::Process => {
            let program = std::env::current_exe().context("Failed to locate the ih executable")?;
            launch_process(&program, worker).await?
        }
        Transport::InProcess => launch_in_process(worker)?,
    };

    let report = controller.run(connection).await?;
    print_report(&report);

    if report.passed() {
        Ok(())
    } else {
        Err(eyre!("InterruptHang run failed in {} mode", mode))
    }
}

fn print_report(report: &RunReport) {
    println!();
    println!("Steps: {}", report.steps);
    if let Some(sent) = report.interrupts_sent() {
        println!("Interrupts sent: {}", sent);
    }
    if let Some(observed) = report.interrupts_observed() {
        println!("Interrupts observed: {}", observed);
    }

    if report.passed() {
        println!("{} {} mode passed", "✓".green(), report.mode);
    } else {
        for failure in report.failures() {
            println!("{} {}", "✗".red(), failure);
        }
    }
}
