use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;

use linetab::cli::Cli;
use linetab::{Agent, MethodRegistry};

fn setup_logging() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();
    Ok(())
}

fn main() -> Result<()> {
    setup_logging().context("Failed to setup logging")?;

    let cli = Cli::parse();
    info!("linetab starting");

    let agent = Agent::initialize(MethodRegistry::builtin(), cli.printdump).context("Agent initialization failed")?;
    let report = agent.run_check()?;

    for line in &report.dump {
        println!("{}", line);
    }
    for mismatch in &report.mismatches {
        println!("{} {}", "✗".red(), mismatch);
    }

    if report.skipped {
        println!("{} line numbers unavailable, nothing to check", "!".yellow());
    } else if report.passed() {
        println!("{} line number table checks passed", "✓".green());
    }

    std::process::exit(report.status())
}
