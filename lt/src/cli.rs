//! CLI argument parsing for linetab

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "linetab")]
#[command(author, version, about = "Boundary checks for the line-number-table query", long_about = None)]
pub struct Cli {
    /// Print each boundary call as it is made
    #[arg(long)]
    pub printdump: bool,
}
