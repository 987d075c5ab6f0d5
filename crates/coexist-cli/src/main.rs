//! Coexistence scenario CLI tool
//!
//! Runs LAA / Wi-Fi coexistence scenarios, previews duty-cycle patterns and
//! prints the default scenario configuration.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{cmd_config, cmd_duty_cycle, cmd_run, RunArgs};
use tracing::{error, Level};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a coexistence scenario and append per-operator reports
    Run(RunArgs),

    /// Show the blanking pattern for a duty cycle
    DutyCycle {
        /// Fraction of subframes the cellular operator may use, in [0, 1]
        value: f64,
    },

    /// Print the default scenario configuration as JSON
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing; RUST_LOG takes precedence over --verbose
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Run(args) => cmd_run(args),
        Commands::DutyCycle { value } => cmd_duty_cycle(value),
        Commands::Config => cmd_config(),
    };

    if let Err(e) = &result {
        error!("{:#}", e);
    }
    result
}
