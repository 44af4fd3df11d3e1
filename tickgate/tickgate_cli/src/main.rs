use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use tickgate_core::{init_logging, LogLevel, TickgateConfig};

mod commands;

/// Tickgate command line interface
///
/// Drives a main-thread dispatcher from a simulated host tick loop.
#[derive(Parser)]
#[clap(author, version, about)]
struct Cli {
    /// Path to a TOML configuration file
    #[clap(long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[clap(long, global = true)]
    log_level: Option<String>,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate a host: tick the dispatcher while producers and a pool consumer feed it
    Run(commands::run::RunArgs),

    /// Print the effective configuration
    Config {
        /// Print as JSON instead of TOML
        #[clap(long)]
        json: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = TickgateConfig::load(cli.config.as_deref())
        .context("Failed to load configuration")?;

    if let Some(level) = &cli.log_level {
        config.logging.level = level
            .parse::<LogLevel>()
            .map_err(|_| anyhow!("Unknown log level '{}'", level))?;
    }
    init_logging(config.logging.level)?;

    match cli.command {
        Commands::Run(args) => commands::run::execute(config, args),
        Commands::Config { json } => commands::config::show(&config, json),
    }
}
