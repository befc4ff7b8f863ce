//! apkbroker CLI - command-line interface
//!
//! Runs the HTTP broker or drives the library directly for one-shot
//! fetches, archive classification and cache maintenance.

mod commands;
mod error;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use commands::cache::CacheAction;
use commands::config::ConfigCommands;
use commands::fetch::FetchArgs;
use commands::serve::ServeArgs;
use error::CliError;

#[derive(Debug, Parser)]
#[command(name = "apkbroker", version, about = "Package artifact acquisition broker")]
struct Cli {
    /// Configuration file (defaults to the per-user config.ini)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the HTTP broker until Ctrl-C
    Serve(ServeArgs),

    /// Resolve one package and print where the artifact landed
    Fetch(FetchArgs),

    /// Report whether an archive is a single package or a split bundle
    Classify {
        /// Archive to inspect
        file: PathBuf,
    },

    /// Inspect or clear the artifact cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Show configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let config_path = cli.config.as_deref();
    let load = || commands::common::load_config(config_path);

    match cli.command {
        Commands::Serve(args) => commands::serve::run(load()?, args),
        Commands::Fetch(args) => commands::fetch::run(load()?, args),
        Commands::Classify { file } => commands::classify::run(&load()?, &file),
        Commands::Cache { action } => commands::cache::run(&load()?, action),
        Commands::Config { command } => commands::config::run(command, config_path),
    }
}
