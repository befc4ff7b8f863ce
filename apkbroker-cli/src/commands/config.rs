//! Configuration CLI commands.

use std::path::Path;

use apkbroker::config::config_file_path;
use clap::Subcommand;

use super::common::load_config;
use crate::error::CliError;

/// Config subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Show the configuration file path
    Path,

    /// Print the effective configuration as INI
    Show,
}

/// Run a config subcommand.
pub fn run(command: ConfigCommands, path: Option<&Path>) -> Result<(), CliError> {
    match command {
        ConfigCommands::Path => {
            let path = path.map(Path::to_path_buf).unwrap_or_else(config_file_path);
            let note = if path.exists() { "" } else { " (not present, using defaults)" };
            println!("{}{}", path.display(), note);
            Ok(())
        }
        ConfigCommands::Show => {
            let config = load_config(path)?;
            print!("{}", config.to_ini_string()?);
            Ok(())
        }
    }
}
