//! Common helpers shared across CLI commands.

use std::path::Path;

use apkbroker::config::BrokerConfig;
use tokio::runtime::Runtime;

use crate::error::CliError;

/// Load configuration from `path`, or from the default location.
pub fn load_config(path: Option<&Path>) -> Result<BrokerConfig, CliError> {
    let config = match path {
        Some(path) => BrokerConfig::load_from(path)?,
        None => BrokerConfig::load()?,
    };
    Ok(config)
}

/// Multi-threaded runtime for the async library calls.
pub fn runtime() -> Result<Runtime, CliError> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("apkbroker")
        .build()
        .map_err(CliError::Runtime)
}

/// Format a byte count for display.
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 bytes");
        assert_eq!(format_size(2048), "2.00 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.00 MB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024), "3.00 GB");
    }

    #[test]
    fn test_load_config_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(Some(&dir.path().join("absent.ini"))).unwrap();
        assert_eq!(config, BrokerConfig::default());
    }

    #[test]
    fn test_load_config_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.ini");
        std::fs::write(&path, "[server]\nbind = 0.0.0.0:9999\n").unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.server.bind.port(), 9999);
    }
}
