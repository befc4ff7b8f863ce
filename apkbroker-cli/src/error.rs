//! CLI error type.

use std::fmt;
use std::io;
use std::path::PathBuf;

use apkbroker::app::AppError;
use apkbroker::cache::CacheError;
use apkbroker::config::ConfigError;
use apkbroker::log::LogError;
use apkbroker::package::PackageIdError;
use apkbroker::BrokerError;

/// Errors surfaced to the user by a CLI command.
#[derive(Debug)]
pub enum CliError {
    /// Configuration could not be loaded or rendered.
    Config(ConfigError),

    /// Logging could not be initialised.
    Log(LogError),

    /// The package identifier argument is malformed.
    InvalidPackage(PackageIdError),

    /// The Tokio runtime could not be created.
    Runtime(io::Error),

    /// The broker failed to start or serve.
    App(AppError),

    /// A fetch produced no artifact.
    Fetch(BrokerError),

    /// A cache maintenance operation failed.
    Cache(CacheError),

    /// A file argument was missing or unusable.
    File { path: PathBuf, source: io::Error },
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(e) => write!(f, "Configuration error: {}", e),
            CliError::Log(e) => write!(f, "Logging setup failed: {}", e),
            CliError::InvalidPackage(e) => write!(f, "Invalid package name: {}", e),
            CliError::Runtime(e) => write!(f, "Failed to create Tokio runtime: {}", e),
            CliError::App(e) => write!(f, "{}", e),
            CliError::Fetch(e) => write!(f, "Fetch failed: {}", e),
            CliError::Cache(e) => write!(f, "Cache operation failed: {}", e),
            CliError::File { path, source } => write!(f, "{}: {}", path.display(), source),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Config(e) => Some(e),
            CliError::Log(e) => Some(e),
            CliError::InvalidPackage(e) => Some(e),
            CliError::Runtime(e) => Some(e),
            CliError::App(e) => Some(e),
            CliError::Fetch(e) => Some(e),
            CliError::Cache(e) => Some(e),
            CliError::File { source, .. } => Some(source),
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Config(e)
    }
}

impl From<LogError> for CliError {
    fn from(e: LogError) -> Self {
        CliError::Log(e)
    }
}

impl From<PackageIdError> for CliError {
    fn from(e: PackageIdError) -> Self {
        CliError::InvalidPackage(e)
    }
}

impl From<AppError> for CliError {
    fn from(e: AppError) -> Self {
        CliError::App(e)
    }
}

impl From<BrokerError> for CliError {
    fn from(e: BrokerError) -> Self {
        CliError::Fetch(e)
    }
}

impl From<CacheError> for CliError {
    fn from(e: CacheError) -> Self {
        CliError::Cache(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_error_display_names_path() {
        let err = CliError::File {
            path: PathBuf::from("/tmp/missing.apk"),
            source: io::Error::new(io::ErrorKind::NotFound, "not found"),
        };
        assert_eq!(err.to_string(), "/tmp/missing.apk: not found");
    }

    #[test]
    fn test_app_error_passes_through() {
        let err: CliError = AppError::NoChannels.into();
        assert!(err.to_string().contains("no acquisition channel"));
    }
}
