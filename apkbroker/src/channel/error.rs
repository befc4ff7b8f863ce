//! Error types for acquisition channels.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::worker::WorkerError;

/// Result type for channel operations.
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Errors a single acquisition attempt can end with.
///
/// All variants are recoverable by falling back to the next strategy; only
/// the resolver decides when the chain is exhausted.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// HTTP request failed or returned an unusable status.
    #[error("failed to download {url}: {reason}")]
    Http { url: String, reason: String },

    /// The attempt exceeded its time budget.
    #[error("{target} timed out after {timeout_secs}s")]
    Timeout { target: String, timeout_secs: u64 },

    /// Local filesystem error.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The delivered file is too small to be a real artifact.
    #[error(
        "{} is {size} bytes, not above the {minimum}-byte plausibility threshold",
        path.display()
    )]
    Implausible {
        path: PathBuf,
        size: u64,
        minimum: u64,
    },

    /// The external tool explicitly reported the package as unavailable.
    #[error("{tool} reports {package} as not available")]
    NotAvailable { tool: String, package: String },

    /// The external tool could not be started.
    #[error("failed to launch {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: io::Error,
    },

    /// The external tool ran but did not deliver a file.
    #[error("{tool} failed: {reason}")]
    ToolFailed { tool: String, reason: String },

    /// The blocking worker could not run the job.
    #[error(transparent)]
    Worker(#[from] WorkerError),
}

impl ChannelError {
    /// Whether the upstream positively said the package does not exist,
    /// as opposed to a transport/tool failure.
    pub fn is_not_available(&self) -> bool {
        matches!(self, ChannelError::NotAvailable { .. })
    }

    /// Whether this attempt was rejected by the plausibility check.
    pub fn is_implausible(&self) -> bool {
        matches!(self, ChannelError::Implausible { .. })
    }
}
