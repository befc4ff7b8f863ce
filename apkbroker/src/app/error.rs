//! Application error types.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use crate::cache::CacheError;

/// Errors that can occur during application lifecycle.
#[derive(Debug, Error)]
pub enum AppError {
    /// The cache directory could not be prepared.
    #[error("failed to open cache: {0}")]
    Cache(#[from] CacheError),

    /// Both channels are disabled.
    #[error("no acquisition channel is enabled; enable [direct] or [tool]")]
    NoChannels,

    /// The listen address could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// The HTTP server stopped with an error.
    #[error("HTTP server failed: {0}")]
    Serve(#[source] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_error_display() {
        let err = AppError::Bind {
            addr: "127.0.0.1:8000".parse().unwrap(),
            source: io::Error::new(io::ErrorKind::AddrInUse, "in use"),
        };
        let msg = err.to_string();
        assert!(msg.contains("127.0.0.1:8000"));
        assert!(msg.contains("in use"));
    }

    #[test]
    fn test_app_error_from_cache_error() {
        let cache_err = CacheError::CreateDir {
            path: "/nope".into(),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        };
        let app_err: AppError = cache_err.into();
        assert!(matches!(app_err, AppError::Cache(_)));
    }
}
