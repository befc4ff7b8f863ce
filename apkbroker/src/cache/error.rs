//! Error and result types for the cache store.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors from the on-disk cache.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Failed to create a cache directory.
    #[error("failed to create cache directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Failed to move a staged file into the cache.
    #[error("failed to store {} in cache: {source}", path.display())]
    Store {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Failed to remove a cache entry.
    #[error("failed to remove {}: {source}", path.display())]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Failed to read cache metadata.
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Outcome of a removal pass (clear, sweep, eviction).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemovalResult {
    /// Files (or staging directories) removed.
    pub files_removed: usize,
    /// Bytes freed.
    pub bytes_freed: u64,
}

impl RemovalResult {
    /// Fold another result into this one.
    pub fn merge(&mut self, other: RemovalResult) {
        self.files_removed += other.files_removed;
        self.bytes_freed += other.bytes_freed;
    }

    /// Whether nothing was removed.
    pub fn is_empty(&self) -> bool {
        self.files_removed == 0
    }
}

impl fmt::Display for RemovalResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "removed {} files, freed {} bytes",
            self.files_removed, self.bytes_freed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removal_result_merge() {
        let mut total = RemovalResult::default();
        assert!(total.is_empty());
        total.merge(RemovalResult {
            files_removed: 2,
            bytes_freed: 300,
        });
        total.merge(RemovalResult {
            files_removed: 1,
            bytes_freed: 50,
        });
        assert_eq!(total.files_removed, 3);
        assert_eq!(total.bytes_freed, 350);
        assert_eq!(total.to_string(), "removed 3 files, freed 350 bytes");
    }

    #[test]
    fn test_error_display_includes_path() {
        let err = CacheError::Store {
            path: PathBuf::from("/tmp/cache/x.apk"),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(err.to_string().contains("/tmp/cache/x.apk"));
    }
}
