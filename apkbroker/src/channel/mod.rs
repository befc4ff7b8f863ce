//! Acquisition channels.
//!
//! A channel turns a [`PackageId`] into a file on local disk. Two channel
//! families exist:
//!
//! - **Direct** ([`direct`]): a segmented, resumable, multi-connection HTTP
//!   transfer against a URL built from the identifier.
//! - **Tool** ([`tool`]): an external acquisition program invoked as a
//!   subprocess, keyed only by identifier.
//!
//! Every concrete strategy implements [`AcquisitionStrategy`], so the
//! resolver can hold an ordered, configurable list of them without knowing
//! which upstream each one talks to.
//!
//! # Architecture
//!
//! ```text
//! FallbackResolver
//!         │
//!         ├── AcquisitionStrategy (trait)
//!         │       ├── DirectStrategy ("direct-bundle") ──┐
//!         │       ├── DirectStrategy ("direct-package") ─┴── SegmentedFetcher
//!         │       └── ToolStrategy   ("tool") ──────────────── subprocess
//!         │
//!         └── WorkerPool (blocking work never runs on the scheduler)
//! ```
//!
//! Channels never retry internally: a timeout or error is returned as a
//! [`ChannelError`] and retry-by-fallback is left to the resolver.

pub mod direct;
mod error;
pub mod tool;

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

pub use error::{ChannelError, ChannelResult};

use crate::package::PackageId;

/// Boxed future type for dyn-compatible async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Channel family a strategy belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Direct URL download (channel A).
    Direct,
    /// External acquisition tool (channel B).
    Tool,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Direct => f.write_str("direct"),
            Channel::Tool => f.write_str("tool"),
        }
    }
}

/// A file delivered by a strategy, not yet classified or cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acquired {
    /// Path of the delivered file (inside the staging area).
    pub path: PathBuf,
    /// Size in bytes; always above the plausibility threshold.
    pub size_bytes: u64,
}

/// One way of turning an identifier into a downloaded file.
///
/// Implementations must:
/// - deliver the file somewhere under `staging_dir`,
/// - reject results at or below the plausibility threshold with
///   [`ChannelError::Implausible`],
/// - keep blocking work off the async scheduler,
/// - bound their own running time and report expiry as
///   [`ChannelError::Timeout`] rather than retrying.
pub trait AcquisitionStrategy: Send + Sync {
    /// Stable name, reported as the artifact source (e.g. `direct-bundle`).
    fn name(&self) -> &str;

    /// Channel family.
    fn channel(&self) -> Channel;

    /// Acquire `id` into `staging_dir`.
    fn acquire<'a>(
        &'a self,
        id: &'a PackageId,
        staging_dir: &'a Path,
    ) -> BoxFuture<'a, ChannelResult<Acquired>>;
}

/// Accept a delivered file only if it exists and exceeds `min_bytes`.
///
/// Truncated transfers and HTML error pages are typically tiny, so the
/// same check rejects both.
pub fn check_plausible(path: &Path, min_bytes: u64) -> ChannelResult<Acquired> {
    let size = std::fs::metadata(path)
        .map_err(|source| ChannelError::Io {
            path: path.to_path_buf(),
            source,
        })?
        .len();

    if size <= min_bytes {
        return Err(ChannelError::Implausible {
            path: path.to_path_buf(),
            size,
            minimum: min_bytes,
        });
    }

    Ok(Acquired {
        path: path.to_path_buf(),
        size_bytes: size,
    })
}
