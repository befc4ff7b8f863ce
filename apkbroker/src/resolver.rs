//! Ordered fallback across acquisition strategies.
//!
//! The resolver tries each configured [`AcquisitionStrategy`] in order and
//! stops at the first one that delivers a plausible file. The file is then
//! classified (on the worker pool, since it opens an archive) and returned
//! as a [`Resolved`] still sitting in the staging area; committing it to the
//! cache is the broker's job.
//!
//! With `force_tool`, only strategies of the [`Channel::Tool`] family run.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::channel::{AcquisitionStrategy, Channel, ChannelError};
use crate::classify::{Classifier, Evidence};
use crate::package::{ArtifactKind, PackageId};
use crate::worker::WorkerPool;

/// A failed attempt by one strategy.
#[derive(Debug)]
pub struct Attempt {
    /// Strategy name.
    pub strategy: String,
    /// Why it failed.
    pub error: ChannelError,
}

impl fmt::Display for Attempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.strategy, self.error)
    }
}

/// Every eligible strategy failed.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// No strategy delivered a plausible artifact.
    #[error("{id} could not be acquired ({} attempt(s))", attempts.len())]
    NotFound { id: PackageId, attempts: Vec<Attempt> },
}

impl ResolveError {
    /// The attempts made, in order.
    pub fn attempts(&self) -> &[Attempt] {
        match self {
            ResolveError::NotFound { attempts, .. } => attempts,
        }
    }
}

/// A successfully acquired and classified file.
#[derive(Debug, Clone)]
pub struct Resolved {
    /// Location in the staging area.
    pub path: PathBuf,
    /// Size in bytes.
    pub size_bytes: u64,
    /// Classified artifact form.
    pub kind: ArtifactKind,
    /// What the classification was based on.
    pub evidence: Evidence,
    /// Name of the strategy that delivered it.
    pub strategy: String,
    /// Channel family of that strategy.
    pub channel: Channel,
}

/// Tries strategies in order until one succeeds.
pub struct FallbackResolver {
    strategies: Vec<Arc<dyn AcquisitionStrategy>>,
    classifier: Classifier,
    pool: WorkerPool,
    staging_dir: PathBuf,
}

impl FallbackResolver {
    /// Create a resolver over `strategies` (tried in the given order).
    pub fn new(
        strategies: Vec<Arc<dyn AcquisitionStrategy>>,
        classifier: Classifier,
        pool: WorkerPool,
        staging_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            strategies,
            classifier,
            pool,
            staging_dir: staging_dir.into(),
        }
    }

    /// Names of the configured strategies, in order.
    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Directory strategies deliver into.
    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// The classifier applied to delivered files.
    pub fn classifier(&self) -> Classifier {
        self.classifier
    }

    /// Acquire `id`, trying each eligible strategy in order.
    pub async fn acquire(&self, id: &PackageId, force_tool: bool) -> Result<Resolved, ResolveError> {
        let mut attempts = Vec::new();

        let eligible = self
            .strategies
            .iter()
            .filter(|s| !force_tool || s.channel() == Channel::Tool);

        for strategy in eligible {
            debug!(package = %id, strategy = strategy.name(), "Trying strategy");

            match strategy.acquire(id, &self.staging_dir).await {
                Ok(acquired) => {
                    let (kind, evidence) = self.classify(&acquired.path).await;
                    info!(
                        package = %id,
                        strategy = strategy.name(),
                        kind = %kind,
                        evidence = %evidence,
                        size_bytes = acquired.size_bytes,
                        "Acquired package"
                    );
                    return Ok(Resolved {
                        path: acquired.path,
                        size_bytes: acquired.size_bytes,
                        kind,
                        evidence,
                        strategy: strategy.name().to_string(),
                        channel: strategy.channel(),
                    });
                }
                Err(error) => {
                    if error.is_not_available() {
                        info!(package = %id, strategy = strategy.name(), "Strategy reports not found");
                    } else {
                        warn!(package = %id, strategy = strategy.name(), error = %error, "Strategy failed");
                    }
                    attempts.push(Attempt {
                        strategy: strategy.name().to_string(),
                        error,
                    });
                }
            }
        }

        info!(package = %id, attempts = attempts.len(), force_tool, "All strategies exhausted");
        Err(ResolveError::NotFound {
            id: id.clone(),
            attempts,
        })
    }

    async fn classify(&self, path: &Path) -> (ArtifactKind, Evidence) {
        let classifier = self.classifier;
        let owned = path.to_path_buf();
        match self.pool.run("classify", move || classifier.classify(&owned)).await {
            Ok(c) => (c.kind, c.evidence),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Classification job failed");
                (
                    classifier.policy().default_kind(),
                    Evidence::Unreadable(e.to_string()),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{Acquired, BoxFuture, ChannelResult};
    use crate::classify::UnrecognizedPolicy;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed {
        name: &'static str,
        channel: Channel,
        deliver: bool,
        calls: AtomicUsize,
    }

    impl Fixed {
        fn new(name: &'static str, channel: Channel, deliver: bool) -> Arc<Self> {
            Arc::new(Self {
                name,
                channel,
                deliver,
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl AcquisitionStrategy for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn channel(&self) -> Channel {
            self.channel
        }

        fn acquire<'a>(
            &'a self,
            id: &'a PackageId,
            staging_dir: &'a Path,
        ) -> BoxFuture<'a, ChannelResult<Acquired>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                if !self.deliver {
                    return Err(ChannelError::NotAvailable {
                        tool: self.name.to_string(),
                        package: id.to_string(),
                    });
                }
                let path = staging_dir.join(format!("{}.{}.part", id, self.name));
                std::fs::write(&path, vec![7u8; 150_000]).unwrap();
                Ok(Acquired {
                    path,
                    size_bytes: 150_000,
                })
            })
        }
    }

    fn resolver(dir: &Path, strategies: Vec<Arc<dyn AcquisitionStrategy>>) -> FallbackResolver {
        FallbackResolver::new(
            strategies,
            Classifier::new(UnrecognizedPolicy::AssumeSinglePackage),
            WorkerPool::new(2),
            dir,
        )
    }

    #[tokio::test]
    async fn test_first_success_wins() {
        let dir = tempfile::tempdir().unwrap();
        let a = Fixed::new("a", Channel::Direct, false);
        let b = Fixed::new("b", Channel::Direct, true);
        let c = Fixed::new("c", Channel::Tool, true);
        let r = resolver(dir.path(), vec![a.clone(), b.clone(), c.clone()]);

        let id = PackageId::parse("com.example.app").unwrap();
        let resolved = r.acquire(&id, false).await.unwrap();

        assert_eq!(resolved.strategy, "b");
        assert_eq!(resolved.channel, Channel::Direct);
        // Not a zip: falls back to the policy kind.
        assert_eq!(resolved.kind, ArtifactKind::SinglePackage);
        assert_eq!(a.calls.load(Ordering::SeqCst), 1);
        assert_eq!(c.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_force_tool_skips_direct() {
        let dir = tempfile::tempdir().unwrap();
        let a = Fixed::new("a", Channel::Direct, true);
        let t = Fixed::new("tool", Channel::Tool, true);
        let r = resolver(dir.path(), vec![a.clone(), t.clone()]);

        let id = PackageId::parse("com.example.app").unwrap();
        let resolved = r.acquire(&id, true).await.unwrap();

        assert_eq!(resolved.strategy, "tool");
        assert_eq!(a.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_exhaustion_collects_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let r = resolver(
            dir.path(),
            vec![
                Fixed::new("a", Channel::Direct, false),
                Fixed::new("b", Channel::Tool, false),
            ],
        );

        let id = PackageId::parse("com.example.missing").unwrap();
        let err = r.acquire(&id, false).await.unwrap_err();
        let names: Vec<_> = err.attempts().iter().map(|a| a.strategy.as_str()).collect();
        assert_eq!(names, ["a", "b"]);
        assert!(err.to_string().contains("2 attempt"));
    }

    #[tokio::test]
    async fn test_force_tool_without_tool_strategy_fails() {
        let dir = tempfile::tempdir().unwrap();
        let r = resolver(dir.path(), vec![Fixed::new("a", Channel::Direct, true)]);

        let id = PackageId::parse("com.example.app").unwrap();
        let err = r.acquire(&id, true).await.unwrap_err();
        assert!(err.attempts().is_empty());
    }
}
