//! The broker: resolve an identifier to a cached artifact.
//!
//! [`Broker::resolve`] is the single entry point callers use. It composes
//! the negative cache, the per-identifier lock table, the positive cache,
//! the fallback resolver and the deletion scheduler:
//!
//! ```text
//! resolve(id, force_tool)
//!   │
//!   ├─ total_requests += 1
//!   ├─ negative? ──────────────────────────────► NotFoundCached (fast reject)
//!   ├─ lock(id)
//!   │    ├─ negative? (set while we waited) ────► NotFoundCached
//!   │    ├─ cached? (unless forced) ────────────► Artifact (source = cache)
//!   │    ├─ cancel pending deletion
//!   │    └─ FallbackResolver::acquire
//!   │         ├─ ok:   put → clear negative → schedule deletion → downloads += 1
//!   │         └─ fail: evict positive → record negative → not_found += 1
//!   └─ unlock (guard drop)
//! ```
//!
//! After every call a positive artifact and a live negative entry never
//! coexist for the same identifier.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::{
    CacheError, CacheResult, CacheStore, CachedFile, CounterSnapshot, Counters, NegativeEntry,
};
use crate::locks::KeyedLocks;
use crate::package::{Artifact, ArtifactSource, PackageId};
use crate::resolver::{Attempt, FallbackResolver, ResolveError};

/// Why `resolve` produced no artifact.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// A live negative entry short-circuited the request.
    #[error("{id} was recently not found")]
    NotFoundCached { id: PackageId },

    /// Every eligible strategy failed.
    #[error("{id} not found on any channel")]
    NotFound { id: PackageId, attempts: Vec<Attempt> },

    /// The artifact was acquired but could not be committed to the cache.
    #[error("failed to cache {id}: {source}")]
    Storage {
        id: PackageId,
        #[source]
        source: CacheError,
    },
}

impl BrokerError {
    /// Whether the package is (or was recently) unavailable upstream.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            BrokerError::NotFoundCached { .. } | BrokerError::NotFound { .. }
        )
    }

    /// Whether this was answered from the negative cache.
    pub fn is_fast_reject(&self) -> bool {
        matches!(self, BrokerError::NotFoundCached { .. })
    }
}

/// Summary of [`Broker::clear_cache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClearSummary {
    pub files_removed: usize,
    pub bytes_freed: u64,
    pub timers_cancelled: usize,
    pub negatives_cleared: usize,
}

/// Snapshot for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BrokerStats {
    pub counters: CounterSnapshot,
    pub cached_not_found: usize,
    pub cache_dir_bytes: u64,
}

/// Composition root of the acquisition-and-cache core.
pub struct Broker {
    cache: Arc<CacheStore>,
    locks: KeyedLocks,
    resolver: FallbackResolver,
    counters: Counters,
}

impl Broker {
    pub fn new(cache: Arc<CacheStore>, resolver: FallbackResolver) -> Self {
        Self {
            cache,
            locks: KeyedLocks::new(),
            resolver,
            counters: Counters::new(),
        }
    }

    /// Shared cache store (also driven by the sweeper).
    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    /// Configured strategy names, in fallback order.
    pub fn strategy_names(&self) -> Vec<&str> {
        self.resolver.strategy_names()
    }

    /// Identifiers with an acquisition in flight or queued.
    pub fn in_flight(&self) -> usize {
        self.locks.len()
    }

    /// Resolve `id` to an artifact.
    ///
    /// With `force_tool`, the positive cache is bypassed and only tool
    /// strategies run; a live negative entry still short-circuits.
    pub async fn resolve(&self, id: &PackageId, force_tool: bool) -> Result<Artifact, BrokerError> {
        self.counters.request();

        if self.cache.is_negative(id) {
            self.counters.cache_hit();
            debug!(package = %id, "Fast reject from negative cache");
            return Err(BrokerError::NotFoundCached { id: id.clone() });
        }

        let _guard = self.locks.acquire(id.as_str()).await;

        // Whoever held the lock before us may have just failed.
        if self.cache.is_negative(id) {
            self.counters.cache_hit();
            debug!(package = %id, "Negative entry appeared while waiting");
            return Err(BrokerError::NotFoundCached { id: id.clone() });
        }

        if !force_tool {
            if let Some(file) = self.cache.get(id).await {
                self.counters.cache_hit();
                debug!(package = %id, kind = %file.kind, "Cache hit");
                return Ok(to_artifact(file, ArtifactSource::Cache));
            }
        }

        // An older timer must not fire between put and reschedule.
        self.cache.cancel_deletion(id);

        match self.resolver.acquire(id, force_tool).await {
            Ok(resolved) => {
                let file = match self.cache.put(id, &resolved.path, resolved.kind).await {
                    Ok(file) => file,
                    Err(source) => {
                        warn!(package = %id, error = %source, "Failed to commit artifact");
                        tokio::fs::remove_file(&resolved.path).await.ok();
                        return Err(BrokerError::Storage {
                            id: id.clone(),
                            source,
                        });
                    }
                };

                self.cache.clear_negative(id);
                self.cache.schedule_deletion(&file);
                self.counters.download();

                info!(
                    package = %id,
                    kind = %file.kind,
                    size_bytes = file.size_bytes,
                    strategy = %resolved.strategy,
                    "Serving acquired artifact"
                );
                Ok(to_artifact(file, ArtifactSource::Channel(resolved.strategy)))
            }
            Err(ResolveError::NotFound { attempts, .. }) => {
                if let Err(e) = self.cache.evict(id).await {
                    warn!(package = %id, error = %e, "Failed to evict stale artifact");
                }
                self.cache.record_negative(id);
                self.counters.not_found();

                for attempt in &attempts {
                    debug!(package = %id, %attempt, "Failed attempt");
                }
                Err(BrokerError::NotFound {
                    id: id.clone(),
                    attempts,
                })
            }
        }
    }

    /// Cached artifact for `id`, if any. Never acquires, never counts.
    pub async fn peek(&self, id: &PackageId) -> Option<Artifact> {
        self.cache
            .get(id)
            .await
            .map(|file| to_artifact(file, ArtifactSource::Cache))
    }

    /// Whether `id` is negatively cached (expiring it if stale).
    pub fn is_negative(&self, id: &PackageId) -> bool {
        self.cache.is_negative(id)
    }

    /// Live negative entries.
    pub fn negative_entries(&self) -> Vec<NegativeEntry> {
        self.cache.negative_entries()
    }

    /// Drop the negative entry for `id`; returns whether there was one.
    pub fn forget_negative(&self, id: &PackageId) -> bool {
        let removed = self.cache.clear_negative(id);
        if removed {
            info!(package = %id, "Cleared negative entry");
        }
        removed
    }

    /// Evict every artifact, cancel every timer, clear both tiers and
    /// reset the counters.
    pub async fn clear_cache(&self) -> CacheResult<ClearSummary> {
        let eviction = self.cache.evict_all().await?;
        let negatives_cleared = self.cache.clear_all_negative();
        self.counters.reset();

        Ok(ClearSummary {
            files_removed: eviction.removed.files_removed,
            bytes_freed: eviction.removed.bytes_freed,
            timers_cancelled: eviction.timers_cancelled,
            negatives_cleared,
        })
    }

    /// Counters plus cache occupancy.
    pub async fn stats(&self) -> BrokerStats {
        BrokerStats {
            counters: self.counters.snapshot(),
            cached_not_found: self.cache.negative_entries().len(),
            cache_dir_bytes: self.cache.size_bytes().await,
        }
    }

    /// Counter values only.
    pub fn counters(&self) -> CounterSnapshot {
        self.counters.snapshot()
    }
}

fn to_artifact(file: CachedFile, source: ArtifactSource) -> Artifact {
    Artifact {
        id: file.id,
        kind: file.kind,
        path: file.path,
        size_bytes: file.size_bytes,
        created_at: file.modified,
        source,
    }
}
