//! Cache store: positive artifacts on disk, negative results in memory.
//!
//! # Architecture
//!
//! ```text
//!                    ┌─────────────────────────────────────┐
//! Broker ──────────► │             CacheStore              │ ◄────── Sweeper
//! (request path)     │                                     │   (background)
//!                    │  DiskStore        {id}.{ext} files  │
//!                    │  NegativeCache    id → timestamp    │
//!                    │  DeletionScheduler id → timer       │
//!                    └─────────────────────────────────────┘
//! ```
//!
//! All mutation of the cache directory and the two maps goes through this
//! type. Bulk eviction cancels every timer before removing files, so a timer
//! can never fire against a file the eviction is about to remove.

mod deletion;
mod disk;
mod error;
mod negative;
mod stats;

pub use deletion::{DeletionScheduler, DEFAULT_DELETION_DELAY};
pub use disk::{CachedFile, DiskStore, STAGING_DIR_NAME};
pub use error::{CacheError, CacheResult, RemovalResult};
pub use negative::{NegativeCache, NegativeEntry, DEFAULT_NEGATIVE_TTL};
pub use stats::{CounterSnapshot, Counters};

use std::path::Path;
use std::time::Duration;

use tracing::{debug, info};

use crate::package::{ArtifactKind, PackageId};

/// Outcome of [`CacheStore::evict_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionResult {
    pub removed: RemovalResult,
    pub timers_cancelled: usize,
}

/// Both cache tiers plus the deletion timers.
#[derive(Debug)]
pub struct CacheStore {
    disk: DiskStore,
    negative: NegativeCache,
    deletions: DeletionScheduler,
}

impl CacheStore {
    /// Assemble a store from an opened [`DiskStore`].
    pub fn new(disk: DiskStore, negative_ttl: Duration, deletion_delay: Duration) -> Self {
        Self {
            disk,
            negative: NegativeCache::new(negative_ttl),
            deletions: DeletionScheduler::new(deletion_delay),
        }
    }

    pub fn disk(&self) -> &DiskStore {
        &self.disk
    }

    pub fn negative(&self) -> &NegativeCache {
        &self.negative
    }

    pub fn deletions(&self) -> &DeletionScheduler {
        &self.deletions
    }

    /// Staging directory for acquisitions.
    pub fn staging_dir(&self) -> &Path {
        self.disk.staging_dir()
    }

    // =========================================================================
    // Positive tier
    // =========================================================================

    pub async fn get(&self, id: &PackageId) -> Option<CachedFile> {
        self.disk.get(id).await
    }

    pub async fn put(
        &self,
        id: &PackageId,
        staged: &Path,
        kind: ArtifactKind,
    ) -> CacheResult<CachedFile> {
        self.disk.put(id, staged, kind).await
    }

    /// Remove `id`'s artifact and cancel its pending deletion.
    pub async fn evict(&self, id: &PackageId) -> CacheResult<RemovalResult> {
        let cancelled = self.deletions.cancel(id);
        let removed = self.disk.remove(id).await?;
        if cancelled || !removed.is_empty() {
            debug!(package = %id, timer_cancelled = cancelled, %removed, "Evicted artifact");
        }
        Ok(removed)
    }

    /// Cancel every timer, then remove every file.
    pub async fn evict_all(&self) -> CacheResult<EvictionResult> {
        let timers_cancelled = self.deletions.cancel_all();
        let removed = self.disk.clear().await?;
        info!(timers_cancelled, %removed, "Evicted all artifacts");
        Ok(EvictionResult {
            removed,
            timers_cancelled,
        })
    }

    /// Remove files older than `max_age`.
    pub async fn sweep(&self, max_age: Duration) -> CacheResult<RemovalResult> {
        self.disk.remove_older_than(max_age).await
    }

    /// Bytes used by the cache directory.
    pub async fn size_bytes(&self) -> u64 {
        self.disk.size_bytes().await
    }

    // =========================================================================
    // Deletion timers
    // =========================================================================

    pub fn schedule_deletion(&self, file: &CachedFile) {
        self.deletions.schedule(&file.id, file.path.clone());
    }

    pub fn cancel_deletion(&self, id: &PackageId) -> bool {
        self.deletions.cancel(id)
    }

    // =========================================================================
    // Negative tier
    // =========================================================================

    pub fn is_negative(&self, id: &PackageId) -> bool {
        self.negative.is_negative(id)
    }

    pub fn record_negative(&self, id: &PackageId) {
        self.negative.record(id);
    }

    pub fn clear_negative(&self, id: &PackageId) -> bool {
        self.negative.clear(id)
    }

    pub fn clear_all_negative(&self) -> usize {
        self.negative.clear_all()
    }

    pub fn negative_entries(&self) -> Vec<NegativeEntry> {
        self.negative.entries()
    }
}
