//! Scheduled per-artifact deletion.
//!
//! After an artifact is served, the broker schedules its removal after a
//! fixed delay. At most one deletion is pending per identifier: scheduling
//! again cancels and replaces the previous timer instead of stacking.
//!
//! Each pending deletion carries a generation number. When a timer fires it
//! removes its map entry only if the generation still matches, and deletes
//! the file inside that same map operation, so a concurrent
//! [`DeletionScheduler::cancel`] either wins (nothing is deleted) or loses
//! (the entry is already gone). A file that has disappeared in the meantime
//! is a no-op.

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::package::PackageId;

/// Default delay between serving and deleting an artifact.
pub const DEFAULT_DELETION_DELAY: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct PendingDeletion {
    generation: u64,
    token: CancellationToken,
}

/// Owner of every outstanding deletion timer.
#[derive(Debug)]
pub struct DeletionScheduler {
    pending: Arc<DashMap<PackageId, PendingDeletion>>,
    next_generation: AtomicU64,
    delay: Duration,
}

impl DeletionScheduler {
    /// Create a scheduler with the given delay.
    pub fn new(delay: Duration) -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
            next_generation: AtomicU64::new(0),
            delay,
        }
    }

    /// Configured delay.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Delete `path` after the delay, replacing any pending deletion for `id`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn schedule(&self, id: &PackageId, path: PathBuf) {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();

        let previous = self.pending.insert(
            id.clone(),
            PendingDeletion {
                generation,
                token: token.clone(),
            },
        );
        if let Some(previous) = previous {
            previous.token.cancel();
            trace!(package = %id, "Superseded pending deletion");
        }

        debug!(package = %id, delay_secs = self.delay.as_secs(), "Scheduled deletion");

        let pending = Arc::clone(&self.pending);
        let delay = self.delay;
        let id = id.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    trace!(package = %id, generation, "Deletion cancelled");
                }
                _ = tokio::time::sleep(delay) => {
                    let mut outcome = None;
                    pending.remove_if(&id, |_, entry| {
                        if entry.generation != generation {
                            return false;
                        }
                        outcome = Some(std::fs::remove_file(&path));
                        true
                    });

                    match outcome {
                        Some(Ok(())) => debug!(package = %id, path = %path.display(), "Deleted served artifact"),
                        Some(Err(e)) if e.kind() == io::ErrorKind::NotFound => {
                            trace!(package = %id, "Artifact already gone");
                        }
                        Some(Err(e)) => warn!(package = %id, path = %path.display(), error = %e, "Scheduled deletion failed"),
                        None => trace!(package = %id, generation, "Deletion superseded before firing"),
                    }
                }
            }
        });
    }

    /// Cancel the pending deletion for `id`; returns whether one existed.
    pub fn cancel(&self, id: &PackageId) -> bool {
        match self.pending.remove(id) {
            Some((_, entry)) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every pending deletion; returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let mut cancelled = 0;
        self.pending.retain(|_, entry| {
            entry.token.cancel();
            cancelled += 1;
            false
        });
        cancelled
    }

    /// Whether a deletion is pending for `id`.
    pub fn is_pending(&self, id: &PackageId) -> bool {
        self.pending.contains_key(id)
    }

    /// Number of pending deletions.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl Default for DeletionScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_DELETION_DELAY)
    }
}
