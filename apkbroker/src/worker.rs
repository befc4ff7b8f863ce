//! Bounded pool for blocking work.
//!
//! Segmented transfers, archive inspection and subprocess supervision must
//! never run on the async scheduler's threads. [`WorkerPool`] hands them to
//! Tokio's blocking pool, gated by a semaphore so at most `capacity` such
//! jobs run at once; excess callers queue (suspend) on the semaphore.
//!
//! ```ignore
//! let pool = WorkerPool::new(8);
//! let kind = pool.run("classify", move || classifier.classify(&path)).await?;
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::trace;

/// Minimum number of concurrent blocking jobs.
pub const MIN_WORKERS: usize = 4;

/// Errors from the worker pool.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The pool has been closed.
    #[error("worker pool is closed")]
    Closed,

    /// The blocking job panicked or was cancelled.
    #[error("worker job '{label}' failed: {reason}")]
    Join { label: &'static str, reason: String },
}

/// Permit for work that is not a closure (e.g. awaiting a child process).
///
/// Counts against the pool capacity until dropped.
pub struct WorkerPermit {
    _permit: OwnedSemaphorePermit,
    in_flight: Arc<AtomicUsize>,
}

impl Drop for WorkerPermit {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Semaphore-bounded front end to `spawn_blocking`.
///
/// Cheap to clone; clones share the same capacity.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    in_flight: Arc<AtomicUsize>,
}

impl WorkerPool {
    /// Create a pool allowing `capacity` concurrent jobs (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Create a pool sized from the available parallelism.
    ///
    /// Twice the core count, never below [`MIN_WORKERS`]: most jobs are
    /// network- or process-bound rather than CPU-bound.
    pub fn with_defaults() -> Self {
        Self::new(default_capacity())
    }

    /// Maximum concurrent jobs.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Jobs currently holding a permit.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Wait for a free slot without running a closure.
    pub async fn acquire(&self) -> Result<WorkerPermit, WorkerError> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| WorkerError::Closed)?;
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        Ok(WorkerPermit {
            _permit: permit,
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    /// Run a blocking closure on the pool and await its result.
    pub async fn run<F, T>(&self, label: &'static str, job: F) -> Result<T, WorkerError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = self.acquire().await?;
        trace!(label, in_flight = self.in_flight(), "Dispatching blocking job");

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        })
        .await
        .map_err(|e| WorkerError::Join {
            label,
            reason: e.to_string(),
        })
    }

    /// Stop handing out permits; queued and future callers get `Closed`.
    pub fn close(&self) {
        self.semaphore.close();
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Default pool capacity for this machine.
pub fn default_capacity() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get() * 2)
        .unwrap_or(MIN_WORKERS)
        .max(MIN_WORKERS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_min_capacity() {
        assert_eq!(WorkerPool::new(0).capacity(), 1);
        assert!(WorkerPool::with_defaults().capacity() >= MIN_WORKERS);
    }

    #[tokio::test]
    async fn test_run_returns_value() {
        let pool = WorkerPool::new(2);
        let value = pool.run("add", || 40 + 2).await.unwrap();
        assert_eq!(value, 42);
        assert_eq!(pool.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_panic_becomes_join_error() {
        let pool = WorkerPool::new(1);
        let result: Result<(), _> = pool.run("boom", || panic!("boom")).await;
        assert!(matches!(result, Err(WorkerError::Join { label: "boom", .. })));
        // The permit was released despite the panic.
        assert_eq!(pool.in_flight(), 0);
        assert_eq!(pool.run("after", || 1).await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_capacity_is_enforced() {
        let pool = WorkerPool::new(2);
        let peak = Arc::new(AtomicUsize::new(0));
        let current = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let pool = pool.clone();
            let peak = Arc::clone(&peak);
            let current = Arc::clone(&current);
            handles.push(tokio::spawn(async move {
                pool.run("sleep", move || {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(30));
                    current.fetch_sub(1, Ordering::SeqCst);
                })
                .await
                .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_closed_pool_rejects() {
        let pool = WorkerPool::new(1);
        pool.close();
        assert!(matches!(pool.acquire().await, Err(WorkerError::Closed)));
    }
}
