//! Lifecycle sweeper.
//!
//! A background loop that, every `interval`, removes cached artifacts and
//! staged partial files older than `max_age`, whether or not a per-artifact
//! deletion timer also targets them. This catches files orphaned by an
//! abnormal exit before their timer fired.
//!
//! ```ignore
//! let shutdown = CancellationToken::new();
//! let handle = Sweeper::new(store, interval, max_age).spawn(shutdown.clone());
//! // ...
//! shutdown.cancel();
//! handle.await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{CacheStore, RemovalResult};

/// Default time between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Default maximum age of a cached file.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(300);

/// Periodic age-based eviction.
pub struct Sweeper {
    store: Arc<CacheStore>,
    interval: Duration,
    max_age: Duration,
}

impl Sweeper {
    pub fn new(store: Arc<CacheStore>, interval: Duration, max_age: Duration) -> Self {
        Self {
            store,
            interval,
            max_age,
        }
    }

    /// Run one pass. Errors are logged, never propagated.
    pub async fn sweep_once(&self) -> RemovalResult {
        match self.store.sweep(self.max_age).await {
            Ok(result) => {
                if result.is_empty() {
                    debug!("Sweep found nothing to remove");
                } else {
                    info!(
                        files_removed = result.files_removed,
                        bytes_freed = result.bytes_freed,
                        max_age_secs = self.max_age.as_secs(),
                        "Swept stale cache files"
                    );
                }
                result
            }
            Err(e) => {
                warn!(error = %e, "Cache sweep failed");
                RemovalResult::default()
            }
        }
    }

    /// Loop until `shutdown` is cancelled. The first sweep runs one
    /// interval after start.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            max_age_secs = self.max_age.as_secs(),
            "Sweeper starting"
        );

        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Sweeper shutting down");
                    break;
                }

                _ = ticker.tick() => {
                    self.sweep_once().await;
                }
            }
        }
    }

    /// Spawn [`run`](Self::run) as a background task.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
