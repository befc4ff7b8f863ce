//! Application bootstrap implementation.
//!
//! `BrokerApp` builds the service in dependency order and tears it down in
//! reverse: the server stops accepting, the sweeper exits, pending deletion
//! timers are cancelled (their files stay on disk for the next start's
//! sweeper) and the worker pool is closed.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::error::AppError;
use crate::api;
use crate::broker::Broker;
use crate::cache::{CacheStore, DiskStore};
use crate::channel::direct::{
    DirectStrategy, SegmentedFetcher, BUNDLE_STRATEGY_NAME, PACKAGE_STRATEGY_NAME,
};
use crate::channel::tool::ToolStrategy;
use crate::channel::AcquisitionStrategy;
use crate::classify::Classifier;
use crate::config::BrokerConfig;
use crate::resolver::FallbackResolver;
use crate::sweeper::Sweeper;
use crate::worker::WorkerPool;

/// A running broker with its background tasks.
pub struct BrokerApp {
    config: BrokerConfig,
    broker: Arc<Broker>,
    pool: WorkerPool,
    shutdown: CancellationToken,
    sweeper: JoinHandle<()>,
}

impl BrokerApp {
    /// Open the cache, build the strategy chain and start the sweeper.
    ///
    /// # Errors
    ///
    /// Fails if the cache directory cannot be created or if every channel
    /// is disabled.
    pub async fn start(config: BrokerConfig) -> Result<Self, AppError> {
        info!(
            cache_dir = %config.cache.directory.display(),
            max_blocking = config.max_blocking,
            "Starting apkbroker"
        );

        let pool = WorkerPool::new(config.max_blocking);
        let strategies = build_strategies(&config, &pool);
        if strategies.is_empty() {
            return Err(AppError::NoChannels);
        }

        let disk = DiskStore::open(&config.cache.directory, config.cache.min_artifact_bytes).await?;
        let store = Arc::new(CacheStore::new(
            disk,
            config.cache.negative_ttl,
            config.cache.deletion_delay,
        ));

        let resolver = FallbackResolver::new(
            strategies,
            Classifier::new(config.unrecognized),
            pool.clone(),
            store.staging_dir(),
        );
        let broker = Arc::new(Broker::new(Arc::clone(&store), resolver));
        info!(strategies = ?broker.strategy_names(), "Fallback chain ready");

        let shutdown = CancellationToken::new();
        let sweeper = Sweeper::new(
            store,
            config.cache.sweep_interval,
            config.cache.max_age,
        )
        .spawn(shutdown.child_token());

        Ok(Self {
            config,
            broker,
            pool,
            shutdown,
            sweeper,
        })
    }

    /// The broker shared with request handlers.
    pub fn broker(&self) -> Arc<Broker> {
        Arc::clone(&self.broker)
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Token that stops [`serve`](Self::serve) and the sweeper when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Bind the configured listen address.
    pub async fn bind(&self) -> Result<TcpListener, AppError> {
        let addr = self.config.server.bind;
        TcpListener::bind(addr)
            .await
            .map_err(|source| AppError::Bind { addr, source })
    }

    /// Serve HTTP on `listener` until the shutdown token is cancelled.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), AppError> {
        api::serve(listener, self.broker(), self.shutdown.clone())
            .await
            .map_err(AppError::Serve)
    }

    /// Shutdown the application gracefully.
    pub async fn shutdown(self) {
        info!("Shutting down apkbroker");

        self.shutdown.cancel();
        if let Err(e) = self.sweeper.await {
            warn!(error = %e, "Sweeper task ended abnormally");
        }

        let cancelled = self.broker.cache().deletions().cancel_all();
        self.pool.close();

        info!(timers_cancelled = cancelled, "apkbroker shutdown complete");
    }
}

/// Strategy chain in fallback order: direct bundle, direct package, tool.
/// Disabled channels are left out.
pub fn build_strategies(
    config: &BrokerConfig,
    pool: &WorkerPool,
) -> Vec<Arc<dyn AcquisitionStrategy>> {
    let min_bytes = config.cache.min_artifact_bytes;
    let mut strategies: Vec<Arc<dyn AcquisitionStrategy>> = Vec::new();

    if config.direct.enabled {
        let fetcher = SegmentedFetcher::new(config.direct.fetch.clone());
        strategies.push(Arc::new(DirectStrategy::new(
            BUNDLE_STRATEGY_NAME,
            config.direct.bundle_url.clone(),
            fetcher.clone(),
            pool.clone(),
            min_bytes,
        )));
        strategies.push(Arc::new(DirectStrategy::new(
            PACKAGE_STRATEGY_NAME,
            config.direct.package_url.clone(),
            fetcher,
            pool.clone(),
            min_bytes,
        )));
    }

    if config.tool.enabled {
        strategies.push(Arc::new(ToolStrategy::new(
            config.tool.path.clone(),
            config.tool.timeout,
            pool.clone(),
            min_bytes,
        )));
    }

    strategies
}
