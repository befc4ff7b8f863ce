//! Direct URL channel.
//!
//! A [`DirectStrategy`] expands a URL template with the package identifier
//! and hands the transfer to a [`SegmentedFetcher`] running on the worker
//! pool. Two instances are configured by default, one per upstream
//! artifact form:
//!
//! | Strategy         | Template                                          |
//! |------------------|---------------------------------------------------|
//! | `direct-bundle`  | `https://d.apkpure.com/b/XAPK/{id}?version=latest` |
//! | `direct-package` | `https://d.apkpure.com/b/APK/{id}?version=latest`  |
//!
//! The staged file is named `{id}.{strategy}.part`, so an interrupted
//! transfer is resumed by the next attempt of the same strategy.

mod segmented;

pub use segmented::{
    FetchConfig, SegmentedFetcher, DEFAULT_CONNECTIONS, DEFAULT_CONNECT_TIMEOUT_SECS,
    DEFAULT_MIN_SPLIT_BYTES, DEFAULT_OVERALL_TIMEOUT_SECS, DEFAULT_REQUEST_TIMEOUT_SECS,
};

use std::path::Path;
use std::time::Instant;

use tracing::{debug, info};

use super::{check_plausible, Acquired, AcquisitionStrategy, BoxFuture, Channel, ChannelResult};
use crate::package::PackageId;
use crate::worker::WorkerPool;

/// Placeholder substituted with the package identifier.
pub const ID_PLACEHOLDER: &str = "{id}";

/// Default template for the split-bundle form.
pub const DEFAULT_BUNDLE_URL: &str = "https://d.apkpure.com/b/XAPK/{id}?version=latest";

/// Default template for the single-package form.
pub const DEFAULT_PACKAGE_URL: &str = "https://d.apkpure.com/b/APK/{id}?version=latest";

/// Strategy name of the split-bundle endpoint.
pub const BUNDLE_STRATEGY_NAME: &str = "direct-bundle";

/// Strategy name of the single-package endpoint.
pub const PACKAGE_STRATEGY_NAME: &str = "direct-package";

/// Acquisition strategy backed by a direct HTTP transfer.
pub struct DirectStrategy {
    name: String,
    url_template: String,
    fetcher: SegmentedFetcher,
    pool: WorkerPool,
    min_bytes: u64,
}

impl DirectStrategy {
    /// Create a strategy.
    ///
    /// `url_template` should contain [`ID_PLACEHOLDER`]; `min_bytes` is the
    /// plausibility threshold a delivered file must exceed.
    pub fn new(
        name: impl Into<String>,
        url_template: impl Into<String>,
        fetcher: SegmentedFetcher,
        pool: WorkerPool,
        min_bytes: u64,
    ) -> Self {
        Self {
            name: name.into(),
            url_template: url_template.into(),
            fetcher,
            pool,
            min_bytes,
        }
    }

    /// Concrete URL for `id`.
    pub fn url_for(&self, id: &PackageId) -> String {
        self.url_template.replace(ID_PLACEHOLDER, id.as_str())
    }

    /// Staging file name for `id`.
    pub fn staging_name(&self, id: &PackageId) -> String {
        format!("{}.{}.part", id, self.name)
    }

    async fn fetch(&self, id: &PackageId, staging_dir: &Path) -> ChannelResult<Acquired> {
        let url = self.url_for(id);
        let filename = self.staging_name(id);
        let dir = staging_dir.to_path_buf();
        let fetcher = self.fetcher.clone();

        info!(strategy = %self.name, package = %id, url = %url, "Starting direct transfer");
        let start = Instant::now();

        let path = self
            .pool
            .run("direct-transfer", move || fetcher.fetch(&url, &dir, &filename))
            .await??;

        match check_plausible(&path, self.min_bytes) {
            Ok(acquired) => {
                info!(
                    strategy = %self.name,
                    package = %id,
                    size_bytes = acquired.size_bytes,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Direct transfer delivered"
                );
                Ok(acquired)
            }
            Err(e) => {
                // An error page must not be resumed by the next attempt.
                debug!(strategy = %self.name, package = %id, error = %e, "Discarding implausible file");
                tokio::fs::remove_file(&path).await.ok();
                Err(e)
            }
        }
    }
}

impl AcquisitionStrategy for DirectStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn channel(&self) -> Channel {
        Channel::Direct
    }

    fn acquire<'a>(
        &'a self,
        id: &'a PackageId,
        staging_dir: &'a Path,
    ) -> BoxFuture<'a, ChannelResult<Acquired>> {
        Box::pin(self.fetch(id, staging_dir))
    }
}
