//! Serve command - run the HTTP broker until Ctrl-C.

use std::net::SocketAddr;
use std::path::PathBuf;

use apkbroker::app::BrokerApp;
use apkbroker::config::BrokerConfig;
use clap::Args;
use tracing::{info, warn};

use super::common::runtime;
use crate::error::CliError;

/// Arguments for the serve command.
#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Listen address (overrides [server] bind)
    #[arg(long, value_name = "ADDR")]
    pub bind: Option<SocketAddr>,

    /// Artifact cache directory (overrides [cache] directory)
    #[arg(long, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,
}

/// Run the serve command.
pub fn run(mut config: BrokerConfig, args: ServeArgs) -> Result<(), CliError> {
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(dir) = args.cache_dir {
        config.cache = config.cache.with_directory(dir);
    }

    let _log_guard = apkbroker::log::init(&config.logging)?;
    let runtime = runtime()?;

    runtime.block_on(async move {
        let app = BrokerApp::start(config).await?;
        let listener = app.bind().await?;

        let token = app.shutdown_token();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Ctrl-C received, shutting down");
                    token.cancel();
                }
                Err(e) => warn!(error = %e, "Cannot listen for Ctrl-C"),
            }
        });

        let served = app.serve(listener).await;
        app.shutdown().await;
        served.map_err(CliError::from)
    })
}
