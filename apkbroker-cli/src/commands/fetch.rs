//! Fetch command - resolve one package without the HTTP server.

use std::path::{Path, PathBuf};

use apkbroker::app::BrokerApp;
use apkbroker::config::BrokerConfig;
use apkbroker::{Artifact, BrokerError, PackageId};
use clap::Args;

use super::common::{format_size, runtime};
use crate::error::CliError;

/// Arguments for the fetch command.
#[derive(Debug, Args)]
pub struct FetchArgs {
    /// Package identifier (e.g. com.example.app)
    pub id: String,

    /// Skip the cache and the direct channel, use only the external tool
    #[arg(long)]
    pub force_tool: bool,

    /// Copy the artifact into this directory
    #[arg(long, short, value_name = "DIR")]
    pub output: Option<PathBuf>,
}

/// Run the fetch command.
pub fn run(config: BrokerConfig, args: FetchArgs) -> Result<(), CliError> {
    let id = PackageId::parse(&args.id)?;

    let _log_guard = apkbroker::log::init(&config.logging)?;
    let runtime = runtime()?;

    runtime.block_on(async move {
        let app = BrokerApp::start(config).await?;
        let result = app.broker().resolve(&id, args.force_tool).await;
        app.shutdown().await;

        match result {
            Ok(artifact) => {
                print_artifact(&artifact);
                if let Some(dir) = &args.output {
                    let copied = copy_out(&artifact, dir).await?;
                    println!("Copied to:  {}", copied.display());
                }
                Ok(())
            }
            Err(e) => {
                if let BrokerError::NotFound { attempts, .. } = &e {
                    for attempt in attempts {
                        eprintln!("  {}", attempt);
                    }
                }
                Err(e.into())
            }
        }
    })
}

fn print_artifact(artifact: &Artifact) {
    println!("Package:    {}", artifact.id);
    println!("Kind:       {}", artifact.kind);
    println!("Size:       {}", format_size(artifact.size_bytes));
    println!("Source:     {}", artifact.source);
    println!("Path:       {}", artifact.path.display());
}

async fn copy_out(artifact: &Artifact, dir: &Path) -> Result<PathBuf, CliError> {
    let file_error = |path: &Path| {
        let path = path.to_path_buf();
        move |source| CliError::File { path, source }
    };

    tokio::fs::create_dir_all(dir).await.map_err(file_error(dir))?;
    let dest = dir.join(artifact.file_name());
    tokio::fs::copy(&artifact.path, &dest)
        .await
        .map_err(file_error(&dest))?;
    Ok(dest)
}
