//! Cache management CLI commands.
//!
//! These operate on the cache directory directly. The negative tier lives
//! in the server's memory; use `DELETE /cache` against a running broker to
//! clear that as well.

use apkbroker::cache::DiskStore;
use apkbroker::config::BrokerConfig;
use clap::Subcommand;

use super::common::{format_size, runtime};
use crate::error::CliError;

/// Cache action subcommands.
#[derive(Debug, Subcommand)]
pub enum CacheAction {
    /// Delete every cached artifact and staged partial download
    Clear,
    /// Show cache directory statistics
    Stats,
}

/// Run a cache subcommand.
pub fn run(config: &BrokerConfig, action: CacheAction) -> Result<(), CliError> {
    let cache_dir = config.cache.directory.clone();
    let min_bytes = config.cache.min_artifact_bytes;

    runtime()?.block_on(async move {
        let store = DiskStore::open(&cache_dir, min_bytes).await?;

        match action {
            CacheAction::Clear => {
                println!("Clearing artifact cache at: {}", cache_dir.display());
                let result = store.clear().await?;
                println!(
                    "Deleted {} files, freed {}",
                    result.files_removed,
                    format_size(result.bytes_freed)
                );
            }
            CacheAction::Stats => {
                let artifacts = store.list().await?;
                let artifact_bytes: u64 = artifacts.iter().map(|f| f.size_bytes).sum();
                let total_bytes = store.size_bytes().await;

                println!("Artifact cache: {}", cache_dir.display());
                println!("  Artifacts: {}", artifacts.len());
                println!("  Size:      {}", format_size(artifact_bytes));
                println!(
                    "  Staged:    {}",
                    format_size(total_bytes.saturating_sub(artifact_bytes))
                );
                for file in &artifacts {
                    println!(
                        "    {:<48} {:>12}  {}",
                        file.path
                            .file_name()
                            .map(|n| n.to_string_lossy().into_owned())
                            .unwrap_or_default(),
                        format_size(file.size_bytes),
                        file.kind
                    );
                }
            }
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_for(dir: &std::path::Path) -> BrokerConfig {
        let mut config = BrokerConfig::default();
        config.cache = config.cache.with_directory(dir).with_min_artifact_bytes(10);
        config
    }

    #[test]
    fn test_clear_removes_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("com.example.app.apk");
        std::fs::write(&artifact, vec![0u8; 100]).unwrap();

        run(&config_for(dir.path()), CacheAction::Clear).unwrap();
        assert!(!artifact.exists());
    }

    #[test]
    fn test_stats_on_empty_cache() {
        let dir = tempfile::tempdir().unwrap();
        run(&config_for(dir.path()), CacheAction::Stats).unwrap();
        assert!(dir.path().join("staging").is_dir());
    }
}
