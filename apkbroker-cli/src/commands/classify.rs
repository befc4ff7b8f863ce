//! Classify command - inspect an archive's table of contents.

use std::path::Path;

use apkbroker::classify::Classifier;
use apkbroker::config::BrokerConfig;

use crate::error::CliError;

/// Run the classify command.
pub fn run(config: &BrokerConfig, file: &Path) -> Result<(), CliError> {
    let metadata = std::fs::metadata(file).map_err(|source| CliError::File {
        path: file.to_path_buf(),
        source,
    })?;

    let classification = Classifier::new(config.unrecognized).classify(file);

    println!("File:      {}", file.display());
    println!("Size:      {} bytes", metadata.len());
    println!(
        "Kind:      {} (.{})",
        classification.kind,
        classification.kind.extension()
    );
    println!("Evidence:  {}", classification.evidence);
    if classification.is_fallback() {
        println!("Note:      no marker matched; kind comes from [classify] unrecognized");
    }
    Ok(())
}
