//! Tracing subscriber setup.
//!
//! Logs always go to stderr. When a log directory is configured, a second
//! layer writes daily-rotated files (`apkbroker.log.YYYY-MM-DD`) through a
//! non-blocking writer; the returned [`LogGuard`] must be held for the life
//! of the process or buffered lines are lost.
//!
//! The configured level may be a bare level (`debug`) or a full filter
//! directive (`apkbroker=debug,reqwest=warn`). `RUST_LOG`, when set, is
//! appended so it can override individual targets.

use std::io;
use std::path::Path;

use time::format_description::well_known::Rfc3339;
use time::UtcOffset;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::OffsetTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use crate::config::LoggingConfig;

/// Log file name prefix inside the log directory.
pub const LOG_FILE_PREFIX: &str = "apkbroker.log";

/// Keeps the file writer flushing; drop at shutdown.
#[must_use = "dropping the guard stops file logging"]
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// Errors from logging setup.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("failed to create log directory {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("a global subscriber is already installed: {0}")]
    AlreadyInitialized(String),
}

/// Build the effective filter from the configured level and `RUST_LOG`.
pub fn env_filter(level: &str) -> EnvFilter {
    let configured = level.trim();
    let configured = if configured.is_empty() { "info" } else { configured };

    let env = std::env::var("RUST_LOG")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());

    let fallback = || EnvFilter::try_new(configured).unwrap_or_else(|_| EnvFilter::new("info"));
    match env {
        Some(env) => EnvFilter::try_new(format!("{configured},{env}"))
            .or_else(|_| EnvFilter::try_new(&env))
            .unwrap_or_else(|_| fallback()),
        None => fallback(),
    }
}

fn local_timer() -> OffsetTime<Rfc3339> {
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    OffsetTime::new(offset, Rfc3339)
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Install the global subscriber.
pub fn init(config: &LoggingConfig) -> Result<LogGuard, LogError> {
    let mut layers: Vec<BoxedLayer> = vec![fmt::layer()
        .with_writer(io::stderr)
        .with_timer(local_timer())
        .with_target(true)
        .boxed()];

    let file_guard = match &config.directory {
        Some(dir) => {
            let (layer, guard) = file_layer(dir)?;
            layers.push(layer);
            Some(guard)
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter(&config.level))
        .try_init()
        .map_err(|e| LogError::AlreadyInitialized(e.to_string()))?;

    Ok(LogGuard { _file: file_guard })
}

fn file_layer(dir: &Path) -> Result<(BoxedLayer, WorkerGuard), LogError> {
    std::fs::create_dir_all(dir).map_err(|source| LogError::CreateDir {
        path: dir.display().to_string(),
        source,
    })?;

    let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let layer = fmt::layer()
        .with_writer(writer)
        .with_timer(local_timer())
        .with_ansi(false)
        .boxed();
    Ok((layer, guard))
}
