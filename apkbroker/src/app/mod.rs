//! Application bootstrap and lifecycle management.
//!
//! [`BrokerApp`] wires the configured components together in dependency
//! order and owns the background work, so every entry point (the HTTP
//! server, the one-shot CLI commands, tests) gets the same sweeper and
//! shutdown behaviour.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                          BrokerApp                            │
//! │                                                               │
//! │  1. WorkerPool (max_blocking permits)                         │
//! │  2. DiskStore ──► CacheStore (negative tier, deletion timers) │
//! │  3. Strategies ──► FallbackResolver ──► Broker                │
//! │  4. Sweeper (background task, child of the shutdown token)    │
//! │  5. api::serve (optional, until shutdown)                     │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use apkbroker::app::BrokerApp;
//! use apkbroker::config::BrokerConfig;
//!
//! let app = BrokerApp::start(BrokerConfig::load()?).await?;
//! let listener = app.bind().await?;
//! app.serve(listener).await?;
//! app.shutdown().await;
//! ```

mod bootstrap;
mod error;

pub use bootstrap::{build_strategies, BrokerApp};
pub use error::AppError;
