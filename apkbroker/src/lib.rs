//! apkbroker - package artifact acquisition broker
//!
//! This library resolves an application package identifier to a binary
//! artifact on local disk and serves it over HTTP. Artifacts come from an
//! ordered chain of acquisition strategies (direct segmented HTTP transfers,
//! then an external acquisition tool), are classified as single packages or
//! split bundles by inspecting the archive, and live in a short-lived cache:
//! a positive tier of files that delete themselves shortly after delivery
//! and a negative tier that remembers recent failures.
//!
//! # Layers
//!
//! ```text
//! api ──► broker ──► resolver ──► channel::{direct, tool}
//!           │            └──────► classify
//!           ├──► locks
//!           └──► cache::{disk, negative, deletion, stats} ◄── sweeper
//! ```
//!
//! [`app::BrokerApp`] wires everything from a [`config::BrokerConfig`].

pub mod api;
pub mod app;
pub mod broker;
pub mod cache;
pub mod channel;
pub mod classify;
pub mod config;
pub mod locks;
pub mod log;
pub mod package;
pub mod resolver;
pub mod sweeper;
pub mod worker;

pub use broker::{Broker, BrokerError};
pub use package::{Artifact, ArtifactKind, PackageId};
