//! CLI command implementations.

pub mod cache;
pub mod classify;
pub mod common;
pub mod config;
pub mod fetch;
pub mod serve;
