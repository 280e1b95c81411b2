//! Shared utilities for Vigil: configuration, logging, error types.
//!
//! This crate provides the record model and collection schema that the
//! signaling components and the device side agree on, plus the common
//! infrastructure used across all Vigil components.

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod protocol;
pub mod record;

pub use config::{MonitorConfig, RiskRule};
pub use error::{Error, Result};
pub use protocol::*;
pub use record::{Document, Fields, Value};

/// Initialize tracing with sensible defaults.
///
/// Log level is controlled by the `RUST_LOG` environment variable.
/// Defaults to `info` if not set.
pub fn init_tracing() {
    init_tracing_with_default("info");
}

/// Initialize tracing with a specific default level.
pub fn init_tracing_with_default(default_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
