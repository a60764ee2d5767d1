//! Tracing subscriber setup for binaries and examples
//!
//! The library itself only emits `tracing` events; installing a subscriber is
//! left to the application. These helpers install the usual `fmt` subscriber
//! filtered by `RUST_LOG`, falling back to `info`.

use tracing_subscriber::EnvFilter;

use crate::error::{BridgeError, Result};

const DEFAULT_FILTER: &str = "info";

fn env_filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Install the global subscriber.
///
/// # Panics
///
/// Panics if a global subscriber is already installed; use
/// [`try_init_tracing`] where that can happen.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(DEFAULT_FILTER))
        .init();
}

/// Install the global subscriber with `default` as the fallback filter,
/// returning an error if one is already installed
pub fn try_init_tracing(default: &str) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(default))
        .try_init()
        .map_err(|e| BridgeError::Configuration(format!("Failed to install tracing subscriber: {}", e)))
}
