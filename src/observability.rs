//! Tracing initialization. JSON-formatted structured logs, level driven by
//! `Config::log_level` with an `info` fallback on a malformed filter.

use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::error::Result;

/// Initialize the global tracing subscriber. Call once at process start,
/// before building an [`crate::engine::Engine`].
pub fn init_tracing(config: &Config) -> Result<()> {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!(server = %config.server_name, version = %config.server_version, "tracing initialized");
    Ok(())
}
