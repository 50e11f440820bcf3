//! Binary-level configuration loading.
//!
//! Thin wrapper over `babelgate_core::config::Config::load`: resolves the
//! YAML path and environment prefix, then hands CLI overrides down onto the
//! already-overlaid snapshot. The fail-fast overlay semantics live in core;
//! this module only adds the `--port`/`--host`/`--log-level` CLI layer on
//! top.

use std::path::Path;

use anyhow::{Context, Result};
use babelgate_core::Config;

/// Environment variable prefix scanned for the core config overlay
/// (`BABELGATE_HOST`, `BABELGATE_BATCHING_MAX_BATCH_MS`, ...).
pub const ENV_PREFIX: &str = "BABELGATE";

/// Loads the core configuration snapshot, then applies CLI overrides.
pub fn load(
    path: Option<&Path>,
    host: Option<String>,
    port: Option<u16>,
) -> Result<Config> {
    let mut config = Config::load(path, ENV_PREFIX).context("failed to load configuration")?;

    if let Some(host) = host {
        config.host = host;
    }
    if let Some(port) = port {
        config.port = port;
    }
    Ok(config)
}
