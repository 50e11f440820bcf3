//! Babelgate Server - standalone process hosting the voice-translation
//! session runtime.
//!
//! Thin entry point: parse CLI args, load configuration, bootstrap the
//! core's services, serve the WebSocket acceptor until a shutdown signal
//! arrives, then drain active sessions.

mod config;

use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use babelgate_core::{bootstrap_services, start_server};
use clap::Parser;
use tokio::signal;

/// Babelgate Server - real-time voice-translation gateway.
#[derive(Parser, Debug)]
#[command(name = "babelgate-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "BABELGATE_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind host (overrides config file).
    #[arg(long, env = "BABELGATE_HOST")]
    host: Option<IpAddr>,

    /// Bind port (overrides config file).
    #[arg(short = 'p', long, env = "BABELGATE_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("babelgate-server v{}", env!("CARGO_PKG_VERSION"));

    let core_config = config::load(
        args.config.as_deref(),
        args.host.map(|ip| ip.to_string()),
        args.port,
    )
    .context("failed to load configuration")?;

    log::info!(
        "configuration loaded: host={}, port={}, default_provider={}",
        core_config.host,
        core_config.port,
        core_config.default_provider
    );

    let services = bootstrap_services(core_config);

    let server_services = services.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(&server_services).await {
            log::error!("server error: {e}");
        }
    });

    shutdown_signal().await;
    log::info!("shutdown signal received, draining active sessions");

    services.shutdown().await;
    server_handle.abort();

    log::info!("shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
