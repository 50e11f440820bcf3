//! HTTP/WebSocket API layer.
//!
//! Thin glue: builds the router, binds the listener, and serves. All
//! session logic lives in [`crate::session`]; handlers here only adapt the
//! real socket to `Session::on_text_message`.

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use thiserror::Error;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::bootstrap::BootstrappedServices;
use crate::clock::Clock;
use crate::config::Config;
use crate::runtime::TokioSpawner;
use crate::session::SessionManager;

pub mod ws;

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Shared application state the router hands to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub clock: Arc<dyn Clock>,
    pub spawner: Arc<TokioSpawner>,
    pub session_manager: Arc<SessionManager>,
}

impl From<&BootstrappedServices> for AppState {
    fn from(services: &BootstrappedServices) -> Self {
        Self {
            config: services.config.clone(),
            clock: services.clock.clone(),
            spawner: services.spawner.clone(),
            session_manager: services.session_manager.clone(),
        }
    }
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

/// Binds `config.host:config.port` and serves until the listener errors.
/// Shutdown is driven externally via `BootstrappedServices::shutdown`
/// cancelling `cancel_token`, which each session's receive loop observes.
pub async fn start_server(services: &BootstrappedServices) -> Result<(), ServerError> {
    let addr = format!("{}:{}", services.config.host, services.config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.clone(),
            source,
        })?;
    log::info!("[api] listening on {addr}");

    let state = AppState::from(services);
    let app = router(state);
    axum::serve(listener, app).await?;
    Ok(())
}
