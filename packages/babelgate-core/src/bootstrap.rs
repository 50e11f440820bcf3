//! Application bootstrap and dependency wiring.
//!
//! The composition root - the single place where configuration, the clock,
//! the task spawner, and the session manager are instantiated and wired
//! together, in the dependency order `spec.md` §2 lays out (everything
//! below this module already exists leaf-first; this module is the final
//! "Acceptor" step that ties it to a listening socket).

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::clock::{Clock, MonotonicClock};
use crate::config::Config;
use crate::runtime::TokioSpawner;
use crate::session::SessionManager;

/// Container for every process-wide service the API layer needs.
#[derive(Clone)]
pub struct BootstrappedServices {
    pub config: Arc<Config>,
    pub clock: Arc<dyn Clock>,
    pub spawner: Arc<TokioSpawner>,
    pub session_manager: Arc<SessionManager>,
    pub cancel_token: CancellationToken,
}

impl BootstrappedServices {
    /// Initiates graceful shutdown: cancels the root token, then force-closes
    /// and cleans up every active session.
    pub async fn shutdown(&self) {
        log::info!("[bootstrap] beginning graceful shutdown");
        self.cancel_token.cancel();
        self.session_manager.shutdown_all().await;
        log::info!("[bootstrap] shutdown complete");
    }
}

/// Bootstraps all application services with their dependencies.
///
/// `config` is the already-loaded, already-overlaid configuration snapshot
/// (`Config::load`); bootstrap only wires *runtime* services on top of it.
#[must_use]
pub fn bootstrap_services(config: Config) -> BootstrappedServices {
    let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
    let spawner = Arc::new(TokioSpawner::current());
    let session_manager = Arc::new(SessionManager::new());
    let cancel_token = CancellationToken::new();

    log::info!(
        "[bootstrap] services wired: default_provider={}, {} configured provider(s)",
        config.default_provider,
        config.providers.len()
    );

    BootstrappedServices {
        config: Arc::new(config),
        clock,
        spawner,
        session_manager,
        cancel_token,
    }
}
