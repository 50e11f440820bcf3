//! Session Manager: process-wide registry of active sessions (`spec.md` §4.3).
//!
//! Grounded on the teacher's `WsConnectionManager`/`ConnectionGuard`: a
//! `DashMap` registry plus an RAII guard that unregisters on drop, with a
//! hierarchical `CancellationToken` so `shutdown_all` can force-close
//! in-flight sessions without per-session bookkeeping.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::session::session::Session;

/// Tracks every live `Session` and can force-close all of them.
pub struct SessionManager {
    sessions: DashMap<String, Arc<Session>>,
    next_id: AtomicU64,
    global_cancel: RwLock<CancellationToken>,
}

impl SessionManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            next_id: AtomicU64::new(1),
            global_cancel: RwLock::new(CancellationToken::new()),
        }
    }

    /// Mints a fresh session id. Session ids are process-wide unique
    /// (`spec.md` §3), but the scheme itself (counter vs. UUID) is an
    /// implementation detail the acceptor does not need to know.
    #[must_use]
    pub fn next_session_id(&self) -> String {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        format!("sess-{n}-{}", uuid::Uuid::new_v4())
    }

    /// Registers `session` and returns a guard that unregisters it on drop.
    /// Cleanup of the session's own resources (the pipeline) is the
    /// caller's responsibility — the guard only keeps the registry honest.
    pub fn register(self: &Arc<Self>, session: Arc<Session>) -> SessionGuard {
        let id = session.id().to_string();
        let cancel_token = self.global_cancel.read().child_token();
        self.sessions.insert(id.clone(), session);
        log::info!(
            "[session-manager] registered {id} (active: {})",
            self.sessions.len()
        );
        SessionGuard {
            id,
            manager: Arc::clone(self),
            cancel_token,
        }
    }

    /// Cheap, sync-only map eviction — the half of removal `SessionGuard`'s
    /// `Drop` can do. Does not run `Session::cleanup`; callers that need the
    /// full removal contract use [`SessionManager::remove`] instead.
    fn unregister(&self, id: &str) {
        if self.sessions.remove(id).is_some() {
            log::info!(
                "[session-manager] unregistered {id} (active: {})",
                self.sessions.len()
            );
        }
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Unregisters `id`, then runs its `Session::cleanup` — in that order,
    /// so a session is never still discoverable by a concurrent
    /// `shutdown_all` while its own cleanup is in flight (`spec.md` §4.3:
    /// "unregister, then run Session.cleanup(); idempotent"). A second call
    /// for an id already removed is a no-op. Both `handle_ws`'s own exit
    /// path and `shutdown_all` route through this.
    pub async fn remove(&self, id: &str) {
        let Some((_, session)) = self.sessions.remove(id) else {
            return;
        };
        log::info!(
            "[session-manager] unregistered {id} (active: {})",
            self.sessions.len()
        );
        session.cleanup().await;
    }

    /// Cancels every session's token, then removes each one (unregister,
    /// then cleanup) with a 5 second deadline per session (`spec.md` §4.3,
    /// §5).
    pub async fn shutdown_all(&self) {
        let ids: Vec<String> = {
            let mut guard = self.global_cancel.write();
            guard.cancel();
            *guard = CancellationToken::new();
            self.sessions.iter().map(|e| e.key().clone()).collect()
        };
        for id in ids {
            let result = tokio::time::timeout(Duration::from_secs(5), self.remove(&id)).await;
            if result.is_err() {
                log::warn!("[session-manager] cleanup for {id} exceeded shutdown deadline");
            }
        }
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard returned by [`SessionManager::register`]; unregisters the
/// session from the manager's map when dropped, mirroring the teacher's
/// `ConnectionGuard`.
pub struct SessionGuard {
    id: String,
    manager: Arc<SessionManager>,
    cancel_token: CancellationToken,
}

impl SessionGuard {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Token cancelled when `SessionManager::shutdown_all` force-closes
    /// every session; the acceptor's receive loop selects on this.
    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.manager.unregister(&self.id);
    }
}
