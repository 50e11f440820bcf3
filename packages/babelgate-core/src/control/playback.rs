//! Playback state machine (`spec.md` §4.9).
//!
//! Owned exclusively by the control plane's single handler worker; no
//! internal locking beyond what the caller already serializes via the
//! bus's `concurrency = 1` subscription.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PlaybackStatus {
    Idle,
    Speaking,
    Finished,
    GateClosed,
}

#[derive(Debug, Clone)]
pub struct PlaybackState {
    pub status: PlaybackStatus,
    pub current_response_id: Option<String>,
    pub last_audio_sent_ms: u64,
    pub provider_done: bool,
    idle_timeout_ms: u64,
}

impl PlaybackState {
    #[must_use]
    pub fn new(idle_timeout_ms: u64) -> Self {
        Self {
            status: PlaybackStatus::Idle,
            current_response_id: None,
            last_audio_sent_ms: 0,
            provider_done: false,
            idle_timeout_ms,
        }
    }

    /// `provider.audio.delta(response_id)`. Returns `true` if this delta
    /// represents an implicit barge-in (a new response arriving while a
    /// different one was still SPEAKING) — the caller is responsible for
    /// running barge-in orchestration in that case.
    pub fn on_audio_delta(&mut self, response_id: &str, now_ms: u64) -> bool {
        match self.status {
            PlaybackStatus::Idle | PlaybackStatus::Finished | PlaybackStatus::GateClosed => {
                self.status = PlaybackStatus::Speaking;
                self.current_response_id = Some(response_id.to_string());
                self.last_audio_sent_ms = now_ms;
                self.provider_done = false;
                false
            }
            PlaybackStatus::Speaking => {
                if self.current_response_id.as_deref() == Some(response_id) {
                    self.last_audio_sent_ms = now_ms;
                    false
                } else {
                    // Implicit barge-in: a new response_id while already
                    // speaking. The caller runs cancel/drop, then we still
                    // adopt the new response as the current one.
                    self.current_response_id = Some(response_id.to_string());
                    self.last_audio_sent_ms = now_ms;
                    self.provider_done = false;
                    true
                }
            }
        }
    }

    /// `provider.audio.done(response_id)`.
    pub fn on_audio_done(&mut self, response_id: &str) {
        if self.current_response_id.as_deref() == Some(response_id) {
            self.provider_done = true;
        }
    }

    /// Periodic tick or per-event idle check. Returns `true` if this call
    /// caused an IDLE transition (idempotent: calling again while already
    /// IDLE is a no-op and returns `false`).
    pub fn check_idle(&mut self, now_ms: u64) -> bool {
        if self.status == PlaybackStatus::Speaking
            && now_ms.saturating_sub(self.last_audio_sent_ms) > self.idle_timeout_ms
        {
            self.status = PlaybackStatus::Idle;
            self.current_response_id = None;
            self.provider_done = false;
            true
        } else {
            false
        }
    }

    /// Eager transition to IDLE, used by barge-in orchestration.
    pub fn force_idle(&mut self) {
        self.status = PlaybackStatus::Idle;
        self.current_response_id = None;
        self.provider_done = false;
    }

    pub fn set_gate_closed(&mut self) {
        self.status = PlaybackStatus::GateClosed;
    }

    /// Gate reopened; transitions to IDLE only if the outbound queue is
    /// already empty (otherwise the caller should wait and retry).
    pub fn reopen_gate(&mut self, outbound_queue_empty: bool) {
        if self.status == PlaybackStatus::GateClosed && outbound_queue_empty {
            self.status = PlaybackStatus::Idle;
        }
    }
}
