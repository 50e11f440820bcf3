//! Control plane: the per-session observer that drives the playback and
//! input state machines and orchestrates barge-in (`spec.md` §4.9).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::input::InputState;
use super::playback::{PlaybackState, PlaybackStatus};
use crate::audio::AudioCommit;
use crate::bus::{EventBus, OverflowPolicy};
use crate::clock::Clock;
use crate::observability::log_transition;
use crate::provider::ProviderEvent;
use crate::runtime::TaskSpawner;

/// Operations the control plane invokes on the session pipeline
/// (`spec.md` §4.5). The pipeline implements this; the control plane only
/// ever sees the trait, never the pipeline's other internals.
#[async_trait]
pub trait PipelineActuator: Send + Sync {
    async fn set_outbound_gate(&self, open: bool, reason: &str);
    async fn drop_outbound_audio(&self, reason: &str);
    async fn cancel_provider_response(&self, response_id: &str, reason: &str);
    async fn flush_inbound_buffers(&self, participant_id: Option<&str>);
}

#[derive(Debug, Clone, Copy)]
pub struct ControlPlaneConfig {
    pub playback_idle_timeout_ms: u64,
    pub voice_hysteresis_ms: u64,
    pub silence_threshold_ms: u64,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            playback_idle_timeout_ms: 500,
            voice_hysteresis_ms: 100,
            silence_threshold_ms: 350,
        }
    }
}

pub struct ControlPlane {
    session_id: String,
    clock: Arc<dyn Clock>,
    actuator: Arc<dyn PipelineActuator>,
    playback: Mutex<PlaybackState>,
    input: Mutex<InputState>,
    idle_timeout_ms: u64,
}

impl ControlPlane {
    #[must_use]
    pub fn new(
        session_id: impl Into<String>,
        config: ControlPlaneConfig,
        clock: Arc<dyn Clock>,
        actuator: Arc<dyn PipelineActuator>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            clock,
            actuator,
            playback: Mutex::new(PlaybackState::new(config.playback_idle_timeout_ms)),
            input: Mutex::new(InputState::new(
                config.voice_hysteresis_ms,
                config.silence_threshold_ms,
            )),
            idle_timeout_ms: config.playback_idle_timeout_ms,
        }
    }

    pub fn playback_status(&self) -> PlaybackStatus {
        self.playback.lock().status
    }

    /// Registers the provider_inbound and provider_outbound taps and
    /// starts the periodic idle-check tick, per `spec.md` §4.9's ">=10 Hz"
    /// requirement (tick interval = `idle_timeout_ms / 5`, floor 20ms).
    pub fn start(
        self: &Arc<Self>,
        spawner: &dyn TaskSpawner,
        provider_inbound: &Arc<EventBus<ProviderEvent>>,
        provider_outbound: &Arc<EventBus<AudioCommit>>,
    ) -> Result<(), String> {
        let this = self.clone();
        provider_inbound.subscribe(
            "control-plane",
            256,
            OverflowPolicy::DropOldest,
            1,
            spawner,
            move |event: ProviderEvent| {
                let this = this.clone();
                async move { this.handle_provider_event(event).await }
            },
        )?;

        let this = self.clone();
        provider_outbound.subscribe(
            "control-plane-voice-tap",
            256,
            OverflowPolicy::DropOldest,
            1,
            spawner,
            move |commit: AudioCommit| {
                let this = this.clone();
                async move { this.handle_commit(commit).await }
            },
        )?;

        let this = self.clone();
        let tick_ms = (self.idle_timeout_ms / 5).max(20);
        spawner.spawn(Box::pin(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(tick_ms)).await;
                let now = this.clock.now_ms();
                let transitioned = this.playback.lock().check_idle(now);
                if transitioned {
                    log_transition(&this.session_id, "playback", "SPEAKING", "IDLE", "idle_timeout");
                }
            }
        }));

        Ok(())
    }

    async fn handle_provider_event(&self, event: ProviderEvent) {
        let now = self.clock.now_ms();
        match event {
            ProviderEvent::AudioDelta { response_id, .. } => {
                let (barge_in, previous) = {
                    let mut playback = self.playback.lock();
                    let previous = playback.current_response_id.clone();
                    let barge_in = playback.on_audio_delta(&response_id, now);
                    (barge_in, previous)
                };
                if barge_in {
                    if let Some(prev_id) = previous {
                        log_transition(&self.session_id, "playback", "SPEAKING", "SPEAKING", "implicit_barge_in");
                        self.actuator
                            .cancel_provider_response(&prev_id, "implicit_barge_in")
                            .await;
                        self.actuator.drop_outbound_audio("implicit_barge_in").await;
                    }
                }
            }
            ProviderEvent::AudioDone { response_id } => {
                self.playback.lock().on_audio_done(&response_id);
            }
            ProviderEvent::ResponseCancelled { response_id } => {
                let mut playback = self.playback.lock();
                if playback.current_response_id.as_deref() == Some(response_id.as_str()) {
                    playback.force_idle();
                }
            }
            ProviderEvent::Error { code, message } => {
                log::warn!(
                    "[session:{}] provider error code={code} message={message}",
                    self.session_id
                );
            }
            ProviderEvent::TextDelta { .. } | ProviderEvent::TextDone { .. } => {}
        }
    }

    async fn handle_commit(&self, commit: AudioCommit) {
        let now = self.clock.now_ms();
        let promoted = self
            .input
            .lock()
            .on_commit(commit.metadata.is_silence, now);
        if !promoted {
            return;
        }

        let current_response_id = {
            let mut playback = self.playback.lock();
            if playback.status != PlaybackStatus::Speaking {
                return;
            }
            let current = playback.current_response_id.clone();
            playback.force_idle();
            current
        };

        log_transition(&self.session_id, "playback", "SPEAKING", "IDLE", "barge_in");
        if let Some(response_id) = current_response_id {
            self.actuator
                .cancel_provider_response(&response_id, "barge_in")
                .await;
        }
        self.actuator.drop_outbound_audio("barge_in").await;
    }
}
