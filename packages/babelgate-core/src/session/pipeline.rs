//! Session Pipeline: the four buses, the staged Phase-1/Phase-2 startup,
//! and the pipeline actuator the control plane drives (`spec.md` §4.5).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::audio::{AudioBatcher, AudioCommit, BatchingConfig};
use crate::bus::EventBus;
use crate::clock::Clock;
use crate::config::Config;
use crate::control::{ControlPlane, ControlPlaneConfig, PipelineActuator};
use crate::error::{CoreError, CoreResult};
use crate::observability::{log_actuator_call, log_drop};
use crate::provider::{self, ProviderAdapter, ProviderEvent, ProviderSessionConfig};
use crate::reformatter::OutputReformatter;
use crate::runtime::TaskSpawner;
use crate::wire::{InboundEnvelope, InboundKind, OutboundFrame};

/// Resolves which provider a session should use at Phase-2, in the
/// priority order `spec.md` §4.11 defines.
#[must_use]
pub fn resolve_provider_name(
    translation_settings: Option<&serde_json::Value>,
    metadata: Option<&serde_json::Value>,
    default_provider: &str,
) -> String {
    if let Some(name) = translation_settings.and_then(|v| v.get("provider")).and_then(|v| v.as_str()) {
        return name.to_string();
    }
    if let Some(name) = metadata.and_then(|v| v.get("provider")).and_then(|v| v.as_str()) {
        return name.to_string();
    }
    if let Some(name) = metadata
        .and_then(|v| v.get("feature_flags"))
        .and_then(|v| v.get("provider"))
        .and_then(|v| v.as_str())
    {
        return name.to_string();
    }
    default_provider.to_string()
}

pub struct SessionPipeline {
    session_id: String,
    acs_inbound: Arc<EventBus<InboundEnvelope>>,
    provider_outbound: Arc<EventBus<AudioCommit>>,
    provider_inbound: Arc<EventBus<ProviderEvent>>,
    acs_outbound: Arc<EventBus<OutboundFrame>>,
    batcher: Arc<AudioBatcher>,
    control_plane: Arc<ControlPlane>,
    reformatter: Arc<OutputReformatter>,
    provider_adapter: Mutex<Option<Arc<dyn ProviderAdapter>>>,
    translation_settings: Mutex<serde_json::Value>,
    outbound_gate_open: AtomicBool,
    ready: AtomicBool,
    spawner: Arc<dyn TaskSpawner>,
}

impl SessionPipeline {
    #[must_use]
    pub fn new(
        session_id: impl Into<String>,
        config: &Config,
        clock: Arc<dyn Clock>,
        spawner: Arc<dyn TaskSpawner>,
    ) -> Arc<Self> {
        let session_id = session_id.into();
        let batcher = Arc::new(AudioBatcher::new(batching_config(config), clock.clone()));
        Arc::new_cyclic(|weak: &std::sync::Weak<Self>| {
            let actuator: Arc<dyn PipelineActuator> = WeakActuator(weak.clone()).into_arc();
            Self {
                session_id: session_id.clone(),
                acs_inbound: Arc::new(EventBus::new("acs_inbound")),
                provider_outbound: Arc::new(EventBus::new("provider_outbound")),
                provider_inbound: Arc::new(EventBus::new("provider_inbound")),
                acs_outbound: Arc::new(EventBus::new("acs_outbound")),
                batcher,
                control_plane: Arc::new(ControlPlane::new(
                    session_id.clone(),
                    ControlPlaneConfig::default(),
                    clock,
                    actuator,
                )),
                reformatter: Arc::new(OutputReformatter::new(config.session_output_sample_rate_hz)),
                provider_adapter: Mutex::new(None),
                translation_settings: Mutex::new(serde_json::Value::Null),
                outbound_gate_open: AtomicBool::new(true),
                ready: AtomicBool::new(false),
                spawner,
            }
        })
    }

    pub fn acs_inbound(&self) -> &Arc<EventBus<InboundEnvelope>> {
        &self.acs_inbound
    }

    pub fn acs_outbound(&self) -> &Arc<EventBus<OutboundFrame>> {
        &self.acs_outbound
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    /// Current hot-updated `translation_settings`, as last set by a
    /// `control.test.settings` frame (`serde_json::Value::Null` if none
    /// has arrived yet).
    pub fn translation_settings_snapshot(&self) -> serde_json::Value {
        self.translation_settings.lock().clone()
    }

    /// Registers every Phase-1 handler: the audio batcher and
    /// metadata/test-settings handler on `acs_inbound`, the wire-sender on
    /// `acs_outbound` (delivering through `peer_tx`, which the session
    /// reads and writes to the socket), and the control-plane tap plus
    /// output reformatter on `provider_inbound`/`provider_outbound`.
    pub fn start_phase_one(
        self: &Arc<Self>,
        peer_tx: mpsc::UnboundedSender<OutboundFrame>,
    ) -> Result<(), String> {
        let spawner = self.spawner.as_ref();
        let batcher = self.batcher.clone();
        let provider_outbound = self.provider_outbound.clone();
        let this = self.clone();
        let spawner_for_handler = self.spawner.clone();
        self.acs_inbound.subscribe(
            "audio-and-metadata",
            256,
            crate::bus::OverflowPolicy::DropOldest,
            1,
            spawner,
            move |envelope: InboundEnvelope| {
                let batcher = batcher.clone();
                let provider_outbound = provider_outbound.clone();
                let this = this.clone();
                let spawner_for_handler = spawner_for_handler.clone();
                async move {
                    match envelope.kind {
                        InboundKind::Audio => {
                            let Some(participant_id) = envelope.participant_id.clone() else {
                                log::warn!("audio envelope missing participant_id, dropping");
                                return;
                            };
                            let Some(audio_base64) = envelope
                                .payload
                                .get("data")
                                .and_then(|v| v.as_str())
                                .map(str::to_string)
                            else {
                                log::warn!("audio envelope missing data field, dropping");
                                return;
                            };
                            batcher.append(
                                &envelope.session_id,
                                &participant_id,
                                &audio_base64,
                                spawner_for_handler.as_ref(),
                                &provider_outbound,
                            );
                        }
                        InboundKind::ControlTestSettings => {
                            if let Some(provider) = envelope.payload.get("provider").cloned() {
                                let mut guard = this.translation_settings.lock();
                                if guard.is_null() {
                                    *guard = serde_json::json!({});
                                }
                                guard["provider"] = provider;
                            }
                        }
                        InboundKind::Unknown(_) => {}
                    }
                }
            },
        )?;

        let acs_outbound_gate = self.clone();
        self.acs_outbound.subscribe(
            "wire-sender",
            512,
            crate::bus::OverflowPolicy::DropOldest,
            1,
            spawner,
            move |frame: OutboundFrame| {
                let acs_outbound_gate = acs_outbound_gate.clone();
                let peer_tx = peer_tx.clone();
                async move {
                    if frame.is_audio() && !acs_outbound_gate.outbound_gate_open.load(Ordering::Relaxed) {
                        return;
                    }
                    if peer_tx.send(frame).is_err() {
                        log::debug!(
                            "[session:{}] peer channel closed, dropping outbound frame",
                            acs_outbound_gate.session_id
                        );
                    }
                }
            },
        )?;

        self.control_plane
            .start(spawner, &self.provider_inbound, &self.provider_outbound)?;
        self.reformatter
            .start(spawner, &self.provider_inbound, &self.acs_outbound)?;

        Ok(())
    }

    /// Instantiates and starts the provider adapter for `provider_name`,
    /// then marks the pipeline ready (`spec.md` §4.5 Phase 2).
    pub async fn start_phase_two(
        self: &Arc<Self>,
        config: &Config,
        provider_name: &str,
        settings: serde_json::Value,
    ) -> CoreResult<()> {
        let spawner = self.spawner.as_ref();
        let entry = config
            .providers
            .get(provider_name)
            .cloned()
            .ok_or_else(|| CoreError::Configuration(format!("unknown provider '{provider_name}'")))?;

        let adapter = provider::build_adapter(&entry.provider_type, &entry.settings)?;
        let session_config = ProviderSessionConfig {
            provider_name: provider_name.to_string(),
            endpoint: entry.endpoint,
            api_key: entry.api_key,
            settings,
        };
        adapter
            .clone()
            .start(
                spawner,
                self.provider_outbound.clone(),
                self.provider_inbound.clone(),
                session_config,
            )
            .await?;
        *self.provider_adapter.lock() = Some(adapter);
        self.ready.store(true, Ordering::Relaxed);
        Ok(())
    }

    /// Cancels the provider adapter, then shuts down all four buses in the
    /// order `acs_inbound, provider_outbound, provider_inbound,
    /// acs_outbound` with a 5 second deadline (`spec.md` §4.5).
    pub async fn cleanup(&self) {
        let adapter = self.provider_adapter.lock().take();
        if let Some(adapter) = adapter {
            adapter.close().await;
        }
        let deadline = Duration::from_secs(5);
        self.acs_inbound.shutdown(deadline).await;
        self.provider_outbound.shutdown(deadline).await;
        self.provider_inbound.shutdown(deadline).await;
        self.acs_outbound.shutdown(deadline).await;
        self.batcher.remove_session(&self.session_id);
    }
}

fn batching_config(config: &Config) -> BatchingConfig {
    config.batching
}

/// Adapts a `Weak<SessionPipeline>` into the [`PipelineActuator`] the
/// control plane holds, so the pipeline and the control plane can each
/// hold a strong reference to the other's public surface without a
/// reference cycle.
struct WeakActuator(std::sync::Weak<SessionPipeline>);

impl WeakActuator {
    fn into_arc(self) -> Arc<dyn PipelineActuator> {
        Arc::new(self)
    }
}

#[async_trait]
impl PipelineActuator for WeakActuator {
    async fn set_outbound_gate(&self, open: bool, reason: &str) {
        let Some(pipeline) = self.0.upgrade() else { return };
        pipeline.outbound_gate_open.store(open, Ordering::Relaxed);
        log_actuator_call(
            &pipeline.session_id,
            if open { "open_outbound_gate" } else { "close_outbound_gate" },
            reason,
        );
    }

    async fn drop_outbound_audio(&self, reason: &str) {
        let Some(pipeline) = self.0.upgrade() else { return };
        if let Some(dropped) = pipeline
            .acs_outbound
            .drain_handler_queue("wire-sender", OutboundFrame::is_audio)
        {
            log_drop(&pipeline.session_id, "acs_outbound", "wire-sender", reason, dropped);
        }
    }

    async fn cancel_provider_response(&self, response_id: &str, reason: &str) {
        let Some(pipeline) = self.0.upgrade() else { return };
        log_actuator_call(&pipeline.session_id, "cancel_provider_response", reason);
        let adapter = pipeline.provider_adapter.lock().clone();
        if let Some(adapter) = adapter {
            adapter.cancel(response_id, reason).await;
        }
    }

    async fn flush_inbound_buffers(&self, participant_id: Option<&str>) {
        let Some(pipeline) = self.0.upgrade() else { return };
        log_actuator_call(&pipeline.session_id, "flush_inbound_buffers", "barge_in");
        pipeline.batcher.flush(&pipeline.session_id, participant_id);
    }
}
