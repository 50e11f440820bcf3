//! Deterministic provider adapter used by tests and scenarios S1/S4/S6.
//!
//! Mirrors the teacher's `FlacTranscoder`: a small stateful object whose
//! behavior differs between "first call" and later calls — here, between a
//! response still in flight and one already cancelled. There is no real
//! socket, so ingress and egress collapse into a single subscriber on
//! `provider_outbound` that synthesizes the matching `provider_inbound`
//! events after a configurable delay.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use dashmap::DashMap;
use serde::Deserialize;
use uuid::Uuid;

use super::{ProviderAdapter, ProviderEvent, ProviderSessionConfig};
use crate::audio::AudioCommit;
use crate::bus::{EventBus, OverflowPolicy};
use crate::error::CoreResult;
use crate::runtime::TaskSpawner;

/// Tuning knobs for [`MockProviderAdapter`]. Defaults produce a fast,
/// single-chunk response suitable for unit tests; a provider's `settings`
/// entry in the configuration surface (`spec.md` §4.11) can override any of
/// these — e.g. a higher `audio_chunks` for a scenario that needs an
/// interruptible multi-chunk response.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MockProviderConfig {
    pub response_delay_ms: u64,
    pub chunk_interval_ms: u64,
    pub audio_chunks: u32,
    pub canned_text: String,
    pub sample_rate_hz: u32,
}

impl Default for MockProviderConfig {
    fn default() -> Self {
        Self {
            response_delay_ms: 20,
            chunk_interval_ms: 20,
            audio_chunks: 1,
            canned_text: "mock translation".to_string(),
            sample_rate_hz: 16_000,
        }
    }
}

pub struct MockProviderAdapter {
    config: MockProviderConfig,
    cancelled: DashMap<String, ()>,
    responses_started: AtomicU64,
}

impl MockProviderAdapter {
    #[must_use]
    pub fn new(config: MockProviderConfig) -> Self {
        Self {
            config,
            cancelled: DashMap::new(),
            responses_started: AtomicU64::new(0),
        }
    }

    pub fn responses_started(&self) -> u64 {
        self.responses_started.load(Ordering::Relaxed)
    }

    async fn respond_to_commit(
        self: Arc<Self>,
        commit: AudioCommit,
        provider_inbound: Arc<EventBus<ProviderEvent>>,
    ) {
        self.responses_started.fetch_add(1, Ordering::Relaxed);
        let response_id = Uuid::new_v4().to_string();
        tokio::time::sleep(Duration::from_millis(self.config.response_delay_ms)).await;

        if self.cancelled.remove(&response_id).is_some() {
            provider_inbound.publish(ProviderEvent::ResponseCancelled { response_id });
            return;
        }

        provider_inbound.publish(ProviderEvent::TextDelta {
            participant_id: commit.participant_id.clone(),
            delta: self.config.canned_text.clone(),
        });
        provider_inbound.publish(ProviderEvent::TextDone {
            participant_id: commit.participant_id.clone(),
        });

        let silence_frame_base64 = STANDARD.encode(vec![0u8; 640]);
        for _ in 0..self.config.audio_chunks.max(1) {
            if self.cancelled.remove(&response_id).is_some() {
                provider_inbound.publish(ProviderEvent::ResponseCancelled {
                    response_id: response_id.clone(),
                });
                return;
            }
            provider_inbound.publish(ProviderEvent::AudioDelta {
                participant_id: commit.participant_id.clone(),
                response_id: response_id.clone(),
                audio_base64: silence_frame_base64.clone(),
                sample_rate_hz: self.config.sample_rate_hz,
            });
            if self.config.audio_chunks > 1 {
                tokio::time::sleep(Duration::from_millis(self.config.chunk_interval_ms)).await;
            }
        }
        provider_inbound.publish(ProviderEvent::AudioDone { response_id });
    }
}

#[async_trait]
impl ProviderAdapter for MockProviderAdapter {
    async fn start(
        self: Arc<Self>,
        spawner: &dyn TaskSpawner,
        provider_outbound: Arc<EventBus<AudioCommit>>,
        provider_inbound: Arc<EventBus<ProviderEvent>>,
        _session_config: ProviderSessionConfig,
    ) -> CoreResult<()> {
        let this = self.clone();
        provider_outbound.subscribe(
            "mock-adapter",
            64,
            OverflowPolicy::DropOldest,
            4,
            spawner,
            move |commit: AudioCommit| {
                let this = this.clone();
                let provider_inbound = provider_inbound.clone();
                async move { this.respond_to_commit(commit, provider_inbound).await }
            },
        )
        .map_err(crate::error::CoreError::Internal)?;
        Ok(())
    }

    async fn cancel(&self, response_id: &str, _reason: &str) {
        self.cancelled.insert(response_id.to_string(), ());
    }

    async fn close(&self) {
        self.cancelled.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use crate::runtime::TokioSpawner;
    use parking_lot::Mutex;

    #[tokio::test]
    async fn commit_produces_text_and_audio_events() {
        let adapter = Arc::new(MockProviderAdapter::new(MockProviderConfig {
            response_delay_ms: 1,
            ..Default::default()
        }));
        let outbound: Arc<EventBus<AudioCommit>> = Arc::new(EventBus::new("provider_outbound"));
        let inbound: Arc<EventBus<ProviderEvent>> = Arc::new(EventBus::new("provider_inbound"));
        let spawner = TokioSpawner::current();

        let collected = Arc::new(Mutex::new(Vec::new()));
        let collected2 = collected.clone();
        inbound
            .subscribe(
                "collector",
                64,
                OverflowPolicy::DropOldest,
                1,
                &spawner,
                move |event: ProviderEvent| {
                    let collected2 = collected2.clone();
                    async move { collected2.lock().push(event) }
                },
            )
            .unwrap();

        adapter
            .clone()
            .start(
                &spawner,
                outbound.clone(),
                inbound.clone(),
                ProviderSessionConfig::default(),
            )
            .await
            .unwrap();

        outbound.publish(AudioCommit {
            commit_id: Uuid::new_v4(),
            session_id: "s1".into(),
            participant_id: "p1".into(),
            audio_base64: "AAAA".into(),
            metadata: crate::audio::CommitMetadata {
                first_frame_ts_ms: 0,
                last_frame_ts_ms: 0,
                duration_ms: 0,
                byte_count: 0,
                trigger: crate::audio::Trigger::Size,
                rms_energy: 0.0,
                is_silence: true,
            },
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        let events = collected.lock();
        assert!(events.iter().any(|e| matches!(e, ProviderEvent::TextDelta { .. })));
        assert!(events.iter().any(|e| matches!(e, ProviderEvent::AudioDone { .. })));
    }

    #[tokio::test]
    async fn cancel_mid_stream_stops_remaining_chunks() {
        let adapter = Arc::new(MockProviderAdapter::new(MockProviderConfig {
            response_delay_ms: 1,
            chunk_interval_ms: 50,
            audio_chunks: 5,
            ..Default::default()
        }));
        let outbound: Arc<EventBus<AudioCommit>> = Arc::new(EventBus::new("provider_outbound"));
        let inbound: Arc<EventBus<ProviderEvent>> = Arc::new(EventBus::new("provider_inbound"));
        let spawner = TokioSpawner::current();

        let collected = Arc::new(Mutex::new(Vec::new()));
        let collected2 = collected.clone();
        inbound
            .subscribe(
                "collector",
                64,
                OverflowPolicy::DropOldest,
                1,
                &spawner,
                move |event: ProviderEvent| {
                    let collected2 = collected2.clone();
                    async move { collected2.lock().push(event) }
                },
            )
            .unwrap();

        adapter
            .clone()
            .start(
                &spawner,
                outbound.clone(),
                inbound.clone(),
                ProviderSessionConfig::default(),
            )
            .await
            .unwrap();

        outbound.publish(AudioCommit {
            commit_id: Uuid::new_v4(),
            session_id: "s1".into(),
            participant_id: "p1".into(),
            audio_base64: "AAAA".into(),
            metadata: crate::audio::CommitMetadata {
                first_frame_ts_ms: 0,
                last_frame_ts_ms: 0,
                duration_ms: 0,
                byte_count: 0,
                trigger: crate::audio::Trigger::Size,
                rms_energy: 0.0,
                is_silence: true,
            },
        });

        // Wait for the first audio delta, then cancel mid-stream using the
        // response_id it carries.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let response_id = collected
            .lock()
            .iter()
            .find_map(|e| match e {
                ProviderEvent::AudioDelta { response_id, .. } => Some(response_id.clone()),
                _ => None,
            })
            .expect("first audio delta already published");
        adapter.cancel(&response_id, "barge-in").await;

        tokio::time::sleep(Duration::from_millis(300)).await;
        let events = collected.lock();
        let delta_count = events
            .iter()
            .filter(|e| matches!(e, ProviderEvent::AudioDelta { .. }))
            .count();
        assert!(delta_count < 5, "cancel should have cut the stream short, got {delta_count}");
        assert!(events.iter().any(|e| matches!(e, ProviderEvent::ResponseCancelled { .. })));
        assert!(!events.iter().any(|e| matches!(e, ProviderEvent::AudioDone { .. })));
    }
}
