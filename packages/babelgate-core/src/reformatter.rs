//! Output reformatter: a `provider_inbound` subscriber that converts
//! neutral provider events into wire frames published to `acs_outbound`
//! (`spec.md` §4.8).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::audio::{pcm16_samples, pcm16_to_bytes, resample_linear};
use crate::bus::{EventBus, OverflowPolicy};
use crate::provider::ProviderEvent;
use crate::runtime::TaskSpawner;
use crate::wire::OutboundFrame;

pub struct OutputReformatter {
    session_output_sample_rate_hz: u32,
    sequences: DashMap<String, AtomicU64>,
    pending_text: DashMap<String, Mutex<String>>,
}

impl OutputReformatter {
    #[must_use]
    pub fn new(session_output_sample_rate_hz: u32) -> Self {
        Self {
            session_output_sample_rate_hz,
            sequences: DashMap::new(),
            pending_text: DashMap::new(),
        }
    }

    fn next_sequence(&self, participant_id: &str) -> u64 {
        self.sequences
            .entry(participant_id.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::SeqCst)
    }

    pub fn start(
        self: &Arc<Self>,
        spawner: &dyn TaskSpawner,
        provider_inbound: &Arc<EventBus<ProviderEvent>>,
        acs_outbound: &Arc<EventBus<OutboundFrame>>,
    ) -> Result<(), String> {
        let this = self.clone();
        let acs_outbound = acs_outbound.clone();
        provider_inbound.subscribe(
            "output-reformatter",
            256,
            OverflowPolicy::DropOldest,
            2,
            spawner,
            move |event: ProviderEvent| {
                let this = this.clone();
                let acs_outbound = acs_outbound.clone();
                async move { this.handle_event(event, &acs_outbound) }
            },
        )
    }

    fn handle_event(&self, event: ProviderEvent, acs_outbound: &EventBus<OutboundFrame>) {
        match event {
            ProviderEvent::TextDelta { participant_id, delta } => {
                self.pending_text
                    .entry(participant_id.clone())
                    .or_insert_with(|| Mutex::new(String::new()))
                    .lock()
                    .push_str(&delta);
                acs_outbound.publish(OutboundFrame::TextDelta {
                    participant_raw_id: participant_id.clone(),
                    text: delta,
                    sequence: self.next_sequence(&participant_id),
                });
            }
            ProviderEvent::TextDone { participant_id } => {
                let text = self
                    .pending_text
                    .remove(&participant_id)
                    .map(|(_, buf)| buf.into_inner())
                    .unwrap_or_default();
                acs_outbound.publish(OutboundFrame::TextFinal {
                    participant_raw_id: participant_id.clone(),
                    text,
                    sequence: self.next_sequence(&participant_id),
                });
            }
            ProviderEvent::AudioDelta {
                participant_id,
                response_id,
                audio_base64,
                sample_rate_hz,
            } => {
                let data = self.reencode_if_needed(&audio_base64, sample_rate_hz);
                acs_outbound.publish(OutboundFrame::Audio {
                    participant_raw_id: participant_id,
                    response_id,
                    data,
                });
            }
            ProviderEvent::AudioDone { response_id } | ProviderEvent::ResponseCancelled { response_id } => {
                acs_outbound.publish(OutboundFrame::ResponseDone { response_id });
            }
            ProviderEvent::Error { code, message } => {
                acs_outbound.publish(OutboundFrame::Error { code, message });
            }
        }
    }

    /// Re-encodes provider audio to the session's output sample rate when
    /// they differ (`spec.md` §4.10); a malformed base64 payload is logged
    /// and passed through unchanged rather than dropped, since a corrupt
    /// frame is still better diagnosed on the peer than silently eaten.
    fn reencode_if_needed(&self, audio_base64: &str, provider_rate_hz: u32) -> String {
        if provider_rate_hz == self.session_output_sample_rate_hz {
            return audio_base64.to_string();
        }
        let Ok(bytes) = STANDARD.decode(audio_base64) else {
            log::warn!("output reformatter: failed to decode provider audio payload");
            return audio_base64.to_string();
        };
        let samples = pcm16_samples(&bytes);
        let resampled = resample_linear(&samples, provider_rate_hz, self.session_output_sample_rate_hz);
        STANDARD.encode(pcm16_to_bytes(&resampled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::TokioSpawner;
    use std::time::Duration;

    #[tokio::test]
    async fn text_delta_and_done_accumulate_into_final_text() {
        let reformatter = Arc::new(OutputReformatter::new(16_000));
        let inbound: Arc<EventBus<ProviderEvent>> = Arc::new(EventBus::new("provider_inbound"));
        let outbound: Arc<EventBus<OutboundFrame>> = Arc::new(EventBus::new("acs_outbound"));
        let spawner = TokioSpawner::current();
        let collected = Arc::new(Mutex::new(Vec::new()));
        let collected2 = collected.clone();
        outbound
            .subscribe(
                "collector",
                64,
                OverflowPolicy::DropOldest,
                1,
                &spawner,
                move |frame: OutboundFrame| {
                    let collected2 = collected2.clone();
                    async move { collected2.lock().push(frame) }
                },
            )
            .unwrap();
        reformatter.start(&spawner, &inbound, &outbound).unwrap();

        inbound.publish(ProviderEvent::TextDelta {
            participant_id: "p1".into(),
            delta: "hel".into(),
        });
        inbound.publish(ProviderEvent::TextDelta {
            participant_id: "p1".into(),
            delta: "lo".into(),
        });
        inbound.publish(ProviderEvent::TextDone {
            participant_id: "p1".into(),
        });
        tokio::time::sleep(Duration::from_millis(30)).await;

        let frames = collected.lock();
        let final_frame = frames.iter().find_map(|f| match f {
            OutboundFrame::TextFinal { text, .. } => Some(text.clone()),
            _ => None,
        });
        assert_eq!(final_frame.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn audio_delta_at_session_rate_passes_through_unchanged() {
        let reformatter = Arc::new(OutputReformatter::new(16_000));
        let inbound: Arc<EventBus<ProviderEvent>> = Arc::new(EventBus::new("provider_inbound"));
        let outbound: Arc<EventBus<OutboundFrame>> = Arc::new(EventBus::new("acs_outbound"));
        let spawner = TokioSpawner::current();
        let collected = Arc::new(Mutex::new(Vec::new()));
        let collected2 = collected.clone();
        outbound
            .subscribe(
                "collector",
                64,
                OverflowPolicy::DropOldest,
                1,
                &spawner,
                move |frame: OutboundFrame| {
                    let collected2 = collected2.clone();
                    async move { collected2.lock().push(frame) }
                },
            )
            .unwrap();
        reformatter.start(&spawner, &inbound, &outbound).unwrap();

        inbound.publish(ProviderEvent::AudioDelta {
            participant_id: "p1".into(),
            response_id: "r1".into(),
            audio_base64: "AAAA".into(),
            sample_rate_hz: 16_000,
        });
        tokio::time::sleep(Duration::from_millis(30)).await;

        let frames = collected.lock();
        match &frames[0] {
            OutboundFrame::Audio { data, .. } => assert_eq!(data, "AAAA"),
            other => panic!("expected audio frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn audio_done_and_cancelled_both_emit_response_done() {
        let reformatter = Arc::new(OutputReformatter::new(16_000));
        let inbound: Arc<EventBus<ProviderEvent>> = Arc::new(EventBus::new("provider_inbound"));
        let outbound: Arc<EventBus<OutboundFrame>> = Arc::new(EventBus::new("acs_outbound"));
        let spawner = TokioSpawner::current();
        let collected = Arc::new(Mutex::new(Vec::new()));
        let collected2 = collected.clone();
        outbound
            .subscribe(
                "collector",
                64,
                OverflowPolicy::DropOldest,
                1,
                &spawner,
                move |frame: OutboundFrame| {
                    let collected2 = collected2.clone();
                    async move { collected2.lock().push(frame) }
                },
            )
            .unwrap();
        reformatter.start(&spawner, &inbound, &outbound).unwrap();

        inbound.publish(ProviderEvent::AudioDone {
            response_id: "r1".into(),
        });
        inbound.publish(ProviderEvent::ResponseCancelled {
            response_id: "r2".into(),
        });
        tokio::time::sleep(Duration::from_millis(30)).await;

        let frames = collected.lock();
        let done_ids: Vec<_> = frames
            .iter()
            .filter_map(|f| match f {
                OutboundFrame::ResponseDone { response_id } => Some(response_id.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(done_ids, vec!["r1".to_string(), "r2".to_string()]);
    }
}
