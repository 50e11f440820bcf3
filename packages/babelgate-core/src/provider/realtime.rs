//! Adapter for realtime-style translation providers that speak a
//! session-oriented JSON-over-WebSocket protocol (client events in,
//! server events out), grounded on the `ClientEvent`/`ServerEvent`
//! taxonomy of this protocol family: `session.update`,
//! `input_audio_buffer.append/commit`, `response.create/cancel` out;
//! `response.text.delta/done`, `response.audio.delta/done`,
//! `input_audio_buffer.speech_started/stopped`, `error` in.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tracing::Instrument;

use super::{ProviderAdapter, ProviderEvent, ProviderSessionConfig};
use crate::audio::AudioCommit;
use crate::bus::{EventBus, OverflowPolicy};
use crate::error::{CoreError, CoreResult};
use crate::runtime::TaskSpawner;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RealtimeProviderConfig {
    pub default_endpoint: String,
    pub connect_timeout_ms: u64,
    /// Maximum connect attempts before `start` gives up (`spec.md` §4.7,
    /// §7 "Provider connect failure": "retry up to 5x with backoff").
    /// Overridable per-provider via the configuration surface's `settings`
    /// map (`spec.md` §4.11).
    pub max_connect_attempts: u32,
    pub backoff_base_ms: u64,
}

impl Default for RealtimeProviderConfig {
    fn default() -> Self {
        Self {
            default_endpoint: "wss://realtime.invalid/v1/session".to_string(),
            connect_timeout_ms: 10_000,
            max_connect_attempts: 5,
            backoff_base_ms: 200,
        }
    }
}

/// Outbound messages this adapter sends to the provider.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: serde_json::Value },
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },
    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioBufferCommit,
    #[serde(rename = "response.cancel")]
    ResponseCancel { response_id: String },
}

/// Inbound messages this adapter receives from the provider.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
enum ServerEvent {
    #[serde(rename = "response.text.delta")]
    TextDelta { participant_id: String, delta: String },
    #[serde(rename = "response.text.done")]
    TextDone { participant_id: String },
    #[serde(rename = "response.audio.delta")]
    AudioDelta {
        participant_id: String,
        response_id: String,
        audio: String,
        #[serde(default = "default_sample_rate")]
        sample_rate_hz: u32,
    },
    #[serde(rename = "response.audio.done")]
    AudioDone { response_id: String },
    #[serde(rename = "response.done")]
    ResponseDone { response_id: String },
    #[serde(rename = "error")]
    Error { code: String, message: String },
    #[serde(other)]
    Unknown,
}

fn default_sample_rate() -> u32 {
    16_000
}

impl From<ServerEvent> for Option<ProviderEvent> {
    fn from(event: ServerEvent) -> Self {
        match event {
            ServerEvent::TextDelta { participant_id, delta } => {
                Some(ProviderEvent::TextDelta { participant_id, delta })
            }
            ServerEvent::TextDone { participant_id } => {
                Some(ProviderEvent::TextDone { participant_id })
            }
            ServerEvent::AudioDelta {
                participant_id,
                response_id,
                audio,
                sample_rate_hz,
            } => Some(ProviderEvent::AudioDelta {
                participant_id,
                response_id,
                audio_base64: audio,
                sample_rate_hz,
            }),
            ServerEvent::AudioDone { response_id } => Some(ProviderEvent::AudioDone { response_id }),
            ServerEvent::ResponseDone { .. } => None,
            ServerEvent::Error { code, message } => Some(ProviderEvent::Error { code, message }),
            ServerEvent::Unknown => None,
        }
    }
}

/// Outbound half of the socket, kept behind a mutex so both the egress
/// subscriber and `cancel`/`close` can reach it without a second
/// connection.
struct Sink {
    tx: mpsc::UnboundedSender<Message>,
}

pub struct RealtimeProviderAdapter {
    config: RealtimeProviderConfig,
    sink: Mutex<Option<Sink>>,
    closed: AtomicBool,
}

impl RealtimeProviderAdapter {
    #[must_use]
    pub fn new(config: RealtimeProviderConfig) -> Self {
        Self {
            config,
            sink: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Connects with exponential backoff, capped at `max_connect_attempts`
    /// (`spec.md` §7 "Provider connect failure": "retry up to 5x with
    /// backoff"). Returns `ProviderUnreachable` once every attempt has
    /// failed.
    async fn connect_with_retry(
        &self,
        endpoint: &str,
        api_key: Option<&str>,
    ) -> CoreResult<tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>> {
        let span = tracing::info_span!("provider_connect", endpoint, max_attempts = self.config.max_connect_attempts);
        async move {
            let mut last_error = String::new();
            for attempt in 1..=self.config.max_connect_attempts {
                let attempt_span = tracing::info_span!("connect_attempt", attempt);
                let mut request = endpoint
                    .into_client_request()
                    .map_err(|e| CoreError::ProviderUnreachable(format!("bad endpoint '{endpoint}': {e}")))?;
                if let Some(key) = api_key {
                    let value = format!("Bearer {key}")
                        .parse()
                        .map_err(|e| CoreError::Configuration(format!("invalid api key header: {e}")))?;
                    request.headers_mut().insert("Authorization", value);
                }

                let connect = tokio_tungstenite::connect_async(request);
                let attempt_result = tokio::time::timeout(
                    Duration::from_millis(self.config.connect_timeout_ms),
                    connect,
                )
                .instrument(attempt_span)
                .await;

                match attempt_result {
                    Ok(Ok((ws_stream, _response))) => return Ok(ws_stream),
                    Ok(Err(e)) => last_error = format!("connect to '{endpoint}' failed: {e}"),
                    Err(_) => last_error = format!("connect to '{endpoint}' timed out"),
                }

                if attempt < self.config.max_connect_attempts {
                    let backoff = self.config.backoff_base_ms * 2u64.pow(attempt - 1);
                    log::warn!(
                        "realtime adapter: connect attempt {attempt}/{} failed ({last_error}), retrying in {backoff}ms",
                        self.config.max_connect_attempts
                    );
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                }
            }
            Err(CoreError::ProviderUnreachable(format!(
                "giving up after {} attempts: {last_error}",
                self.config.max_connect_attempts
            )))
        }
        .instrument(span)
        .await
    }

    fn send_client_event(&self, event: &ClientEvent) {
        let guard = self.sink.lock();
        let Some(sink) = guard.as_ref() else {
            log::warn!("realtime adapter: send before connect, dropping event");
            return;
        };
        let text = match serde_json::to_string(event) {
            Ok(t) => t,
            Err(e) => {
                log::error!("realtime adapter: failed to encode client event: {e}");
                return;
            }
        };
        if sink.tx.send(Message::Text(text.into())).is_err() {
            log::warn!("realtime adapter: outbound channel closed, dropping event");
        }
    }
}

#[async_trait]
impl ProviderAdapter for RealtimeProviderAdapter {
    async fn start(
        self: Arc<Self>,
        spawner: &dyn TaskSpawner,
        provider_outbound: Arc<EventBus<AudioCommit>>,
        provider_inbound: Arc<EventBus<ProviderEvent>>,
        session_config: ProviderSessionConfig,
    ) -> CoreResult<()> {
        let lifecycle_span = tracing::info_span!(
            "provider_session",
            provider = "realtime",
            provider_name = %session_config.provider_name
        );

        let endpoint = session_config
            .endpoint
            .clone()
            .unwrap_or_else(|| self.config.default_endpoint.clone());

        let ws_stream = self
            .connect_with_retry(&endpoint, session_config.api_key.as_deref())
            .instrument(lifecycle_span)
            .await?;

        let (mut write, mut read) = ws_stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        *self.sink.lock() = Some(Sink { tx });

        let egress_span = tracing::info_span!("provider_egress", provider_name = %session_config.provider_name);
        spawner.spawn(Box::pin(
            async move {
                while let Some(msg) = rx.recv().await {
                    if write.send(msg).await.is_err() {
                        break;
                    }
                }
                let _ = write.close().await;
            }
            .instrument(egress_span),
        ));

        self.send_client_event(&ClientEvent::SessionUpdate {
            session: session_config.settings.clone(),
        });

        let this = self.clone();
        let provider_inbound_for_ingress = provider_inbound.clone();
        let ingress_span = tracing::info_span!("provider_ingress", provider_name = %session_config.provider_name);
        spawner.spawn(Box::pin(
            async move {
                while let Some(frame) = read.next().await {
                    if this.closed.load(Ordering::Relaxed) {
                        break;
                    }
                    match frame {
                        Ok(Message::Text(text)) => match serde_json::from_str::<ServerEvent>(&text) {
                            Ok(event) => {
                                if let Some(mapped) = Option::<ProviderEvent>::from(event) {
                                    provider_inbound_for_ingress.publish(mapped);
                                }
                            }
                            Err(e) => {
                                log::warn!("realtime adapter: unparseable server event: {e}");
                            }
                        },
                        Ok(Message::Close(_)) => break,
                        Ok(_) => {}
                        Err(e) => {
                            log::warn!("realtime adapter: socket read error: {e}");
                            provider_inbound_for_ingress.publish(ProviderEvent::Error {
                                code: "provider_socket_error".to_string(),
                                message: e.to_string(),
                            });
                            break;
                        }
                    }
                }
            }
            .instrument(ingress_span),
        ));

        let this = self.clone();
        provider_outbound
            .subscribe(
                "realtime-adapter",
                256,
                OverflowPolicy::DropOldest,
                1,
                spawner,
                move |commit: AudioCommit| {
                    let this = this.clone();
                    async move {
                        this.send_client_event(&ClientEvent::InputAudioBufferAppend {
                            audio: commit.audio_base64.clone(),
                        });
                        this.send_client_event(&ClientEvent::InputAudioBufferCommit);
                    }
                },
            )
            .map_err(CoreError::Internal)?;

        Ok(())
    }

    async fn cancel(&self, response_id: &str, _reason: &str) {
        self.send_client_event(&ClientEvent::ResponseCancel {
            response_id: response_id.to_string(),
        });
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
        *self.sink.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_event_response_done_has_no_neutral_equivalent() {
        let event = ServerEvent::ResponseDone {
            response_id: "r1".into(),
        };
        let mapped: Option<ProviderEvent> = event.into();
        assert!(mapped.is_none());
    }

    #[test]
    fn server_event_audio_delta_maps_fields_through() {
        let event = ServerEvent::AudioDelta {
            participant_id: "p1".into(),
            response_id: "r1".into(),
            audio: "AAAA".into(),
            sample_rate_hz: 24_000,
        };
        let mapped: Option<ProviderEvent> = event.into();
        match mapped {
            Some(ProviderEvent::AudioDelta {
                participant_id,
                response_id,
                sample_rate_hz,
                ..
            }) => {
                assert_eq!(participant_id, "p1");
                assert_eq!(response_id, "r1");
                assert_eq!(sample_rate_hz, 24_000);
            }
            _ => panic!("expected AudioDelta"),
        }
    }

    #[test]
    fn unknown_server_event_is_ignored() {
        let json = r#"{"type":"something.new","foo":"bar"}"#;
        let event: ServerEvent = serde_json::from_str(json).unwrap();
        let mapped: Option<ProviderEvent> = event.into();
        assert!(mapped.is_none());
    }

    #[tokio::test]
    async fn exhausted_retries_surface_provider_unreachable() {
        let adapter = RealtimeProviderAdapter::new(RealtimeProviderConfig {
            default_endpoint: "ws://127.0.0.1:1".to_string(),
            connect_timeout_ms: 50,
            max_connect_attempts: 3,
            backoff_base_ms: 1,
        });
        let result = adapter.connect_with_retry("ws://127.0.0.1:1", None).await;
        assert!(matches!(result, Err(CoreError::ProviderUnreachable(_))));
    }
}
