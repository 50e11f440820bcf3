//! `Session`: one instance per accepted inbound connection (`spec.md` §4.4).
//!
//! Parses inbound wire frames, assigns the per-session monotonic sequence,
//! resolves the provider and brings the pipeline's Phase 2 online on the
//! first message, and publishes decoded envelopes onto `acs_inbound`. The
//! actual socket read/write loop lives in the acceptor (`api::ws`); `Session`
//! only owns per-message processing, which keeps it testable without a real
//! transport.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::Instrument;

use crate::clock::Clock;
use crate::config::Config;
use crate::error::{CoreError, CoreResult, ErrorCode};
use crate::runtime::TaskSpawner;
use crate::session::pipeline::{resolve_provider_name, SessionPipeline};
use crate::wire::{ControlTestSettings, InboundEnvelope, InboundFrame, InboundKind, OutboundFrame, RawInbound};

/// Session identity plus whatever correlation metadata the peer supplies on
/// its first message (`spec.md` §3 Data Model: "Connection Context").
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    pub session_id: String,
    pub correlation_id: Option<String>,
}

/// One accepted inbound connection, after Phase-1 pipeline wiring.
pub struct Session {
    context: ConnectionContext,
    pipeline: Arc<SessionPipeline>,
    config: Config,
    clock: Arc<dyn Clock>,
    sequence: AtomicU64,
    phase_two_started: AtomicBool,
}

impl Session {
    /// Constructs the pipeline, runs Phase-1 wiring, and returns the ready
    /// `Session`. `peer_tx` is the channel the pipeline's wire-sender
    /// handler forwards outbound frames into; the caller owns the matching
    /// receiver and drains it to the real transport.
    pub fn new(
        session_id: impl Into<String>,
        config: &Config,
        clock: Arc<dyn Clock>,
        spawner: Arc<dyn TaskSpawner>,
        peer_tx: mpsc::UnboundedSender<OutboundFrame>,
    ) -> CoreResult<Arc<Self>> {
        let session_id = session_id.into();
        let pipeline = SessionPipeline::new(session_id.clone(), config, clock.clone(), spawner);
        pipeline
            .start_phase_one(peer_tx)
            .map_err(CoreError::InitFailed)?;
        Ok(Arc::new(Self {
            context: ConnectionContext {
                session_id,
                correlation_id: None,
            },
            pipeline,
            config: config.clone(),
            clock,
            sequence: AtomicU64::new(0),
            phase_two_started: AtomicBool::new(false),
        }))
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.context.session_id
    }

    #[must_use]
    pub fn pipeline(&self) -> &Arc<SessionPipeline> {
        &self.pipeline
    }

    /// Processes one raw text frame from the peer.
    ///
    /// Malformed JSON is logged and swallowed (`spec.md` §4.4: "on parse
    /// error, log and continue"). Only a Phase-2 provider-start failure is
    /// fatal; on that path an `error` frame is published to `acs_outbound`
    /// before the error is returned so the caller knows to close the
    /// transport and run cleanup.
    pub async fn on_text_message(&self, raw: &str) -> CoreResult<()> {
        let span = tracing::info_span!(
            "session_receive",
            session_id = %self.context.session_id,
            sequence = self.sequence.load(Ordering::Relaxed)
        );
        async move {
            let parsed: RawInbound = match serde_json::from_str(raw) {
                Ok(parsed) => parsed,
                Err(e) => {
                    log::warn!(
                        "[session:{}] malformed inbound frame, dropping: {e}",
                        self.context.session_id
                    );
                    return Ok(());
                }
            };

            let (kind, payload, participant_id, metadata) = decode_frame(parsed);

            if !self.phase_two_started.swap(true, Ordering::SeqCst) {
                if let Err(e) = self.start_phase_two(&kind, &payload, metadata.as_ref()).await {
                    let frame = OutboundFrame::Error {
                        code: e.code().to_string(),
                        message: e.to_string(),
                    };
                    self.pipeline.acs_outbound().publish(frame);
                    return Err(e);
                }
            }

            let envelope = InboundEnvelope {
                kind,
                payload,
                participant_id,
                timestamp_ms: Some(self.clock.now_ms()),
                sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
                session_id: self.context.session_id.clone(),
            };
            self.pipeline.acs_inbound().publish(envelope);
            Ok(())
        }
        .instrument(span)
        .await
    }

    async fn start_phase_two(
        &self,
        kind: &InboundKind,
        payload: &serde_json::Value,
        metadata: Option<&serde_json::Value>,
    ) -> CoreResult<()> {
        let translation_settings = match kind {
            InboundKind::ControlTestSettings => payload.clone(),
            _ => self.pipeline.translation_settings_snapshot(),
        };
        let provider_name = resolve_provider_name(
            Some(&translation_settings),
            metadata,
            &self.config.default_provider,
        );
        log::info!(
            "[session:{}] resolved provider '{provider_name}' for phase-2 start",
            self.context.session_id
        );
        self.pipeline
            .start_phase_two(&self.config, &provider_name, translation_settings)
            .await
    }

    /// Runs pipeline cleanup. Idempotent (delegates to
    /// `SessionPipeline::cleanup`, itself idempotent).
    pub async fn cleanup(&self) {
        self.pipeline.cleanup().await;
    }
}

/// Splits a raw inbound message into the pieces an `InboundEnvelope` needs.
fn decode_frame(
    parsed: RawInbound,
) -> (InboundKind, serde_json::Value, Option<String>, Option<serde_json::Value>) {
    match parsed {
        RawInbound::Audio(InboundFrame::AudioData { audio_data, metadata }) => {
            let participant_id = Some(audio_data.participant_raw_id.clone());
            let payload = serde_json::to_value(&audio_data).unwrap_or(serde_json::Value::Null);
            (InboundKind::Audio, payload, participant_id, metadata)
        }
        RawInbound::Audio(InboundFrame::Unknown) => {
            (InboundKind::Unknown("audio".to_string()), serde_json::Value::Null, None, None)
        }
        RawInbound::Control { kind, rest } => {
            if kind == "control.test.settings" {
                // Validate shape but publish the raw value; the Phase-1
                // handler re-parses the fields it cares about.
                if serde_json::from_value::<ControlTestSettings>(rest.clone()).is_err() {
                    log::debug!("control.test.settings frame missing expected fields");
                }
                (InboundKind::ControlTestSettings, rest, None, None)
            } else {
                (InboundKind::Unknown(kind), rest, None, None)
            }
        }
    }
}
