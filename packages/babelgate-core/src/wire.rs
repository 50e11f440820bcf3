//! Inbound/outbound wire protocol types (`spec.md` §6.1).
//!
//! The inbound acceptor is a full-duplex WebSocket carrying JSON text
//! frames only (no binary frames). Mirrors the teacher's tagged-enum
//! `WsIncoming`/`WsOutgoing` pattern in spirit, adapted to the ACS-style
//! envelope this protocol actually uses.

use serde::{Deserialize, Serialize};

/// Audio payload nested inside an inbound `AudioData` frame.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InboundAudioData {
    #[serde(rename = "participantRawID")]
    pub participant_raw_id: String,
    /// Base64-encoded PCM16LE mono payload.
    pub data: String,
    /// Optional peer-supplied timestamp, recorded in metadata only
    /// (`spec.md` §9: monotonic arrival time is authoritative for scheduling).
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_channels")]
    pub channels: u16,
}

fn default_sample_rate() -> u32 {
    16_000
}

fn default_channels() -> u16 {
    1
}

/// One message received from the peer, before it is wrapped into a decoded
/// envelope for `acs_inbound`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "PascalCase")]
pub enum InboundFrame {
    AudioData {
        #[serde(rename = "audioData")]
        audio_data: InboundAudioData,
        #[serde(default)]
        metadata: Option<serde_json::Value>,
    },
    #[serde(other)]
    Unknown,
}

/// Control messages are not tagged by `kind` but by `type`; they ride a
/// separate top-level shape on the same socket (`spec.md` §6.1).
#[derive(Debug, Clone, Deserialize)]
pub struct ControlTestSettings {
    #[serde(default)]
    pub provider: Option<String>,
}

/// A message as decoded from the raw JSON before it is known whether it is
/// an audio frame or a control message.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawInbound {
    Audio(InboundFrame),
    Control {
        #[serde(rename = "type")]
        kind: String,
        #[serde(flatten)]
        rest: serde_json::Value,
    },
}

/// The decoded envelope published onto `acs_inbound` (`spec.md` §4.4).
#[derive(Debug, Clone)]
pub struct InboundEnvelope {
    pub kind: InboundKind,
    pub payload: serde_json::Value,
    pub participant_id: Option<String>,
    pub timestamp_ms: Option<u64>,
    pub sequence: u64,
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundKind {
    Audio,
    ControlTestSettings,
    Unknown(String),
}

/// Frames the core sends back over the wire (`spec.md` §6.1).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum OutboundFrame {
    #[serde(rename = "translation.text_delta")]
    TextDelta {
        #[serde(rename = "participantRawID")]
        participant_raw_id: String,
        text: String,
        sequence: u64,
    },
    #[serde(rename = "translation.text_final")]
    TextFinal {
        #[serde(rename = "participantRawID")]
        participant_raw_id: String,
        text: String,
        sequence: u64,
    },
    #[serde(rename = "translation.audio")]
    Audio {
        #[serde(rename = "participantRawID")]
        participant_raw_id: String,
        #[serde(rename = "responseId")]
        response_id: String,
        data: String,
    },
    #[serde(rename = "translation.response.done")]
    ResponseDone {
        #[serde(rename = "responseId")]
        response_id: String,
    },
    #[serde(rename = "error")]
    Error { code: String, message: String },
}

impl OutboundFrame {
    /// True for frames the pipeline's outbound gate should discard while
    /// closed; everything else (text, control frames) is still forwarded
    /// (`spec.md` §4.5 `set_outbound_gate`).
    #[must_use]
    pub fn is_audio(&self) -> bool {
        matches!(self, OutboundFrame::Audio { .. })
    }

    /// Serializes to the JSON text the wire carries.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            log::error!("failed to serialize outbound frame: {e}");
            "{\"type\":\"error\",\"code\":\"internal\",\"message\":\"serialization failure\"}"
                .to_string()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_frame_parses_with_required_fields() {
        let json = r#"{
            "kind": "AudioData",
            "audioData": {
                "participantRawID": "p1",
                "data": "AAAA",
                "sampleRate": 16000,
                "channels": 1
            }
        }"#;
        let parsed: RawInbound = serde_json::from_str(json).unwrap();
        match parsed {
            RawInbound::Audio(InboundFrame::AudioData { audio_data, .. }) => {
                assert_eq!(audio_data.participant_raw_id, "p1");
            }
            _ => panic!("expected audio frame"),
        }
    }

    #[test]
    fn unknown_kind_is_tolerated() {
        let json = r#"{"kind": "SomethingElse"}"#;
        let parsed: InboundFrame = serde_json::from_str(json).unwrap();
        assert!(matches!(parsed, InboundFrame::Unknown));
    }

    #[test]
    fn outbound_audio_frame_is_identified_as_audio() {
        let frame = OutboundFrame::Audio {
            participant_raw_id: "p1".into(),
            response_id: "r1".into(),
            data: "AAAA".into(),
        };
        assert!(frame.is_audio());
        let text = frame.to_json();
        assert!(text.contains("translation.audio"));
    }

    #[test]
    fn error_frame_is_not_audio() {
        let frame = OutboundFrame::Error {
            code: "internal".into(),
            message: "boom".into(),
        };
        assert!(!frame.is_audio());
    }
}
