//! Provider adapter contract (`spec.md` §4.7) and the neutral event shape
//! every concrete adapter normalizes its provider's wire protocol into.
//!
//! The core never branches on provider type outside [`build_adapter`]
//! (`spec.md` §9): everywhere else, code holds a `dyn ProviderAdapter` and
//! calls `start`/`cancel`/`close`.

pub mod mock;
pub mod realtime;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::audio::AudioCommit;
use crate::bus::EventBus;
use crate::error::{CoreError, CoreResult};
use crate::runtime::TaskSpawner;

/// The small set of neutral events every provider's wire protocol is
/// normalized into (`spec.md` §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ProviderEvent {
    #[serde(rename = "provider.text.delta")]
    TextDelta { participant_id: String, delta: String },
    #[serde(rename = "provider.text.done")]
    TextDone { participant_id: String },
    #[serde(rename = "provider.audio.delta")]
    AudioDelta {
        participant_id: String,
        response_id: String,
        audio_base64: String,
        sample_rate_hz: u32,
    },
    #[serde(rename = "provider.audio.done")]
    AudioDone { response_id: String },
    #[serde(rename = "provider.response.cancelled")]
    ResponseCancelled { response_id: String },
    #[serde(rename = "provider.error")]
    Error { code: String, message: String },
}

/// Per-session configuration handed to a provider adapter at `start()`,
/// derived from the first inbound frame's `metadata`/`translation_settings`
/// (`spec.md` §4.7, §4.11 provider selection order).
#[derive(Debug, Clone, Default)]
pub struct ProviderSessionConfig {
    pub provider_name: String,
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub settings: serde_json::Value,
}

/// Driver over one external translation service (`spec.md` §4.7).
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Opens the provider connection and spawns the egress/ingress workers.
    /// Returns once the connection is established or fails with a
    /// structured error. Sends any provider-specific "session configure"
    /// message derived from `session_config`.
    async fn start(
        self: Arc<Self>,
        spawner: &dyn TaskSpawner,
        provider_outbound: Arc<EventBus<AudioCommit>>,
        provider_inbound: Arc<EventBus<ProviderEvent>>,
        session_config: ProviderSessionConfig,
    ) -> CoreResult<()>;

    /// Sends the provider's cancel message for an in-flight response.
    /// Idempotent: a stale or unknown `response_id` is a no-op
    /// (`spec.md` §7 "Provider cancel race").
    async fn cancel(&self, response_id: &str, reason: &str);

    /// Stops both workers with a deadline, closes the socket, releases
    /// resources. Idempotent.
    async fn close(&self);
}

/// The only place in the core allowed to branch on provider `type`
/// (`spec.md` §9). `settings` is the provider's configured `settings` map
/// (`spec.md` §4.11's `providers: map<name, {..., settings: opaque map}>`),
/// overlaid onto each adapter's own defaults.
pub fn build_adapter(provider_type: &str, settings: &serde_json::Value) -> CoreResult<Arc<dyn ProviderAdapter>> {
    match provider_type {
        "mock" => Ok(Arc::new(mock::MockProviderAdapter::new(
            parse_provider_settings(settings)?,
        ))),
        "realtime" => Ok(Arc::new(realtime::RealtimeProviderAdapter::new(
            parse_provider_settings(settings)?,
        ))),
        other => Err(CoreError::Configuration(format!(
            "unknown provider type '{other}'"
        ))),
    }
}

/// Deserializes a provider's `settings` value into its concrete config
/// type, falling back to the type's defaults for a null/absent map and for
/// any field the map doesn't mention.
fn parse_provider_settings<T>(settings: &serde_json::Value) -> CoreResult<T>
where
    T: serde::de::DeserializeOwned + Default,
{
    if settings.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(settings.clone())
        .map_err(|e| CoreError::Configuration(format!("invalid provider settings: {e}")))
}
