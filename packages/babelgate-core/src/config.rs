//! Configuration surface (`spec.md` §4.11): an immutable snapshot struct
//! loaded from YAML, then overlaid from environment variables.
//!
//! Mirrors the teacher's `ServerConfig` shape (`#[serde(default)]`,
//! `Default` impl, `load()`), but the environment overlay is stricter:
//! the teacher silently ignored a bad override (`if let Ok(val) = ...`);
//! here a malformed override aborts startup with a diagnostic, per
//! `spec.md` §4.11 ("a failed overlay conversion aborts startup").

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use thiserror::Error;

use crate::audio::BatchingConfig;
use crate::bus::OverflowPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment override {var}: list-valued fields are not overridable")]
    ListField { var: String },
    #[error("environment override {var}: invalid value '{value}': {reason}")]
    InvalidValue {
        var: String,
        value: String,
        reason: String,
    },
    #[error("environment override {var}: unknown section/subkey")]
    UnknownKey { var: String },
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct BufferingConfig {
    pub ingress_queue_max: usize,
    pub egress_queue_max: usize,
    pub overflow_policy: OverflowPolicy,
}

impl Default for BufferingConfig {
    fn default() -> Self {
        Self {
            ingress_queue_max: 256,
            egress_queue_max: 512,
            overflow_policy: OverflowPolicy::DropOldest,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProviderConfigEntry {
    #[serde(rename = "type")]
    pub provider_type: String,
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub region: Option<String>,
    #[serde(default)]
    pub settings: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub default_provider: String,
    pub log_level: String,
    pub batching: BatchingConfig,
    pub buffering: BufferingConfig,
    pub providers: HashMap<String, ProviderConfigEntry>,
    /// Sample rate the wire protocol's outbound audio is reformatted to
    /// when a provider's rate differs (`spec.md` §4.10).
    pub session_output_sample_rate_hz: u32,
}

impl Default for Config {
    fn default() -> Self {
        let mut providers = HashMap::new();
        providers.insert(
            "mock".to_string(),
            ProviderConfigEntry {
                provider_type: "mock".to_string(),
                ..Default::default()
            },
        );
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            default_provider: "mock".to_string(),
            log_level: "info".to_string(),
            batching: BatchingConfig::default(),
            buffering: BufferingConfig::default(),
            providers,
            session_output_sample_rate_hz: 16_000,
        }
    }
}

impl Config {
    /// Loads from an optional YAML file (falling back to defaults), then
    /// applies the `prefix`-scoped environment overlay.
    pub fn load(path: Option<&Path>, env_prefix: &str) -> Result<Self> {
        let mut config: Self = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config
            .apply_env_overrides(env_prefix)
            .context("environment overlay failed")?;
        Ok(config)
    }

    /// Scans `std::env::vars()` for `{prefix}_SECTION_SUBKEY` names and
    /// applies each as a typed override. Fails fast on the first bad
    /// override (`spec.md` §4.11).
    fn apply_env_overrides(&mut self, prefix: &str) -> Result<(), ConfigError> {
        let scan_prefix = format!("{prefix}_");
        let mut vars: Vec<(String, String)> = std::env::vars()
            .filter(|(k, _)| k.starts_with(&scan_prefix))
            .collect();
        vars.sort();

        for (var, value) in vars.drain(..) {
            let key = &var[scan_prefix.len()..];
            self.apply_one_override(&var, key, &value)?;
        }
        Ok(())
    }

    fn apply_one_override(&mut self, var: &str, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "HOST" => self.host = value.to_string(),
            "PORT" => self.port = parse_numeric(var, value)?,
            "DEFAULT_PROVIDER" => self.default_provider = value.to_string(),
            "LOG_LEVEL" => self.log_level = value.to_string(),
            "SESSION_OUTPUT_SAMPLE_RATE_HZ" => {
                self.session_output_sample_rate_hz = parse_numeric(var, value)?;
            }
            "BATCHING_ENABLED" => self.batching.enabled = parse_bool(var, value)?,
            "BATCHING_MAX_BATCH_BYTES" => self.batching.max_batch_bytes = parse_numeric(var, value)?,
            "BATCHING_MAX_BATCH_MS" => self.batching.max_batch_ms = parse_numeric(var, value)?,
            "BATCHING_IDLE_TIMEOUT_MS" => self.batching.idle_timeout_ms = parse_numeric(var, value)?,
            "BUFFERING_INGRESS_QUEUE_MAX" => {
                self.buffering.ingress_queue_max = parse_numeric(var, value)?;
            }
            "BUFFERING_EGRESS_QUEUE_MAX" => {
                self.buffering.egress_queue_max = parse_numeric(var, value)?;
            }
            "BUFFERING_OVERFLOW_POLICY" => {
                self.buffering.overflow_policy = match value.to_ascii_lowercase().as_str() {
                    "drop_oldest" => OverflowPolicy::DropOldest,
                    "drop_newest" => OverflowPolicy::DropNewest,
                    other => {
                        return Err(ConfigError::InvalidValue {
                            var: var.to_string(),
                            value: other.to_string(),
                            reason: "expected 'drop_oldest' or 'drop_newest'".to_string(),
                        })
                    }
                };
            }
            _ if key.starts_with("PROVIDERS_") => self.apply_provider_override(var, key, value)?,
            _ => return Err(ConfigError::UnknownKey { var: var.to_string() }),
        }
        Ok(())
    }

    fn apply_provider_override(&mut self, var: &str, key: &str, value: &str) -> Result<(), ConfigError> {
        let rest = &key["PROVIDERS_".len()..];
        const SUFFIXES: &[(&str, &str)] = &[
            ("_TYPE", "type"),
            ("_ENDPOINT", "endpoint"),
            ("_API_KEY", "api_key"),
            ("_REGION", "region"),
        ];
        let Some((name, field)) = SUFFIXES.iter().find_map(|(suffix, field)| {
            rest.strip_suffix(suffix).map(|name| (name.to_ascii_lowercase(), *field))
        }) else {
            return Err(ConfigError::UnknownKey { var: var.to_string() });
        };

        let entry = self.providers.entry(name).or_default();
        let cleared = is_clearing_value(value);
        match field {
            "type" => entry.provider_type = value.to_string(),
            "endpoint" => entry.endpoint = if cleared { None } else { Some(value.to_string()) },
            "api_key" => entry.api_key = if cleared { None } else { Some(value.to_string()) },
            "region" => entry.region = if cleared { None } else { Some(value.to_string()) },
            _ => unreachable!(),
        }
        Ok(())
    }
}

fn is_clearing_value(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "" | "null" | "none")
}

fn parse_bool(var: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Ok(true),
        "false" | "no" | "0" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            var: var.to_string(),
            value: other.to_string(),
            reason: "expected a boolean (true/yes/1/on or false/no/0/off)".to_string(),
        }),
    }
}

fn parse_numeric<T: std::str::FromStr>(var: &str, value: &str) -> Result<T, ConfigError> {
    value.parse::<T>().map_err(|_| ConfigError::InvalidValue {
        var: var.to_string(),
        value: value.to_string(),
        reason: "expected a number".to_string(),
    })
}
