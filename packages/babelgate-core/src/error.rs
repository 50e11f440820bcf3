//! Centralized error types for the session runtime.
//!
//! Mirrors the stable error-code vocabulary the wire protocol exposes to
//! peers (`provider_unreachable`, `provider_fatal`, `init_failed`, `internal`)
//! while keeping enough structure internally to log each failure with
//! context.

use serde::Serialize;
use thiserror::Error;

/// Trait for error types that provide a machine-readable error code.
pub trait ErrorCode {
    /// Returns a stable, machine-readable error code.
    fn code(&self) -> &'static str;
}

/// Errors raised inside the core session runtime.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The provider connection could not be established after retrying.
    #[error("provider unreachable: {0}")]
    ProviderUnreachable(String),

    /// The provider connection failed in a way that is not recoverable by retry.
    #[error("provider fatal error: {0}")]
    ProviderFatal(String),

    /// Session or pipeline initialization failed before the session could run.
    #[error("session initialization failed: {0}")]
    InitFailed(String),

    /// Configuration was invalid or an environment overlay value failed to parse.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Catch-all for unexpected internal failures.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ErrorCode for CoreError {
    fn code(&self) -> &'static str {
        match self {
            Self::ProviderUnreachable(_) => "provider_unreachable",
            Self::ProviderFatal(_) => "provider_fatal",
            Self::InitFailed(_) => "init_failed",
            Self::Configuration(_) => "configuration_error",
            Self::Internal(_) => "internal",
        }
    }
}

/// Convenience alias for results produced by the core library.
pub type CoreResult<T> = Result<T, CoreError>;

/// The `{ "type": "error", code, message }` frame sent to a peer on fatal
/// session failure (`spec.md` §6.1, §7).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorFrame {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub code: &'static str,
    pub message: String,
}

impl From<&CoreError> for ErrorFrame {
    fn from(err: &CoreError) -> Self {
        Self {
            kind: "error",
            code: err.code(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_unreachable_maps_to_stable_code() {
        let err = CoreError::ProviderUnreachable("5 attempts exhausted".into());
        assert_eq!(err.code(), "provider_unreachable");
        let frame = ErrorFrame::from(&err);
        assert_eq!(frame.code, "provider_unreachable");
        assert_eq!(frame.kind, "error");
    }

    #[test]
    fn internal_error_maps_to_stable_code() {
        let err = CoreError::Internal("unexpected panic recovered".into());
        assert_eq!(err.code(), "internal");
    }
}
