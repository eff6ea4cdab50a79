//! Error taxonomy for correlated loads.
//!
//! [`LoadError`] is what a pending load rejects with. Each variant carries a
//! stable [`ErrorCode`] so callers (and the CLI) can render failures without
//! matching on message text.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Terminal failure of a single load. None of these are retried by the loader.
#[derive(Debug, Error)]
pub enum LoadError {
    /// No settlement arrived before the configured timeout elapsed.
    #[error("timeout exceeded after {}ms", timeout.as_millis())]
    TimeoutExceeded { timeout: Duration },

    /// The injected resource could not be fetched or executed.
    #[error("transport failure: {0}")]
    TransportFailure(#[from] TransportError),

    /// The response payload itself reported an error.
    ///
    /// Carries the error value verbatim (the `error` field, or the falsy
    /// payload when the response was absent).
    #[error("server reported error: {0}")]
    ServerReportedError(Value),

    /// An explicit padding key already has an active registration.
    #[error("correlation token `{token}` is already in use")]
    TokenInUse { token: String },

    /// The operation was dropped before any settlement (runtime shutdown).
    #[error("load abandoned before settlement")]
    Abandoned,
}

impl LoadError {
    #[must_use]
    pub fn timeout(timeout: Duration) -> Self {
        Self::TimeoutExceeded { timeout }
    }

    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::TimeoutExceeded { .. } => ErrorCode::TimeoutExceeded,
            Self::TransportFailure(_) => ErrorCode::TransportFailure,
            Self::ServerReportedError(_) => ErrorCode::ServerReportedError,
            Self::TokenInUse { .. } => ErrorCode::TokenInUse,
            Self::Abandoned => ErrorCode::Abandoned,
        }
    }

    /// Server-reported error value, if this is a payload-level failure.
    #[must_use]
    pub fn server_error(&self) -> Option<&Value> {
        match self {
            Self::ServerReportedError(value) => Some(value),
            _ => None,
        }
    }

    /// JSON form of the error, as printed by the CLI.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut obj = serde_json::json!({
            "code": self.code(),
            "message": self.to_string(),
        });
        if let Some(value) = self.server_error() {
            obj["error"] = value.clone();
        }
        obj
    }
}

/// Stable error codes, one per [`LoadError`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    TimeoutExceeded,
    TransportFailure,
    ServerReportedError,
    TokenInUse,
    Abandoned,
}

/// Why an injected resource failed before it could invoke its callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Connection, DNS, TLS, or body read failure.
    #[error("network error: {0}")]
    Network(String),
    /// The resource was served with a non-success status.
    #[error("unexpected status {0}")]
    Status(u16),
    /// The resource body is not a callable script.
    #[error("script error: {0}")]
    Script(String),
    /// The script called a name nobody registered.
    #[error("callback `{0}` is not registered")]
    UnknownCallback(String),
}

/// Rejected request descriptor fields.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    #[error("url must not be empty or whitespace-only")]
    EmptyUrl,
    #[error("failed to parse url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("timeout must be a positive duration")]
    ZeroTimeout,
    #[error("{field} must not be empty")]
    EmptyName { field: &'static str },
    #[error("invalid correlation token `{0}`: only [A-Za-z0-9_$.] are allowed")]
    InvalidToken(String),
}
