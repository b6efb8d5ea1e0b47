//! Error types for the request pipeline.
//!
//! Rate-limit conditions are never errors: admission returns a
//! [`RateLimitState`](crate::RateLimitState) and the dispatcher returns
//! [`ApiOutcome::RateLimited`](crate::ApiOutcome) when the caller declines to wait. The types
//! here cover genuinely exceptional conditions only.

use std::time::Duration;

/// A malformed inbound authority message.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ValidationError {
    /// A required field was absent.
    #[error("{message} message is missing required field `{field}`")]
    MissingField {
        /// Message type being decoded.
        message: &'static str,
        /// Name of the missing field.
        field: &'static str,
    },
    /// The frame could not be decoded at all, or a field had an unusable value.
    #[error("malformed message: {0}")]
    Malformed(String),
}

/// The injected transport failed to produce a response.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("transport failed{}: {message}", status_suffix(.status))]
pub struct TransportError {
    /// HTTP-like status if the failure carried one.
    pub status: Option<u16>,
    /// Human-readable cause.
    pub message: String,
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" with status {s}")).unwrap_or_default()
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { status: None, message: message.into() }
    }

    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self { status: Some(status), message: message.into() }
    }
}

/// Failures talking to a remote authority.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AuthorityError {
    /// The authority cannot be reached. Triggers local fallback when permitted.
    #[error("connection to remote authority lost: {0}")]
    ConnectionLost(String),
    /// The authority (or this client) rejected a malformed message.
    #[error("invalid authority message: {0}")]
    Validation(#[from] ValidationError),
    /// The authority answered with an error of its own.
    #[error("remote authority error: {0}")]
    Remote(String),
}

impl AuthorityError {
    /// Whether this is the distinguished connection-lost signal.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Self::ConnectionLost(_))
    }
}

/// Errors surfaced by [`Api::request`](crate::Api::request).
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ApiError {
    /// The method or url could not be turned into a request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// The transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The authority is unreachable and the request did not allow local fallback.
    #[error("remote authority unavailable and fallback disabled: {0}")]
    AuthorityUnavailable(String),
    /// The authority failed for a reason other than connectivity.
    #[error(transparent)]
    Authority(AuthorityError),
    /// The queue dropped the request before it completed.
    #[error("request queue closed before the request completed")]
    QueueClosed,
}

impl From<AuthorityError> for ApiError {
    fn from(err: AuthorityError) -> Self {
        match err {
            AuthorityError::ConnectionLost(msg) => ApiError::AuthorityUnavailable(msg),
            other => ApiError::Authority(other),
        }
    }
}

/// Invalid client configuration.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    /// The global ceiling must admit at least one request per window.
    #[error("global_rate_limit_max must be > 0")]
    ZeroGlobalMax,
    /// A duration that drives a timer or window was zero.
    #[error("{field} must be > 0 (got {value:?})")]
    ZeroDuration {
        /// Offending setting.
        field: &'static str,
        /// Value provided.
        value: Duration,
    },
    /// The reconnection schedule was rejected.
    #[error("invalid reconnect backoff: {0}")]
    Backoff(#[from] crate::backoff::BackoffError),
}
