//! Error types surfaced by the request layer.

use bytes::Bytes;
use reqwest::StatusCode;
use thiserror::Error;

use crate::message::extract_error_message;

/// Crate-specific result type.
pub type Result<T> = std::result::Result<T, ApiError>;

/// Failures below HTTP semantics: nothing usable came back from the server.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP request failed: {source}")]
    Http {
        #[from]
        source: reqwest::Error,
    },

    #[error("request timed out")]
    Timeout,

    #[error("invalid request path `{path}`: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("invalid header value for `{name}`")]
    InvalidHeader { name: &'static str },

    #[error("connection failed: {reason}")]
    Connection { reason: String },
}

impl TransportError {
    pub fn connection(reason: impl Into<String>) -> Self {
        Self::Connection {
            reason: reason.into(),
        }
    }

    /// Whether the request may not have reached the server at all.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout => true,
            Self::Http { source } => source.is_timeout(),
            _ => false,
        }
    }
}

/// Errors returned to callers of [`crate::ApiClient`].
#[derive(Debug, Error)]
pub enum ApiError {
    /// Transport failure, no response.
    #[error("network error: {source}")]
    Network {
        #[from]
        source: TransportError,
    },

    /// Any non-success response other than a session-expiry 401.
    #[error("{message} (HTTP {status})")]
    Server {
        status: StatusCode,
        body: Bytes,
        message: String,
    },

    /// Terminal: renewal failed or the renewed credential was rejected.
    #[error("session expired, please log in again")]
    SessionExpired,

    /// The client was shut down while the request waited for renewal.
    #[error("request cancelled: client is shutting down")]
    Cancelled,

    #[error("failed to decode response body: {reason}")]
    Decode { reason: String },

    #[error("failed to encode request body: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ApiError {
    /// Build a [`ApiError::Server`] with a message derived from the body.
    pub fn server(status: StatusCode, body: Bytes) -> Self {
        let message = extract_error_message(Some(status), &body);
        Self::Server {
            status,
            body,
            message,
        }
    }

    pub fn decode(reason: impl Into<String>) -> Self {
        Self::Decode {
            reason: reason.into(),
        }
    }

    /// HTTP status, if the server answered.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Server { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Human-readable message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            Self::Server { message, .. } => message.clone(),
            Self::Network { .. } => extract_error_message(None, &[]),
            other => other.to_string(),
        }
    }

    #[inline]
    pub fn is_session_expired(&self) -> bool {
        matches!(self, Self::SessionExpired)
    }
}

/// Errors from the renewal procedure.
#[derive(Debug, Error)]
pub enum RenewalError {
    /// Missing refresh token - re-login required.
    #[error("missing refresh token - re-login required")]
    MissingRefreshToken,

    #[error("renewal request failed: {0}")]
    Transport(#[from] TransportError),

    #[error("renewal rejected with HTTP {status}")]
    Rejected { status: StatusCode },

    #[error("malformed renewal response: {reason}")]
    MalformedResponse { reason: String },

    /// The renewal task died before producing a result.
    #[error("renewal task aborted: {reason}")]
    Aborted { reason: String },
}

impl RenewalError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedResponse {
            reason: reason.into(),
        }
    }

    /// Check if this error requires manual re-login.
    pub fn requires_relogin(&self) -> bool {
        match self {
            Self::MissingRefreshToken => true,
            Self::Rejected { status } => {
                *status == StatusCode::UNAUTHORIZED || *status == StatusCode::FORBIDDEN
            }
            _ => false,
        }
    }

    /// Check if this error is transient (the refresh token may still be good).
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Rejected { status } => status.is_server_error(),
            _ => false,
        }
    }
}

/// Invalid client configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid base URL `{input}`: {reason}")]
    InvalidBaseUrl { input: String, reason: String },

    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },

    #[error("failed to build HTTP client: {source}")]
    Client {
        #[from]
        source: reqwest::Error,
    },
}

impl ConfigError {
    pub fn invalid_value(key: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            key,
            reason: reason.into(),
        }
    }
}
