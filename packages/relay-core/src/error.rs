//! Centralized error types for the ICY relay core library.
//!
//! Errors fall into two scopes:
//! - **Subscribe-time** errors ([`RelayError::UnknownSource`],
//!   [`RelayError::Cancelled`], and protocol/transport failures raised before a
//!   session exists) are delivered only to the caller that asked.
//! - **Session** errors ([`RelayError::MalformedStream`] and transport failures
//!   after the session went live) are terminal for the session and are
//!   delivered to every subscriber that was attached when it faulted.
//!
//! `RelayError` is `Clone` because a single fault fans out to many subscribers.

use serde::Serialize;
use thiserror::Error;

/// Trait for error types that provide machine-readable error codes.
///
/// Implement this trait to provide consistent error codes across different
/// error conversion paths (logs, sinks, the server binary).
pub trait ErrorCode {
    /// Returns a machine-readable error code.
    fn code(&self) -> &'static str;
}

/// Application-wide error type for the relay.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum RelayError {
    /// Upstream response lacks a usable `icy-metaint` header.
    ///
    /// Raised before a session is created; no background work is started.
    #[error("Protocol not supported: {0}")]
    ProtocolNotSupported(String),

    /// The interleaved stream violated the framing or text format, or ended
    /// in the middle of a metadata block.
    #[error("Malformed stream: {0}")]
    MalformedStream(String),

    /// Transport-level failure opening or reading the upstream connection.
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The source id does not resolve to a stream URL.
    #[error("Unknown source: {0}")]
    UnknownSource(String),

    /// The caller cancelled its own pending subscribe request.
    #[error("Subscribe request cancelled")]
    Cancelled,

    /// The relay worker has stopped accepting requests.
    #[error("Relay stopped")]
    RelayStopped,

    /// Relay configuration is invalid.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl RelayError {
    /// Returns `true` for errors that terminate a live session.
    #[must_use]
    pub fn is_session_fault(&self) -> bool {
        matches!(
            self,
            Self::MalformedStream(_) | Self::UpstreamUnavailable(_)
        )
    }
}

impl ErrorCode for RelayError {
    fn code(&self) -> &'static str {
        match self {
            Self::ProtocolNotSupported(_) => "protocol_not_supported",
            Self::MalformedStream(_) => "malformed_stream",
            Self::UpstreamUnavailable(_) => "upstream_unavailable",
            Self::UnknownSource(_) => "unknown_source",
            Self::Cancelled => "cancelled",
            Self::RelayStopped => "relay_stopped",
            Self::Configuration(_) => "configuration_error",
        }
    }
}

/// Convenient Result alias for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;
