/*
[INPUT]:  Error sources (transport, frame decoding, auth, request lifecycle)
[OUTPUT]: Structured error types with context and retry hints
[POS]:    Error handling layer - unified error types for entire crate
[UPDATE]: When adding new error sources or improving error messages
*/

use std::time::Duration;

use thiserror::Error;

/// Main error type for the PocketOption adapter
#[derive(Error, Debug)]
pub enum PocketOptionError {
    /// Socket-level failure, triggers the reconnect loop
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed inbound frame; the frame is dropped, the connection survives
    #[error("failed to decode frame: {0}")]
    Decode(String),

    /// The venue rejected the session, no further reconnect attempts are made
    #[error("session not authorized: {0}")]
    AuthRejected(String),

    /// The venue rejected a specific request (order refused, bad parameters)
    #[error("request rejected by venue: {0}")]
    Rejected(String),

    /// No reply arrived for a correlated request before its deadline
    #[error("request `{key}` timed out after {deadline:?}")]
    RequestTimeout { key: String, deadline: Duration },

    /// A correlation key was reused while a request was still in flight
    #[error("request id `{0}` is already in flight")]
    DuplicateRequestId(String),

    /// The connection dropped while a request was outstanding
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// Server time requested before any server timestamp was observed
    #[error("server clock not yet synchronized")]
    Unsynchronized,

    /// Operation requires an open connection
    #[error("not connected")]
    NotConnected,

    /// The client was explicitly closed
    #[error("client closed")]
    Closed,

    /// Serialization/deserialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Endpoint URL parsing failed
    #[error("invalid endpoint URL: {0}")]
    UrlParse(#[from] url::ParseError),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl PocketOptionError {
    /// Check if the error is recoverable by reconnecting and resubmitting
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PocketOptionError::Transport(_)
                | PocketOptionError::ConnectionLost(_)
                | PocketOptionError::RequestTimeout { .. }
                | PocketOptionError::NotConnected
        )
    }

    /// Check if the error means the session itself is invalid
    pub fn is_auth_error(&self) -> bool {
        matches!(self, PocketOptionError::AuthRejected(_))
    }

    /// Check if the error is scoped to a single request (connection survives)
    pub fn is_request_scoped(&self) -> bool {
        matches!(
            self,
            PocketOptionError::RequestTimeout { .. }
                | PocketOptionError::DuplicateRequestId(_)
                | PocketOptionError::Rejected(_)
        )
    }

    /// Wrap a transport-layer error
    pub fn transport(err: impl std::fmt::Display) -> Self {
        PocketOptionError::Transport(err.to_string())
    }

    /// Wrap a frame-decoding failure
    pub fn decode(msg: impl Into<String>) -> Self {
        PocketOptionError::Decode(msg.into())
    }
}

/// Result type alias for adapter operations
pub type Result<T> = std::result::Result<T, PocketOptionError>;
