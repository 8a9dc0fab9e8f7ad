//! Upstream failure taxonomy
//!
//! - `ConnectFailed`, `BadStatus`, `ReadFailed`: end the session, surfaced to
//!   the consumer as one error frame
//! - `DecodeFailed`: one malformed line, logged and skipped

use thiserror::Error;

/// Errors produced while calling or reading the upstream generation service
#[derive(Error, Debug, Clone, PartialEq)]
pub enum UpstreamError {
    /// Transport-level failure before a response arrived
    #[error("failed to connect to upstream: {0}")]
    ConnectFailed(String),

    /// Upstream answered with a non-success status
    #[error("upstream returned status {code}: {body}")]
    BadStatus { code: u16, body: String },

    /// A data line could not be parsed
    #[error("malformed stream event ({reason}): {line}")]
    DecodeFailed { line: String, reason: String },

    /// Reading the response body failed mid-stream
    #[error("failed reading upstream stream: {0}")]
    ReadFailed(String),
}

impl UpstreamError {
    /// Text delivered to the consumer in the error frame
    pub fn user_message(&self) -> String {
        format!("Sorry, the service encountered an error: {self}")
    }

    /// Whether the session can continue after this error
    pub fn is_recoverable(&self) -> bool {
        matches!(self, UpstreamError::DecodeFailed { .. })
    }

    /// Get the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            UpstreamError::ConnectFailed(_) => "connect",
            UpstreamError::BadStatus { .. } => "status",
            UpstreamError::DecodeFailed { .. } => "decode",
            UpstreamError::ReadFailed(_) => "read",
        }
    }
}
