//! Error types for chatrelay

use thiserror::Error;

/// Main error type for chatrelay operations
#[derive(Error, Debug)]
pub enum RelayError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP server errors (bind, serve)
    #[error("Server error: {0}")]
    Server(String),

    /// Upstream generation service errors
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Certificate ledger errors
    #[error("Ledger error: {0}")]
    Ledger(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<crate::relay::UpstreamError> for RelayError {
    fn from(e: crate::relay::UpstreamError) -> Self {
        RelayError::Upstream(e.to_string())
    }
}

impl From<crate::ledger::LedgerError> for RelayError {
    fn from(e: crate::ledger::LedgerError) -> Self {
        RelayError::Ledger(e.to_string())
    }
}

/// Result type alias for chatrelay operations
pub type Result<T> = std::result::Result<T, RelayError>;
