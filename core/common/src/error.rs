//! Common error types for drivelink.

use thiserror::Error;

/// HTTP statuses that are worth retrying with backoff.
pub const RETRYABLE_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Top-level error type for drivelink operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Connect, read, timeout or protocol failure below HTTP.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The remote service answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Http {
        /// Status code of the final response.
        status: u16,
        /// Response body (or extracted Graph error detail).
        body: String,
    },

    /// Credential acquisition failed.
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The remote side broke the expected exchange (e.g. an upload
    /// session that never reported completion).
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// Missing or malformed configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build an HTTP error from a status and body.
    pub fn http(status: u16, body: impl Into<String>) -> Self {
        Self::Http {
            status,
            body: body.into(),
        }
    }

    /// Status code carried by this error, if it came from an HTTP response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether retrying the same request could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Http { status, .. } => RETRYABLE_STATUSES.contains(status),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
