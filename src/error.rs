//! Error types for cdsapi
//!
//! This module provides the single error type used by every public operation:
//! - Configuration errors raised before any request is sent
//! - Transport and HTTP status failures left over after the retry budget
//! - Job-level failures reported by the server (rejection, failure, unknown state)
//! - Download failures (size mismatch, I/O)

use std::time::Duration;
use thiserror::Error;

/// Result type alias for cdsapi operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for cdsapi
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is missing or invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "url")
        key: Option<String>,
    },

    /// The request could not be completed (connection refused, reset, timed out)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The server answered with a non-success status that the caller cannot recover from
    #[error("HTTP {status} from {url}: {message}")]
    Http {
        /// HTTP status code
        status: u16,
        /// URL of the failed request
        url: String,
        /// Response body or reason phrase
        message: String,
    },

    /// The server refused the submission with a structured error body
    #[error("{0}")]
    Rejected(String),

    /// The job reached the `failed` state
    #[error("{message}. {reason}.")]
    JobFailed {
        /// Error message reported by the server
        message: String,
        /// Reason reported by the server
        reason: String,
    },

    /// The server reported a job state this client does not know
    #[error("Unknown API state [{0}]")]
    UnknownState(String),

    /// A reply was missing fields required by its state
    #[error("malformed reply: {0}")]
    Protocol(String),

    /// The job did not finish within the configured wait timeout
    #[error("timed out after {0:?} waiting for the request to complete")]
    Timeout(Duration),

    /// The download ended with a byte count different from the advertised size
    #[error("Download failed: downloaded {received} byte(s) out of {expected}")]
    Incomplete {
        /// Bytes written to the destination
        received: u64,
        /// Bytes announced by the server
        expected: u64,
    },

    /// A caller-supplied argument is unusable
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation is not offered by this client implementation
    #[error("not supported: {0}")]
    NotSupported(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A URL could not be parsed or joined
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

impl Error {
    /// Build a configuration error for a given key
    pub fn config(message: impl Into<String>, key: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Check if this error was produced by the server reporting a failed job
    pub fn is_job_failure(&self) -> bool {
        matches!(self, Self::JobFailed { .. })
    }

    /// HTTP status carried by this error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
