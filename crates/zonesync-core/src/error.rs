//! Error types for zonesync
//!
//! This module defines all error types used throughout the crate.

use std::time::Duration;

use thiserror::Error;

use crate::engine::ApplyReport;

/// Result type alias for zonesync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for zonesync
#[derive(Error, Debug)]
pub enum Error {
    /// A record/feature combination the managed service cannot express.
    ///
    /// Fatal and never retried; reported against the offending record.
    #[error("{record}: unsupported {feature}")]
    Validation {
        /// Fully qualified record name and type, e.g. `www.example.com. A`
        record: String,
        /// The feature that cannot be represented
        feature: String,
    },

    /// The remote signalled rate exhaustion
    #[error("Rate limited (period hint: {period:?})")]
    RateLimited {
        /// Replenishment period reported by the remote, if any
        period: Option<Duration>,
    },

    /// Any other non-success response from the remote API
    #[error("API error {status}: {body}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Raw response body, kept for diagnostics
        body: String,
    },

    /// A zone's change set stopped part way through
    #[error("{}", .0.summary())]
    PartialApply(Box<ApplyReport>),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport-level errors (connection, TLS, timeout)
    #[error("HTTP error: {0}")]
    Http(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a validation error for a record
    pub fn validation(record: impl Into<String>, feature: impl Into<String>) -> Self {
        Self::Validation {
            record: record.into(),
            feature: feature.into(),
        }
    }

    /// Create a rate limit error
    pub fn rate_limited(period: Option<Duration>) -> Self {
        Self::RateLimited { period }
    }

    /// Create an API error carrying the remote body
    pub fn api(status: u16, body: impl Into<String>) -> Self {
        Self::Api {
            status,
            body: body.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an HTTP transport error
    pub fn http(msg: impl Into<String>) -> Self {
        Self::Http(msg.into())
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Whether the retry policy may try this operation again
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Whether this is an API error with the given status
    pub fn is_status(&self, code: u16) -> bool {
        matches!(self, Self::Api { status, .. } if *status == code)
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
