//! Error types for webhook delivery

use thiserror::Error;

/// Result type for webhook operations
pub type Result<T> = std::result::Result<T, Error>;

/// Webhook errors
#[derive(Error, Debug)]
pub enum Error {
    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Timeout
    #[error("Timeout after {seconds}s: {operation}")]
    Timeout {
        /// Timeout duration
        seconds: u64,
        /// Operation
        operation: String,
    },

    /// Endpoint is not usable
    #[error("Invalid endpoint {url}: {reason}")]
    InvalidEndpoint {
        /// Endpoint URL
        url: String,
        /// Reason
        reason: String,
    },

    /// Signing secret unusable
    #[error("Invalid signing secret: {0}")]
    InvalidSecret(String),

    /// Delivery already finished
    #[error("Delivery {0} is not pending")]
    NotPending(uuid::Uuid),

    /// HTTP client error
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
