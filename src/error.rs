//! Error types for the courier-link SDK.

use thiserror::Error;

/// Errors surfaced by the tracking SDK.
#[derive(Error, Debug)]
pub enum CourierLinkError {
    /// Transport-level failure on the realtime channel.
    #[error("Transport error: {0}")]
    Transport(String),

    /// An operation did not complete within its deadline.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The server rejected the handshake credential.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// An inbound frame could not be decoded.
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// An HTTP order fetch failed.
    #[error("Fetch failed: {0}")]
    Fetch(String),

    /// No credential was available where one is required.
    #[error("Missing credential: {0}")]
    CredentialMissing(String),

    /// Invalid client configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// JSON serialization or deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A tracking session for this order already exists.
    #[error("Order {0} is already being tracked")]
    AlreadyTracking(String),

    /// Unexpected internal failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<reqwest::Error> for CourierLinkError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CourierLinkError::Timeout(err.to_string())
        } else {
            CourierLinkError::Fetch(err.to_string())
        }
    }
}

/// Result type for courier-link operations.
pub type Result<T> = std::result::Result<T, CourierLinkError>;
