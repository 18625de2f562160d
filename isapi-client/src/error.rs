//! Error types for the ISAPI client

use thiserror::Error;

/// Errors that can occur while talking to the device
#[derive(Debug, Error)]
pub enum IsapiError {
    /// Network or HTTP communication error
    #[error("Network/HTTP error: {0}")]
    Network(String),

    /// The device rejected the credentials
    #[error("Device rejected the credentials (HTTP 401)")]
    Unauthorized,

    /// The device's digest challenge could not be answered
    #[error("Digest authentication failed: {0}")]
    Auth(String),

    /// Any other non-2xx answer
    #[error("Device answered HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// XML or JSON in a response could not be understood
    #[error("Response parsing error: {0}")]
    Parse(String),

    /// The device does not offer the requested feature
    #[error("Device does not support {0}")]
    Unsupported(String),
}

impl From<reqwest::Error> for IsapiError {
    fn from(error: reqwest::Error) -> Self {
        IsapiError::Network(error.to_string())
    }
}
