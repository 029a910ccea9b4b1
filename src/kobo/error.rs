//! Transport-level errors for the KoboToolbox API client.
//!
//! [`TransportError`] is the only error the client adapter returns: network
//! failures, non-2xx responses and undecodable bodies are all folded into it so
//! callers can decide whether a given status is expected or fatal.

use thiserror::Error;

/// Failure raised while talking to the KoboToolbox server.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The server answered with a non-2xx status.
    /// `body` holds the response text (possibly empty).
    #[error("server returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// The response arrived but did not match the expected schema.
    #[error("unexpected response from {url}: {message}")]
    Decode { url: String, message: String },

    /// Network failure below HTTP (DNS, TLS, connection refused, timeout).
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl TransportError {
    /// HTTP status code, when the server produced one.
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            TransportError::Network(err) => err.status().map(|s| s.as_u16()),
            TransportError::Decode { .. } => None,
        }
    }
}
