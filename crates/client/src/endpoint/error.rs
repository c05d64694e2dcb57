//! Answer endpoint error types.

use std::sync::Arc;

/// Longest slice of a failed response body kept in error details.
pub const MAX_DETAILS_CHARS: usize = 200;

/// Errors from the remote answer endpoint.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EndpointError {
    /// Invalid question or prompt.
    #[error("invalid prompt: {0}")]
    InvalidPrompt(String),

    /// The configured endpoint URL does not parse.
    #[error("invalid endpoint url: {0}")]
    InvalidUrl(String),

    /// Request timeout, in milliseconds.
    #[error("request timeout after {0}ms")]
    Timeout(u64),

    /// Non-2xx HTTP response.
    #[error("HTTP error {status}: {details}")]
    Http { status: u16, details: String },

    /// Network error.
    #[error("network error: {0}")]
    Network(Arc<reqwest::Error>),

    /// Response parse error.
    #[error("parse error: {0}")]
    Parse(String),
}

impl EndpointError {
    /// Build an [`EndpointError::Http`] keeping at most [`MAX_DETAILS_CHARS`] of the body.
    pub fn http(status: u16, body: &str) -> Self {
        EndpointError::Http { status, details: truncate_chars(body, MAX_DETAILS_CHARS) }
    }
}

impl EndpointError {
    /// Classify a transport error, reporting timeouts with the configured budget.
    pub fn from_transport(err: reqwest::Error, timeout_ms: u64) -> Self {
        if err.is_timeout() { EndpointError::Timeout(timeout_ms) } else { EndpointError::Network(Arc::new(err)) }
    }
}

impl From<EndpointError> for recall_core::Error {
    fn from(err: EndpointError) -> Self {
        use recall_core::Error;

        match err {
            EndpointError::InvalidPrompt(msg) => Error::InvalidInput(msg),
            EndpointError::InvalidUrl(msg) => Error::InvalidInput(format!("endpoint url: {msg}")),
            EndpointError::Timeout(ms) => Error::Timeout(ms),
            EndpointError::Http { status, details } => Error::Endpoint { status, details },
            EndpointError::Network(e) => Error::Network(e.to_string()),
            EndpointError::Parse(msg) => Error::Parse(msg),
        }
    }
}

/// Truncate to `max` characters without splitting a UTF-8 sequence.
pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
