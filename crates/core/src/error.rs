//! Unified error types for recall.
//!
//! Every variant renders with a stable code prefix so callers (and the MCP
//! surface) can match on the message without parsing prose.

use rmcp::model::{ErrorCode, ErrorData as McpError};
use tokio_rusqlite::rusqlite;

/// HTTP statuses that indicate a transient endpoint failure.
const RETRYABLE_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Unified error types for the recall pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The cache was used before its schema was established.
    #[error("NOT_INITIALIZED: cache store has not been opened")]
    NotInitialized,

    /// Database operation failed.
    #[error("CACHE_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("CACHE_ERROR: migration failed: {0}")]
    MigrationFailed(String),

    /// The remote call exceeded its timeout.
    #[error("TIMEOUT: request timed out after {0}ms")]
    Timeout(u64),

    /// The remote endpoint answered with a non-2xx status.
    #[error("ENDPOINT_ERROR: status {status}: {details}")]
    Endpoint { status: u16, details: String },

    /// A 2xx response whose body could not be turned into an answer.
    #[error("PARSE_ERROR: {0}")]
    Parse(String),

    /// Transport-level failure (connect, TLS, body read).
    #[error("NETWORK_ERROR: {0}")]
    Network(String),

    /// Quota denial from the limiter.
    #[error("RATE_LIMITED: {reason} (retry after {retry_after_ms}ms)")]
    RateLimitExceeded { reason: String, retry_after_ms: u64 },

    /// Invalid input parameters (e.g., empty question).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// The delivery queue worker is gone and can no longer settle requests.
    #[error("QUEUE_CLOSED: delivery queue is not accepting requests")]
    QueueClosed,
}

impl Error {
    /// Whether a failed dispatch should be attempted again.
    ///
    /// Timeouts and overload/server statuses are transient. Everything else,
    /// including kinds this classifier does not know about, fails fast.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Timeout(_) => true,
            Error::Endpoint { status, .. } => RETRYABLE_STATUSES.contains(status),
            Error::NotInitialized
            | Error::Database(_)
            | Error::MigrationFailed(_)
            | Error::Parse(_)
            | Error::Network(_)
            | Error::RateLimitExceeded { .. }
            | Error::InvalidInput(_)
            | Error::QueueClosed => false,
        }
    }
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}

impl From<Error> for McpError {
    fn from(err: Error) -> Self {
        let code = match &err {
            Error::InvalidInput(_) => -32602,
            Error::NotInitialized | Error::Database(_) | Error::MigrationFailed(_) => -32002,
            Error::QueueClosed => -32003,
            Error::Timeout(_) => -32006,
            Error::Endpoint { .. } | Error::Network(_) => -32008,
            Error::Parse(_) => -32000,
            Error::RateLimitExceeded { .. } => -32010,
        };

        McpError { code: ErrorCode(code), message: err.to_string().into(), data: None }
    }
}
