//! Backend error types
//!
//! Everything that can go wrong talking to the InfluxDB HTTP API.

use thiserror::Error;

/// Errors returned by a [`Backend`](super::Backend) call
#[derive(Error, Debug)]
pub enum BackendError {
    /// Transport-level failure (DNS, refused connection, TLS, body read)
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The call did not complete before its deadline
    #[error("Request timeout")]
    Timeout,

    /// The server answered with a non-success status
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// The query response could not be decoded
    #[error("Malformed response: {0}")]
    Decode(String),

    /// The query engine reported an error inside a successful response
    #[error("Query error: {0}")]
    Query(String),
}

impl BackendError {
    /// Map a reqwest failure, keeping timeouts distinguishable
    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BackendError::Timeout
        } else {
            BackendError::Request(err)
        }
    }
}

impl From<csv::Error> for BackendError {
    fn from(err: csv::Error) -> Self {
        BackendError::Decode(err.to_string())
    }
}

/// Result type alias for backend operations
pub type BackendResult<T> = Result<T, BackendError>;
