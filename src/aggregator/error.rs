//! Fetch error types

use thiserror::Error;

/// Errors from one fetch against the backend
///
/// A failed fetch leaves the previous snapshot in place; the scheduler
/// retries on its next tick.
#[derive(Error, Debug)]
pub enum FetchError {
    /// No answer within the allotted time
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Backend not reachable
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// Transport-level failure
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Non-success HTTP status
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    /// Unexpected response body
    #[error("Invalid response from {url}: {message}")]
    Decode { url: String, message: String },

    /// Entity or history does not exist
    #[error("Not found: {0}")]
    NotFound(String),
}

impl FetchError {
    pub fn decode(url: impl Into<String>, message: impl Into<String>) -> Self {
        FetchError::Decode {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Map a reqwest error the way every backend call does
    pub(crate) fn from_reqwest(url: &str, e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout(url.to_string())
        } else if e.is_connect() {
            FetchError::Unavailable(url.to_string())
        } else {
            FetchError::Request(e)
        }
    }
}
