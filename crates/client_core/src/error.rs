use shared::error::{ApiError, ErrorCode};
use thiserror::Error;

/// Why a single query could not produce data. Cloned into every
/// [`FetchState`](crate::query::FetchState) that observes the failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("not authorized ({status}): {message}")]
    Authorization { status: u16, message: String },
    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },
    #[error("request rejected ({status}): {message}")]
    Request { status: u16, message: String },
    #[error("malformed payload: {0}")]
    DataShape(String),
}

impl FetchError {
    pub fn from_response(status: u16, body: &str) -> Self {
        let ApiError { code, message } = ApiError::from_response(status, body);
        match code {
            ErrorCode::Unauthorized | ErrorCode::Forbidden => {
                FetchError::Authorization { status, message }
            }
            ErrorCode::Internal | ErrorCode::Unavailable => FetchError::Server { status, message },
            _ if status >= 500 => FetchError::Server { status, message },
            _ => FetchError::Request { status, message },
        }
    }

    /// Transport and 5xx failures may succeed on another attempt; the rest
    /// would fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Transport(_) | FetchError::Server { .. })
    }

    pub fn requires_reauth(&self) -> bool {
        matches!(self, FetchError::Authorization { .. })
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            FetchError::DataShape(err.to_string())
        } else {
            FetchError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::DataShape(err.to_string())
    }
}
