use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthorized,
    Forbidden,
    NotFound,
    Validation,
    RateLimited,
    Internal,
    Unavailable,
    Unknown,
}

impl ErrorCode {
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => ErrorCode::Unauthorized,
            403 => ErrorCode::Forbidden,
            404 => ErrorCode::NotFound,
            400 | 422 => ErrorCode::Validation,
            429 => ErrorCode::RateLimited,
            502..=504 => ErrorCode::Unavailable,
            500..=599 => ErrorCode::Internal,
            _ => ErrorCode::Unknown,
        }
    }
}

/// Error body returned by the API. FastAPI-style `{"detail": ...}` bodies
/// carry either a string or a list of validation entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct DetailBody {
    detail: serde_json::Value,
}

impl ApiError {
    pub fn from_response(status: u16, body: &str) -> Self {
        let code = ErrorCode::from_status(status);
        let message = match serde_json::from_str::<DetailBody>(body) {
            Ok(DetailBody {
                detail: serde_json::Value::String(detail),
            }) => detail,
            Ok(DetailBody { detail }) => detail.to_string(),
            Err(_) if body.trim().is_empty() => format!("HTTP {status}"),
            Err(_) => body.trim().chars().take(200).collect(),
        };
        Self { code, message }
    }
}

#[derive(Debug, Error)]
#[error("{code:?}: {message}")]
pub struct ApiException {
    pub code: ErrorCode,
    pub message: String,
}

impl From<ApiError> for ApiException {
    fn from(value: ApiError) -> Self {
        Self {
            code: value.code,
            message: value.message,
        }
    }
}
