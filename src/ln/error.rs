use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures talking to the remote wallet node
#[derive(Debug, Error)]
pub enum Error {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("node returned {status}: {message}")]
    StatusCode { status: StatusCode, message: String },
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Url(#[from] url::ParseError),
    #[error("{0}")]
    Custom(String),
}

/// Error body returned by the node's REST gateway
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ErrorResponse {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

impl ErrorResponse {
    pub fn into_error(self, status: StatusCode) -> Error {
        Error::StatusCode {
            status,
            message: self.message,
        }
    }
}
