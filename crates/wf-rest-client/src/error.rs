//! Error types for the REST API client

use reqwest::StatusCode;
use thiserror::Error;

/// Errors that can occur when using the REST API client
#[derive(Debug, Error)]
pub enum RestClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),

    #[error("base URL cannot carry path segments: {0}")]
    InvalidBaseUrl(String),

    #[error("invalid client configuration: {0}")]
    InvalidConfig(#[from] validator::ValidationErrors),

    #[error("Server returned error status {status}: {body}")]
    ServerError { status: StatusCode, body: String },

    #[error("Server rejected the request: {0}")]
    Rejected(String),

    #[error("no session has been established")]
    NoSession,
}

/// Result type alias for REST client operations
pub type RestClientResult<T> = Result<T, RestClientError>;
