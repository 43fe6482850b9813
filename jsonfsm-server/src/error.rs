//! Server error types.

use hyper::StatusCode;
use jsonfsm_core::CoreError;
use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Core(#[from] CoreError),

    #[error("invalid request body: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("no route for {0}")]
    NotFound(String),

    #[error("method {method} not allowed on {path}")]
    MethodNotAllowed { method: String, path: String },
}

impl ServerError {
    /// Stable code reported in error payloads and metric labels.
    pub fn error_code(&self) -> &'static str {
        match self {
            ServerError::Core(e) => e.error_code(),
            ServerError::Json(_) | ServerError::BadRequest(_) | ServerError::PayloadTooLarge { .. } => {
                "BAD_REQUEST"
            }
            ServerError::NotFound(_) => "NOT_FOUND",
            ServerError::MethodNotAllowed { .. } => "METHOD_NOT_ALLOWED",
            ServerError::Io(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status reported to the event submitter.
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::Core(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            ServerError::Core(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServerError::Json(_) | ServerError::BadRequest(_) | ServerError::PayloadTooLarge { .. } => {
                StatusCode::BAD_REQUEST
            }
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            ServerError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
