use crate::services::slide_service::SlideStoreError;
use axum::{
    Json,
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

impl From<SlideStoreError> for AppError {
    fn from(err: SlideStoreError) -> Self {
        let status = match &err {
            SlideStoreError::InvalidUploadId(_)
            | SlideStoreError::InvalidChunkCount(_)
            | SlideStoreError::ChunkIndexOutOfRange { .. }
            | SlideStoreError::UnsupportedFileType(_)
            | SlideStoreError::InvalidStoragePath => StatusCode::BAD_REQUEST,
            SlideStoreError::SlideNotFound(_) | SlideStoreError::ArtifactNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            SlideStoreError::UploadAlreadyCompleted(_) => StatusCode::CONFLICT,
            SlideStoreError::MissingChunk { .. }
            | SlideStoreError::Sqlx(_)
            | SlideStoreError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        AppError::new(status, err.to_string())
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        AppError::bad_request(format!("invalid multipart request: {}", err))
    }
}
