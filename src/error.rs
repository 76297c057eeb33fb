//! Common error types for the vision-language serving layer

use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::BytesRejection,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::preprocess::decoder::DecodeError;

/// Message returned for every rejected `X-Moondream-Auth` check.
pub const AUTH_ERROR_MESSAGE: &str = "Invalid or missing API key";

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Missing parameters or a body that is not the expected JSON.
    #[error("{0}")]
    InvalidRequest(String),

    /// The uploaded image could not be turned into a bitmap.
    #[error(transparent)]
    InvalidImage(#[from] DecodeError),

    #[error("{}", AUTH_ERROR_MESSAGE)]
    AuthenticationFailed,

    /// Request body larger than `server.max_body_bytes`.
    #[error("{0}")]
    PayloadTooLarge(String),

    /// Load shedding: the preprocessing queue is full or the gate wait expired.
    #[error("{0}")]
    Overloaded(String),

    /// Any failure raised by the model capability.
    #[error("{0}")]
    Inference(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidRequest(_) | AppError::InvalidImage(_) => StatusCode::BAD_REQUEST,
            AppError::AuthenticationFailed => StatusCode::UNAUTHORIZED,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Overloaded(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Config(_)
            | AppError::Io(_)
            | AppError::Inference(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// True for errors caused by the caller rather than the server.
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

/// Error response body: `{"error": "<message>"}`
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(ErrorResponse {
            error: self.to_string(),
        });

        (status, body).into_response()
    }
}

impl From<BytesRejection> for AppError {
    fn from(rejection: BytesRejection) -> Self {
        rejection_error(rejection.status(), rejection.body_text())
    }
}

impl From<MultipartRejection> for AppError {
    fn from(rejection: MultipartRejection) -> Self {
        rejection_error(rejection.status(), rejection.body_text())
    }
}

impl From<MultipartError> for AppError {
    fn from(e: MultipartError) -> Self {
        rejection_error(e.status(), format!("Invalid multipart body: {}", e.body_text()))
    }
}

/// Extractor rejections keep their status but get the JSON error body.
fn rejection_error(status: StatusCode, message: String) -> AppError {
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge(message)
    } else {
        AppError::InvalidRequest(message)
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;
