#![forbid(unsafe_code)]

//! HTTP error taxonomy and the failure envelope.

use std::sync::atomic::{AtomicBool, Ordering};

use axum::{
    Json,
    extract::rejection::JsonRejection,
    extract::multipart::{MultipartError, MultipartRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

static DEBUG_ERRORS: AtomicBool = AtomicBool::new(false);

/// Exposes internal error chains in responses. Off unless `DEBUG_ERRORS` is set.
pub fn set_debug_errors(enabled: bool) {
    DEBUG_ERRORS.store(enabled, Ordering::Relaxed);
}

/// Raised by the store when a joined document that must exist does not.
#[derive(Debug, Error)]
#[error("integrity violation: {0}")]
pub struct IntegrityError(pub String);

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("internal server error")]
    Internal(#[source] anyhow::Error),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(rejection: MultipartRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        Self::BadRequest(format!("invalid multipart body: {}", err.body_text()))
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorEnvelope {
    status_code: u16,
    message: String,
    success: bool,
    errors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stack: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (message, stack) = match &self {
            Self::Internal(err) => {
                let integrity = err.downcast_ref::<IntegrityError>().is_some();
                tracing::error!(error = ?err, integrity, "request failed");
                let stack = DEBUG_ERRORS
                    .load(Ordering::Relaxed)
                    .then(|| format!("{err:?}"));
                ("Something went wrong".to_string(), stack)
            }
            other => (other.to_string(), None),
        };

        let body = ErrorEnvelope {
            status_code: status.as_u16(),
            message,
            success: false,
            errors: Vec::new(),
            stack,
        };
        (status, Json(body)).into_response()
    }
}
