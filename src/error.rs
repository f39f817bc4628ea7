//! Route-boundary error type.
//!
//! Every failure becomes a JSON body `{"error": "message"}`:
//! - `BadRequest` → 400
//! - `Unauthorized` → 401
//! - `NotFound` → 404
//! - `Conflict` → 409
//! - `Upstream` → 502 (an ML service failed)
//! - `ServiceUnavailable` → 503 (an ML service is not configured)
//! - `Internal` → 500

use axum::extract::rejection::JsonRejection;
use axum::extract::FromRequest;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::ml::MlError;
use crate::storage::StoreError;

/// `axum::Json` whose rejections (bad syntax, missing fields, wrong
/// content type) come back as a 400 in the `{"error"}` envelope.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    Conflict(String),
    Upstream(String),
    ServiceUnavailable(String),
    Internal(String),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        ApiError::BadRequest(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        ApiError::NotFound(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ApiError::BadRequest(msg)
            | ApiError::Unauthorized(msg)
            | ApiError::NotFound(msg)
            | ApiError::Conflict(msg)
            | ApiError::Upstream(msg)
            | ApiError::ServiceUnavailable(msg)
            | ApiError::Internal(msg) => msg,
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.status().as_u16(), self.message())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = self.message(), "request failed");
        } else {
            tracing::warn!(status = status.as_u16(), error = self.message(), "request rejected");
        }
        let body = axum::Json(json!({ "error": self.message() }));
        (status, body).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::MissingId | StoreError::Validation(_) => ApiError::BadRequest(err.to_string()),
            StoreError::DuplicateId(_) => ApiError::Conflict(err.to_string()),
            StoreError::NotFound(_) => ApiError::NotFound(err.to_string()),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<MlError> for ApiError {
    fn from(err: MlError) -> Self {
        match err {
            MlError::NotConfigured(_) => ApiError::ServiceUnavailable(err.to_string()),
            MlError::Unsupported(_) => ApiError::BadRequest(err.to_string()),
            MlError::Parse(_) | MlError::Http(_) | MlError::Api { .. } | MlError::Io(_) => {
                ApiError::Upstream(err.to_string())
            }
            MlError::Credentials(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        ApiError::Internal(format!("background task failed: {}", err))
    }
}

impl From<bcrypt::BcryptError> for ApiError {
    fn from(err: bcrypt::BcryptError) -> Self {
        ApiError::Internal(format!("password hashing failed: {}", err))
    }
}
