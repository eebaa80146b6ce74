//! API error handling.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// API error type.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<haloy_core::Error> for ApiError {
    fn from(err: haloy_core::Error) -> Self {
        match err {
            haloy_core::Error::Validation(msg) => ApiError::BadRequest(msg),
            haloy_core::Error::Auth(msg) => ApiError::Unauthorized(msg),
            haloy_core::Error::NotFound(msg) => ApiError::NotFound(msg),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<haloy_store::StoreError> for ApiError {
    fn from(err: haloy_store::StoreError) -> Self {
        ApiError::from(haloy_core::Error::from(err))
    }
}

impl From<haloy_vault::VaultError> for ApiError {
    fn from(err: haloy_vault::VaultError) -> Self {
        ApiError::from(haloy_core::Error::from(err))
    }
}
