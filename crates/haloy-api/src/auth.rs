//! Bearer-token authentication.
//!
//! Every route except `/health` passes through this middleware. The token
//! is checked before any body is read or decoded.

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::ApiError;
use crate::state::AppState;

pub async fn require_bearer(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let authorized = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .is_some_and(|token| token == state.config.api_token);

    if !authorized {
        return ApiError::Unauthorized("missing or invalid bearer token".into()).into_response();
    }
    next.run(request).await
}
