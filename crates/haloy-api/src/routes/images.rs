//! Image archive upload.
//!
//! Accepts a `docker save` tarball as the multipart field `image` and loads
//! it into the runtime, for apps that deploy from locally-built images.

use axum::Json;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use serde::Serialize;
use tracing::info;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    pub message: String,
}

pub async fn upload_image(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("reading multipart body: {e}")))?
    {
        if field.name() != Some("image") {
            continue;
        }
        let archive = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("reading image archive: {e}")))?;
        if archive.is_empty() {
            return Err(ApiError::BadRequest("image archive is empty".into()));
        }
        info!(bytes = archive.len(), "loading uploaded image archive");
        let message = state.runtime.load_image(archive).await?;
        return Ok((
            StatusCode::ACCEPTED,
            Json(UploadResponse {
                success: true,
                message,
            }),
        ));
    }
    Err(ApiError::BadRequest(
        "multipart field 'image' is required".into(),
    ))
}
