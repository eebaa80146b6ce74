//! Deploy admission.
//!
//! Validation happens synchronously so config mistakes come back as plain
//! 400s; everything after admission runs in a detached engine task and is
//! reported through the deployment's log stream.

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use haloy_core::config::AppConfig;
use haloy_core::id::DeploymentId;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct DeployRequest {
    pub app: AppConfig,
    /// Accepted for CLI compatibility; the server only speaks normalized
    /// JSON.
    #[serde(default)]
    pub config_format: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployResponse {
    pub deployment_id: DeploymentId,
}

pub async fn deploy(
    State(state): State<AppState>,
    payload: Result<Json<DeployRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<DeployResponse>), ApiError> {
    let Json(request) = payload.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;

    // Reject bad configs before admitting anything.
    let config = request.app.normalize(state.config.history_keep)?;

    let deployment_id = state.ids.next();
    let engine = state.engine.clone();
    let task_id = deployment_id.clone();
    state.dispatch(deployment_id.clone(), async move {
        engine.deploy(task_id, config).await
    });

    Ok((StatusCode::ACCEPTED, Json(DeployResponse { deployment_id })))
}
