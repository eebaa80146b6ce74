//! Rollback admission and target listing.

use axum::Json;
use axum::extract::{Path, State};
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use haloy_core::deployment::RollbackTarget;
use haloy_core::id::DeploymentId;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackTargetsResponse {
    pub targets: Vec<RollbackTarget>,
}

pub async fn rollback_targets(
    State(state): State<AppState>,
    Path(app_name): Path<String>,
) -> Result<Json<RollbackTargetsResponse>, ApiError> {
    let targets = state.engine.rollback_targets(&app_name).await?;
    Ok(Json(RollbackTargetsResponse { targets }))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct RollbackRequest {
    pub target_deployment_id: String,
    pub new_deployment_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackResponse {
    pub deployment_id: DeploymentId,
}

pub async fn rollback(
    State(state): State<AppState>,
    Path(app_name): Path<String>,
    payload: Result<Json<RollbackRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<RollbackResponse>), ApiError> {
    let Json(request) = payload.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    let target_id = DeploymentId::parse(&request.target_deployment_id)?;
    let new_id = DeploymentId::parse(&request.new_deployment_id)?;

    let engine = state.engine.clone();
    let task_target = target_id.clone();
    let task_new = new_id.clone();
    state.dispatch(new_id.clone(), async move {
        engine.rollback(&app_name, task_target, task_new).await
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(RollbackResponse { deployment_id: new_id }),
    ))
}
