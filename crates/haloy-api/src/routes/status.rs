//! Version, status, and stop endpoints.

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::{Deserialize, Serialize};

use haloy_engine::{AppStatus, StopOutcome};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub manager: &'static str,
    pub haproxy: String,
}

pub async fn version(State(state): State<AppState>) -> Json<VersionResponse> {
    Json(VersionResponse {
        manager: env!("CARGO_PKG_VERSION"),
        haproxy: state.config.haproxy_version.clone(),
    })
}

pub async fn app_status(
    State(state): State<AppState>,
    Path(app_name): Path<String>,
) -> Result<Json<AppStatus>, ApiError> {
    let status = state.engine.app_status(&app_name).await?;
    Ok(Json(status))
}

#[derive(Debug, Deserialize)]
pub struct StopQuery {
    #[serde(default, rename = "remove-containers")]
    pub remove_containers: bool,
}

pub async fn stop_app(
    State(state): State<AppState>,
    Path(app_name): Path<String>,
    Query(query): Query<StopQuery>,
) -> Result<Json<StopOutcome>, ApiError> {
    let outcome = state
        .engine
        .stop_app(&app_name, query.remove_containers)
        .await?;
    Ok(Json(outcome))
}
