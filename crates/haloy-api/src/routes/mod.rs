//! API routes.

pub mod deploy;
pub mod health;
pub mod images;
pub mod logs;
pub mod rollback;
pub mod secrets;
pub mod status;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{delete, get, post};

use crate::auth::require_bearer;
use crate::state::AppState;

/// Maximum accepted image archive upload.
const UPLOAD_BODY_LIMIT: usize = 1024 * 1024 * 1024;

/// Build the main API router.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/version", get(status::version))
        .route("/deploy", post(deploy::deploy))
        .route("/deploy/{deployment_id}/logs", get(logs::deployment_logs))
        .route("/logs", get(logs::all_logs))
        .route(
            "/rollback/{app_name}",
            get(rollback::rollback_targets).post(rollback::rollback),
        )
        .route("/status/{app_name}", get(status::app_status))
        .route("/stop/{app_name}", post(status::stop_app))
        .route("/secrets", get(secrets::list_secrets).post(secrets::set_secret))
        .route("/secrets/{name}", delete(secrets::delete_secret))
        .route(
            "/images/upload",
            post(images::upload_image).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_bearer,
        ));

    Router::new()
        .merge(health::router())
        .nest("/v1", api)
        .with_state(state)
}
