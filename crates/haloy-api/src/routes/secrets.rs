//! Secret management.
//!
//! Values are validated here, sealed by the vault, and only ciphertext goes
//! to the store. Listings never include values, only ciphertext
//! fingerprints.

use axum::Json;
use axum::extract::{Path, State};
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use haloy_store::SecretMetadata;

use crate::error::ApiError;
use crate::state::AppState;

const MAX_NAME_LEN: usize = 255;
const MAX_VALUE_LEN: usize = 10_000;

#[derive(Debug, Serialize)]
pub struct SecretsResponse {
    pub secrets: Vec<SecretMetadata>,
}

pub async fn list_secrets(
    State(state): State<AppState>,
) -> Result<Json<SecretsResponse>, ApiError> {
    let secrets = state.store.list_secrets().await?;
    Ok(Json(SecretsResponse { secrets }))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetSecretRequest {
    pub name: String,
    pub value: String,
}

pub async fn set_secret(
    State(state): State<AppState>,
    payload: Result<Json<SetSecretRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(request) = payload.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    validate_name(&request.name)?;
    if request.value.is_empty() || request.value.chars().count() > MAX_VALUE_LEN {
        return Err(ApiError::BadRequest(format!(
            "secret value must be between 1 and {MAX_VALUE_LEN} characters"
        )));
    }
    let ciphertext = state.vault.encrypt(&request.value)?;
    state.store.set_secret(&request.name, &ciphertext).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_secret(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.store.delete_secret(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn validate_name(name: &str) -> Result<(), ApiError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'.' || b == b'-');
    if !valid {
        return Err(ApiError::BadRequest(format!(
            "secret name must match [A-Za-z0-9_.-]{{1,{MAX_NAME_LEN}}}"
        )));
    }
    Ok(())
}
