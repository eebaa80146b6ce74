//! Deployment records and rollback targets.

use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::id::DeploymentId;

/// A persisted deployment: the snapshot of what was launched and with which
/// image. Written only after the new replicas passed their health gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    pub id: DeploymentId,
    pub app_name: String,
    /// The normalized config captured at deploy time; rollback replays it.
    pub app_config: AppConfig,
    pub image_ref: String,
    /// Weak back-reference to the deployment a rollback replayed. Pruning
    /// may leave it dangling, so consumers must tolerate a missing target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rolled_back_from: Option<String>,
}

/// A prior deployment whose image is still available for rollback.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackTarget {
    pub deployment_id: DeploymentId,
    pub image_ref: String,
    /// True for the deployment whose replicas are currently running.
    pub is_running: bool,
    pub app_config: AppConfig,
}
