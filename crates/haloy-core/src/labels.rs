//! Container labels.
//!
//! Every container the engine creates carries exactly this label set, and
//! membership in it is what makes a container "managed": unlabeled
//! containers are invisible to listing, supersede, and stop operations.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::Domain;
use crate::error::{Error, Result};
use crate::id::DeploymentId;

pub const LABEL_ROLE: &str = "role";
pub const LABEL_APP_NAME: &str = "appName";
pub const LABEL_DEPLOYMENT_ID: &str = "deploymentID";
pub const LABEL_ACME_EMAIL: &str = "acmeEmail";
pub const LABEL_PORT: &str = "port";
pub const LABEL_HEALTH_CHECK_PATH: &str = "healthCheckPath";
pub const LABEL_DOMAINS: &str = "domains";

/// The label value that marks a container as managed by Haloy.
pub const ROLE_APP: &str = "app";

/// The full label set stamped onto managed containers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerLabels {
    pub app_name: String,
    pub deployment_id: DeploymentId,
    pub acme_email: String,
    pub port: String,
    pub health_check_path: String,
    pub domains: Vec<Domain>,
}

impl ContainerLabels {
    /// Render as the Docker label map, including the `role=app` marker.
    pub fn to_map(&self) -> Result<HashMap<String, String>> {
        let domains = serde_json::to_string(&self.domains)
            .map_err(|e| Error::Internal(format!("serializing domains label: {e}")))?;
        Ok(HashMap::from([
            (LABEL_ROLE.to_string(), ROLE_APP.to_string()),
            (LABEL_APP_NAME.to_string(), self.app_name.clone()),
            (
                LABEL_DEPLOYMENT_ID.to_string(),
                self.deployment_id.to_string(),
            ),
            (LABEL_ACME_EMAIL.to_string(), self.acme_email.clone()),
            (LABEL_PORT.to_string(), self.port.clone()),
            (
                LABEL_HEALTH_CHECK_PATH.to_string(),
                self.health_check_path.clone(),
            ),
            (LABEL_DOMAINS.to_string(), domains),
        ]))
    }

    /// Parse the label map of an inspected container. Returns `NotFound`
    /// when the container is not managed (missing role or any label).
    pub fn from_map(labels: &HashMap<String, String>) -> Result<Self> {
        if labels.get(LABEL_ROLE).map(String::as_str) != Some(ROLE_APP) {
            return Err(Error::NotFound("container is not managed".into()));
        }
        let get = |key: &str| {
            labels
                .get(key)
                .cloned()
                .ok_or_else(|| Error::NotFound(format!("container label {key} missing")))
        };
        let domains: Vec<Domain> = serde_json::from_str(&get(LABEL_DOMAINS)?)
            .map_err(|e| Error::Internal(format!("parsing domains label: {e}")))?;
        Ok(Self {
            app_name: get(LABEL_APP_NAME)?,
            deployment_id: DeploymentId::parse(&get(LABEL_DEPLOYMENT_ID)?)?,
            acme_email: get(LABEL_ACME_EMAIL)?,
            port: get(LABEL_PORT)?,
            health_check_path: get(LABEL_HEALTH_CHECK_PATH)?,
            domains,
        })
    }
}
