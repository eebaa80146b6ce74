//! App status and stop operations.

use serde::Serialize;

use haloy_core::Result;
use haloy_core::id::DeploymentId;

use crate::DeployEngine;

/// Snapshot of what an app is doing right now.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppStatus {
    /// `running` or `stopped`.
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment_id: Option<DeploymentId>,
    pub container_ids: Vec<String>,
}

/// What a stop request actually did.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StopOutcome {
    pub stopped_ids: Vec<String>,
    pub removed_ids: Vec<String>,
}

impl DeployEngine {
    /// The deployment id of the currently running replicas, determined by
    /// label scan. On mixed sets the newest id wins.
    pub(crate) async fn current_deployment(
        &self,
        app_name: &str,
    ) -> Result<Option<DeploymentId>> {
        let running = self.runtime.list_app_containers(app_name, false).await?;
        Ok(running
            .into_iter()
            .map(|container| container.labels.deployment_id)
            .max())
    }

    pub async fn app_status(&self, app_name: &str) -> Result<AppStatus> {
        let running = self.runtime.list_app_containers(app_name, false).await?;
        if running.is_empty() {
            // Fall back to history so operators still see the last id.
            let last = self
                .store
                .get_deployment_history(app_name, 1)
                .await
                .map_err(haloy_core::Error::from)?
                .into_iter()
                .next();
            return Ok(AppStatus {
                state: "stopped".to_string(),
                deployment_id: last.map(|d| d.id),
                container_ids: Vec::new(),
            });
        }
        let deployment_id = running
            .iter()
            .map(|container| container.labels.deployment_id.clone())
            .max();
        Ok(AppStatus {
            state: "running".to_string(),
            deployment_id,
            container_ids: running.into_iter().map(|c| c.id).collect(),
        })
    }

    /// Stop all replicas of an app, optionally removing the containers.
    pub async fn stop_app(&self, app_name: &str, remove_containers: bool) -> Result<StopOutcome> {
        let stopped_ids = self.runtime.stop_containers(app_name, None).await?;
        let removed_ids = if remove_containers {
            self.runtime.remove_containers(app_name, None).await?
        } else {
            Vec::new()
        };
        Ok(StopOutcome {
            stopped_ids,
            removed_ids,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{test_engine, web_config, TestEngine};

    fn id(s: &str) -> DeploymentId {
        DeploymentId::parse(s).unwrap()
    }

    #[tokio::test]
    async fn status_reports_running_replicas() {
        let TestEngine { engine, .. } = test_engine().await;
        let deploy_id = id("20250309143005");
        engine.deploy(deploy_id.clone(), web_config(2)).await.unwrap();

        let status = engine.app_status("web").await.unwrap();
        assert_eq!(status.state, "running");
        assert_eq!(status.deployment_id, Some(deploy_id));
        assert_eq!(status.container_ids.len(), 2);
    }

    #[tokio::test]
    async fn status_of_unknown_app_is_stopped() {
        let TestEngine { engine, .. } = test_engine().await;
        let status = engine.app_status("ghost").await.unwrap();
        assert_eq!(status.state, "stopped");
        assert!(status.deployment_id.is_none());
        assert!(status.container_ids.is_empty());
    }

    #[tokio::test]
    async fn stop_without_removal_keeps_containers_around() {
        let TestEngine {
            engine, runtime, ..
        } = test_engine().await;
        engine
            .deploy(id("20250309143005"), web_config(2))
            .await
            .unwrap();

        let outcome = engine.stop_app("web", false).await.unwrap();
        assert_eq!(outcome.stopped_ids.len(), 2);
        assert!(outcome.removed_ids.is_empty());

        let containers = runtime.containers_for("web");
        assert_eq!(containers.len(), 2);
        assert!(containers.iter().all(|c| !c.running));

        let status = engine.app_status("web").await.unwrap();
        assert_eq!(status.state, "stopped");
        // History still knows the last deployment.
        assert_eq!(status.deployment_id, Some(id("20250309143005")));
    }

    #[tokio::test]
    async fn stop_with_removal_clears_the_app() {
        let TestEngine {
            engine, runtime, ..
        } = test_engine().await;
        engine
            .deploy(id("20250309143005"), web_config(2))
            .await
            .unwrap();

        let outcome = engine.stop_app("web", true).await.unwrap();
        assert_eq!(outcome.stopped_ids.len(), 2);
        assert_eq!(outcome.removed_ids.len(), 2);
        assert!(runtime.containers_for("web").is_empty());
    }
}
