//! Container runtime adapter.
//!
//! The deploy engine talks to the container daemon exclusively through the
//! [`ContainerRuntime`] trait so tests can script a fake runtime;
//! [`DockerRuntime`] is the production implementation over the local Docker
//! daemon.

pub mod docker;
pub mod probe;

pub use docker::DockerRuntime;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use haloy_core::Result;
use haloy_core::config::{AppConfig, ImageSource};
use haloy_core::id::DeploymentId;
use haloy_core::labels::ContainerLabels;

/// Graceful stop window given to the daemon before falling back to kill.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(20);
/// Up to this many containers are stopped one at a time.
pub const SEQUENTIAL_STOP_MAX: usize = 3;
/// Beyond that, stops run with this many in flight.
pub const STOP_CONCURRENCY: usize = 3;

/// A replica the runtime created and started.
#[derive(Debug, Clone)]
pub struct StartedContainer {
    pub id: String,
    pub name: String,
    pub replica: u32,
}

/// A managed container found by a label scan.
#[derive(Debug, Clone)]
pub struct AppContainer {
    pub id: String,
    pub name: String,
    pub labels: ContainerLabels,
    pub running: bool,
}

/// Operations the deploy engine needs from the container daemon.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Make the configured image available locally: pull registry images
    /// that are missing, verify locally-loaded references exist.
    async fn ensure_image(&self, source: &ImageSource) -> Result<()>;

    /// Whether `reference` is present in the local image store. Used to
    /// filter rollback candidates under the `local` history strategy.
    async fn image_exists(&self, reference: &str) -> Result<bool>;

    /// Tag `source_ref` as `{app}:{deployment_id}` and return the new
    /// reference. Idempotent when source and destination already match.
    async fn tag_image(
        &self,
        source_ref: &str,
        app_name: &str,
        deployment_id: &DeploymentId,
    ) -> Result<String>;

    /// Fail fast when the image architecture does not match the host.
    async fn check_platform(&self, image_ref: &str) -> Result<()>;

    /// Create and start the configured number of replicas. On any error,
    /// every container already created in the batch is force-removed before
    /// the error is returned.
    async fn run_replicas(
        &self,
        deployment_id: &DeploymentId,
        image_ref: &str,
        config: &AppConfig,
        resolved_env: &HashMap<String, String>,
    ) -> Result<Vec<StartedContainer>>;

    /// Gate on the container becoming healthy; see the module docs of
    /// [`probe`] for the exact algorithm.
    async fn health_check(&self, container_id: &str, initial_delay: Option<Duration>)
    -> Result<()>;

    /// All managed containers of an app, running only unless
    /// `include_stopped`.
    async fn list_app_containers(
        &self,
        app_name: &str,
        include_stopped: bool,
    ) -> Result<Vec<AppContainer>>;

    /// Gracefully stop (then kill) every managed container of the app except
    /// those labeled with `ignore_deployment_id`. Returns the stopped ids.
    async fn stop_containers(
        &self,
        app_name: &str,
        ignore_deployment_id: Option<&DeploymentId>,
    ) -> Result<Vec<String>>;

    /// Force-remove every managed container of the app except those labeled
    /// with `ignore_deployment_id`. Returns the removed ids.
    async fn remove_containers(
        &self,
        app_name: &str,
        ignore_deployment_id: Option<&DeploymentId>,
    ) -> Result<Vec<String>>;

    /// Force-remove specific containers (failed-batch cleanup).
    async fn force_remove(&self, container_ids: &[String]) -> Result<()>;

    /// Remove `{app}:*` images beyond the `keep` newest by deployment-id
    /// tag, always sparing the current tag and images in use by running
    /// containers. Returns the removed references.
    async fn remove_old_images(
        &self,
        app_name: &str,
        current: &DeploymentId,
        keep: u32,
    ) -> Result<Vec<String>>;

    /// Create the shared bridge network if it does not exist.
    async fn ensure_network(&self) -> Result<()>;

    /// Load an image archive (`docker save` tar) into the daemon, returning
    /// a human-readable summary of what was loaded.
    async fn load_image(&self, archive: Bytes) -> Result<String>;
}

/// Container name for a replica: `{app}-haloy-{deploymentID}` with a
/// `-replica-N` suffix once there is more than one.
pub fn container_name(
    app_name: &str,
    deployment_id: &DeploymentId,
    replica: u32,
    replicas: u32,
) -> String {
    if replicas > 1 {
        format!("{app_name}-haloy-{deployment_id}-replica-{replica}")
    } else {
        format!("{app_name}-haloy-{deployment_id}")
    }
}
