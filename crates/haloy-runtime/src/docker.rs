//! Docker implementation of the runtime adapter.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, ListContainersOptions,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::{
    CreateImageOptions, ImportImageOptions, ListImagesOptions, RemoveImageOptions, TagImageOptions,
};
use bollard::models::{HealthStatusEnum, HostConfig, RestartPolicy, RestartPolicyNameEnum};
use bollard::network::{CreateNetworkOptions, InspectNetworkOptions};
use bytes::Bytes;
use futures::StreamExt;
use tracing::{debug, info, warn};

use haloy_core::config::{AppConfig, ImageSource};
use haloy_core::id::DeploymentId;
use haloy_core::labels::{self, ContainerLabels};
use haloy_core::{Error, Result};

use crate::{
    AppContainer, ContainerRuntime, SEQUENTIAL_STOP_MAX, STOP_CONCURRENCY, STOP_TIMEOUT,
    StartedContainer, container_name, probe,
};

const RUNNING_WAIT: Duration = Duration::from_secs(30);
const HEALTH_WAIT: Duration = Duration::from_secs(30);
const INSPECT_INTERVAL: Duration = Duration::from_millis(500);

/// Adapter over the local Docker daemon.
pub struct DockerRuntime {
    docker: Docker,
    network: String,
    http: reqwest::Client,
}

impl DockerRuntime {
    /// Connect to the local daemon.
    pub fn connect(network: impl Into<String>) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| Error::Runtime(format!("connecting to docker: {e}")))?;
        Ok(Self::with_client(docker, network))
    }

    /// Wrap an existing client (tests, custom sockets).
    pub fn with_client(docker: Docker, network: impl Into<String>) -> Self {
        Self {
            docker,
            network: network.into(),
            http: reqwest::Client::new(),
        }
    }

    /// Verify the daemon answers.
    pub async fn ping(&self) -> Result<()> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| Error::Runtime(format!("docker daemon unreachable: {e}")))
    }

    fn app_filters(app_name: &str) -> HashMap<String, Vec<String>> {
        HashMap::from([(
            "label".to_string(),
            vec![
                format!("{}={}", labels::LABEL_ROLE, labels::ROLE_APP),
                format!("{}={}", labels::LABEL_APP_NAME, app_name),
            ],
        )])
    }

    async fn list_managed(&self, app_name: &str, all: bool) -> Result<Vec<AppContainer>> {
        let options = ListContainersOptions::<String> {
            all,
            filters: Self::app_filters(app_name),
            ..Default::default()
        };
        let summaries = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| Error::Runtime(format!("listing containers: {e}")))?;

        let mut containers = Vec::with_capacity(summaries.len());
        for summary in summaries {
            let Some(id) = summary.id else { continue };
            let Some(label_map) = summary.labels else {
                continue;
            };
            // The filter already matched role/appName; a parse failure here
            // means a foreign container squatting on our labels.
            let parsed = match ContainerLabels::from_map(&label_map) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(container = %id, error = %e, "skipping container with bad labels");
                    continue;
                }
            };
            let name = summary
                .names
                .and_then(|names| names.into_iter().next())
                .map(|n| n.trim_start_matches('/').to_string())
                .unwrap_or_default();
            containers.push(AppContainer {
                id,
                name,
                labels: parsed,
                running: !all,
            });
        }
        Ok(containers)
    }

    async fn pull_image(&self, reference: &str) -> Result<()> {
        info!(image = %reference, "pulling image");
        let options = CreateImageOptions {
            from_image: reference.to_string(),
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(result) = stream.next().await {
            match result {
                Ok(progress) => {
                    if let Some(status) = progress.status {
                        debug!(status = %status, "pull progress");
                    }
                }
                Err(e) => {
                    return Err(Error::Image(format!("pulling {reference}: {e}")));
                }
            }
        }
        Ok(())
    }

    /// Stop one container: graceful with the daemon-side timeout, kill on
    /// failure.
    async fn stop_one(&self, container: AppContainer) -> Result<String> {
        let options = StopContainerOptions {
            t: STOP_TIMEOUT.as_secs() as i64,
        };
        match self.docker.stop_container(&container.id, Some(options)).await {
            Ok(()) => {
                debug!(container = %container.name, "stopped");
                Ok(container.id)
            }
            Err(stop_err) => {
                warn!(container = %container.name, error = %stop_err, "graceful stop failed, killing");
                self.docker
                    .kill_container(&container.id, None::<KillContainerOptions<String>>)
                    .await
                    .map_err(|kill_err| {
                        Error::Stop(format!(
                            "container {}: stop failed ({stop_err}), kill failed ({kill_err})",
                            container.name
                        ))
                    })?;
                Ok(container.id)
            }
        }
    }

    async fn container_ip(&self, container_id: &str) -> Result<String> {
        let inspect = self
            .docker
            .inspect_container(container_id, None)
            .await
            .map_err(|e| Error::Runtime(format!("inspecting container {container_id}: {e}")))?;
        let networks = inspect
            .network_settings
            .and_then(|settings| settings.networks)
            .unwrap_or_default();
        if let Some(endpoint) = networks.get(&self.network) {
            if let Some(ip) = endpoint.ip_address.as_deref().filter(|ip| !ip.is_empty()) {
                return Ok(ip.to_string());
            }
        }
        // Custom networkMode: fall back to whatever network has an address.
        networks
            .values()
            .find_map(|endpoint| {
                endpoint
                    .ip_address
                    .as_deref()
                    .filter(|ip| !ip.is_empty())
                    .map(str::to_string)
            })
            .ok_or_else(|| {
                Error::Health(format!("container {container_id} has no network address"))
            })
    }

    /// Wait until the daemon reports the container running.
    async fn wait_running(&self, container_id: &str) -> Result<()> {
        let deadline = tokio::time::Instant::now() + RUNNING_WAIT;
        loop {
            let inspect = self
                .docker
                .inspect_container(container_id, None)
                .await
                .map_err(|e| Error::Health(format!("inspecting container {container_id}: {e}")))?;
            let running = inspect
                .state
                .as_ref()
                .and_then(|state| state.running)
                .unwrap_or(false);
            if running {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::Health(format!(
                    "container {container_id} not running after {}s",
                    RUNNING_WAIT.as_secs()
                )));
            }
            tokio::time::sleep(INSPECT_INTERVAL).await;
        }
    }

    /// Poll the intrinsic probe until it settles. `Ok(true)` means the
    /// container has an intrinsic probe and it passed; `Ok(false)` means
    /// there is no intrinsic probe and the HTTP fallback should run.
    async fn intrinsic_health(&self, container_id: &str) -> Result<bool> {
        let deadline = tokio::time::Instant::now() + HEALTH_WAIT;
        loop {
            let inspect = self
                .docker
                .inspect_container(container_id, None)
                .await
                .map_err(|e| Error::Health(format!("inspecting container {container_id}: {e}")))?;
            let health = inspect.state.and_then(|state| state.health);
            let Some(health) = health else {
                return Ok(false);
            };
            match health.status {
                Some(HealthStatusEnum::HEALTHY) => return Ok(true),
                Some(HealthStatusEnum::STARTING) => {
                    if tokio::time::Instant::now() >= deadline {
                        return Err(Error::Health(format!(
                            "container {container_id} still starting after {}s",
                            HEALTH_WAIT.as_secs()
                        )));
                    }
                    tokio::time::sleep(INSPECT_INTERVAL).await;
                }
                Some(HealthStatusEnum::UNHEALTHY) => {
                    let last_output = health
                        .log
                        .and_then(|log| log.last().and_then(|probe| probe.output.clone()))
                        .unwrap_or_default();
                    return Err(Error::Health(format!(
                        "container {container_id} is unhealthy: {last_output}"
                    )));
                }
                Some(HealthStatusEnum::NONE) | Some(HealthStatusEnum::EMPTY) | None => {
                    return Ok(false);
                }
            }
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn image_exists(&self, reference: &str) -> Result<bool> {
        match self.docker.inspect_image(reference).await {
            Ok(_) => Ok(true),
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(Error::Runtime(format!("inspecting image {reference}: {e}"))),
        }
    }

    async fn ensure_image(&self, source: &ImageSource) -> Result<()> {
        match source {
            ImageSource::Registry { .. } => {
                let reference = source.reference();
                if self.image_exists(&reference).await? {
                    debug!(image = %reference, "image already present");
                    return Ok(());
                }
                self.pull_image(&reference).await?;
                if !self.image_exists(&reference).await? {
                    return Err(Error::Image(format!(
                        "image {reference} unavailable after pull"
                    )));
                }
                Ok(())
            }
            ImageSource::Local { reference } => {
                if self.image_exists(reference).await? {
                    Ok(())
                } else {
                    Err(Error::Image(format!(
                        "local image {reference} is not loaded into the runtime"
                    )))
                }
            }
        }
    }

    async fn tag_image(
        &self,
        source_ref: &str,
        app_name: &str,
        deployment_id: &DeploymentId,
    ) -> Result<String> {
        let target = format!("{app_name}:{deployment_id}");
        if source_ref == target {
            return Ok(target);
        }
        let options = TagImageOptions {
            repo: app_name.to_string(),
            tag: deployment_id.to_string(),
        };
        self.docker
            .tag_image(source_ref, Some(options))
            .await
            .map_err(|e| Error::Image(format!("tagging {source_ref} as {target}: {e}")))?;
        Ok(target)
    }

    async fn check_platform(&self, image_ref: &str) -> Result<()> {
        let inspect = self
            .docker
            .inspect_image(image_ref)
            .await
            .map_err(|e| Error::Image(format!("inspecting image {image_ref}: {e}")))?;
        let Some(image_arch) = inspect.architecture.filter(|arch| !arch.is_empty()) else {
            return Ok(());
        };
        let host = normalize_arch(std::env::consts::ARCH);
        let image = normalize_arch(&image_arch);
        if host != image {
            return Err(Error::Image(format!(
                "image {image_ref} is built for {image}, host is {host}"
            )));
        }
        Ok(())
    }

    async fn run_replicas(
        &self,
        deployment_id: &DeploymentId,
        image_ref: &str,
        config: &AppConfig,
        resolved_env: &HashMap<String, String>,
    ) -> Result<Vec<StartedContainer>> {
        let labels = ContainerLabels {
            app_name: config.name.clone(),
            deployment_id: deployment_id.clone(),
            acme_email: config.acme_email.clone(),
            port: config.port.clone(),
            health_check_path: config.health_check_path.clone(),
            domains: config.domains.clone(),
        };
        let label_map = labels.to_map()?;

        let mut env: Vec<String> = resolved_env
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();
        env.sort();

        let binds: Option<Vec<String>> = if config.volumes.is_empty() {
            None
        } else {
            Some(config.volumes.iter().map(|v| v.bind_spec()).collect())
        };

        let network = config
            .network_mode
            .clone()
            .unwrap_or_else(|| self.network.clone());
        let host_config = HostConfig {
            binds,
            network_mode: Some(network),
            restart_policy: Some(RestartPolicy {
                name: Some(RestartPolicyNameEnum::UNLESS_STOPPED),
                maximum_retry_count: None,
            }),
            ..Default::default()
        };

        let mut started = Vec::with_capacity(config.replicas as usize);
        for replica in 1..=config.replicas {
            let name = container_name(&config.name, deployment_id, replica, config.replicas);
            let container_config = Config {
                image: Some(image_ref.to_string()),
                env: Some(env.clone()),
                labels: Some(label_map.clone()),
                host_config: Some(host_config.clone()),
                ..Default::default()
            };
            let create_options = CreateContainerOptions {
                name: name.clone(),
                platform: None,
            };

            info!(container = %name, image = %image_ref, "creating container");
            let result = async {
                let created = self
                    .docker
                    .create_container(Some(create_options), container_config)
                    .await
                    .map_err(|e| Error::Start(format!("creating {name}: {e}")))?;
                self.docker
                    .start_container(&name, None::<StartContainerOptions<String>>)
                    .await
                    .map_err(|e| Error::Start(format!("starting {name}: {e}")))?;
                Ok::<_, Error>(created.id)
            }
            .await;

            match result {
                Ok(id) => started.push(StartedContainer { id, name, replica }),
                Err(e) => {
                    let ids: Vec<String> = started.iter().map(|c| c.id.clone()).collect();
                    if let Err(cleanup) = self.force_remove(&ids).await {
                        warn!(error = %cleanup, "cleanup after failed start");
                    }
                    return Err(e);
                }
            }
        }
        Ok(started)
    }

    async fn health_check(
        &self,
        container_id: &str,
        initial_delay: Option<Duration>,
    ) -> Result<()> {
        if let Some(delay) = initial_delay {
            tokio::time::sleep(delay).await;
        }
        self.wait_running(container_id).await?;
        if self.intrinsic_health(container_id).await? {
            return Ok(());
        }

        // No intrinsic probe: hit the app's health endpoint directly over
        // the shared network.
        let inspect = self
            .docker
            .inspect_container(container_id, None)
            .await
            .map_err(|e| Error::Health(format!("inspecting container {container_id}: {e}")))?;
        let label_map = inspect
            .config
            .and_then(|config| config.labels)
            .unwrap_or_default();
        let labels = ContainerLabels::from_map(&label_map)
            .map_err(|e| Error::Health(format!("container {container_id}: {e}")))?;
        let ip = self.container_ip(container_id).await?;
        let url = format!("http://{ip}:{}{}", labels.port, labels.health_check_path);
        probe::probe_http(&self.http, &url).await
    }

    async fn list_app_containers(
        &self,
        app_name: &str,
        include_stopped: bool,
    ) -> Result<Vec<AppContainer>> {
        if !include_stopped {
            return self.list_managed(app_name, false).await;
        }
        let running: HashSet<String> = self
            .list_managed(app_name, false)
            .await?
            .into_iter()
            .map(|c| c.id)
            .collect();
        let mut all = self.list_managed(app_name, true).await?;
        for container in &mut all {
            container.running = running.contains(&container.id);
        }
        Ok(all)
    }

    async fn stop_containers(
        &self,
        app_name: &str,
        ignore_deployment_id: Option<&DeploymentId>,
    ) -> Result<Vec<String>> {
        let targets: Vec<AppContainer> = self
            .list_managed(app_name, false)
            .await?
            .into_iter()
            .filter(|c| Some(&c.labels.deployment_id) != ignore_deployment_id)
            .collect();

        let results: Vec<Result<String>> = if targets.len() <= SEQUENTIAL_STOP_MAX {
            let mut results = Vec::with_capacity(targets.len());
            for container in targets {
                results.push(self.stop_one(container).await);
            }
            results
        } else {
            futures::stream::iter(targets)
                .map(|container| self.stop_one(container))
                .buffer_unordered(STOP_CONCURRENCY)
                .collect()
                .await
        };

        let mut stopped = Vec::new();
        let mut failures = Vec::new();
        for result in results {
            match result {
                Ok(id) => stopped.push(id),
                Err(e) => failures.push(e.to_string()),
            }
        }
        if !failures.is_empty() {
            return Err(Error::Stop(failures.join("; ")));
        }
        Ok(stopped)
    }

    async fn remove_containers(
        &self,
        app_name: &str,
        ignore_deployment_id: Option<&DeploymentId>,
    ) -> Result<Vec<String>> {
        let targets: Vec<AppContainer> = self
            .list_app_containers(app_name, true)
            .await?
            .into_iter()
            .filter(|c| Some(&c.labels.deployment_id) != ignore_deployment_id)
            .collect();
        let ids: Vec<String> = targets.iter().map(|c| c.id.clone()).collect();
        self.force_remove(&ids).await?;
        Ok(ids)
    }

    async fn force_remove(&self, container_ids: &[String]) -> Result<()> {
        let mut failures = Vec::new();
        for id in container_ids {
            let options = RemoveContainerOptions {
                force: true,
                ..Default::default()
            };
            match self.docker.remove_container(id, Some(options)).await {
                Ok(()) => debug!(container = %id, "removed"),
                Err(DockerError::DockerResponseServerError {
                    status_code: 404, ..
                }) => {}
                Err(e) => failures.push(format!("{id}: {e}")),
            }
        }
        if !failures.is_empty() {
            return Err(Error::Runtime(format!(
                "removing containers: {}",
                failures.join("; ")
            )));
        }
        Ok(())
    }

    async fn remove_old_images(
        &self,
        app_name: &str,
        current: &DeploymentId,
        keep: u32,
    ) -> Result<Vec<String>> {
        let options = ListImagesOptions::<String> {
            filters: HashMap::from([(
                "reference".to_string(),
                vec![format!("{app_name}:*")],
            )]),
            ..Default::default()
        };
        let images = self
            .docker
            .list_images(Some(options))
            .await
            .map_err(|e| Error::Runtime(format!("listing images: {e}")))?;

        let mut tagged: Vec<(DeploymentId, String)> = Vec::new();
        for image in images {
            for tag in image.repo_tags {
                if let Some(id) = parse_deployment_tag(app_name, &tag) {
                    tagged.push((id, tag));
                }
            }
        }
        tagged.sort_by(|a, b| b.0.cmp(&a.0));

        let in_use: HashSet<String> = self
            .list_managed(app_name, false)
            .await?
            .iter()
            .map(|c| format!("{app_name}:{}", c.labels.deployment_id))
            .collect();

        let mut removed = Vec::new();
        for (id, tag) in tagged.into_iter().skip(keep as usize) {
            if id == *current || in_use.contains(&tag) {
                continue;
            }
            let options = RemoveImageOptions {
                force: false,
                noprune: false,
            };
            match self.docker.remove_image(&tag, Some(options), None).await {
                Ok(_) => {
                    info!(image = %tag, "removed old image");
                    removed.push(tag);
                }
                Err(e) => warn!(image = %tag, error = %e, "could not remove old image"),
            }
        }
        Ok(removed)
    }

    async fn ensure_network(&self) -> Result<()> {
        match self
            .docker
            .inspect_network(&self.network, None::<InspectNetworkOptions<String>>)
            .await
        {
            Ok(_) => return Ok(()),
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => {}
            Err(e) => {
                return Err(Error::Runtime(format!(
                    "inspecting network {}: {e}",
                    self.network
                )));
            }
        }
        info!(network = %self.network, "creating shared network");
        let options = CreateNetworkOptions {
            name: self.network.clone(),
            driver: "bridge".to_string(),
            ..Default::default()
        };
        self.docker
            .create_network(options)
            .await
            .map_err(|e| Error::Runtime(format!("creating network {}: {e}", self.network)))?;
        Ok(())
    }

    async fn load_image(&self, archive: Bytes) -> Result<String> {
        let options = ImportImageOptions { quiet: false };
        let mut stream = self
            .docker
            .import_image(options, archive, None);
        let mut summary = String::new();
        while let Some(result) = stream.next().await {
            match result {
                Ok(progress) => {
                    if let Some(line) = progress.stream {
                        let line = line.trim();
                        if !line.is_empty() {
                            summary = line.to_string();
                        }
                    }
                    if let Some(error) = progress.error {
                        return Err(Error::Image(format!("loading image archive: {error}")));
                    }
                }
                Err(e) => return Err(Error::Image(format!("loading image archive: {e}"))),
            }
        }
        if summary.is_empty() {
            summary = "image archive loaded".to_string();
        }
        Ok(summary)
    }
}

fn normalize_arch(arch: &str) -> &str {
    match arch {
        "x86_64" | "amd64" => "amd64",
        "aarch64" | "arm64" => "arm64",
        "armv7l" | "arm" => "arm",
        other => other,
    }
}

/// Extract the deployment id from an `{app}:{YYYYMMDDHHMMSS}` tag.
fn parse_deployment_tag(app_name: &str, tag: &str) -> Option<DeploymentId> {
    let suffix = tag.strip_prefix(app_name)?.strip_prefix(':')?;
    DeploymentId::parse(suffix).ok()
}


/// Integration tests that require a running Docker daemon.
/// Run with: cargo test -- --ignored
#[cfg(test)]
mod integration_tests {
    use super::*;

    fn runtime() -> DockerRuntime {
        DockerRuntime::connect("haloy-test").expect("docker available")
    }

    #[tokio::test]
    #[ignore]
    async fn daemon_answers_ping() {
        runtime().ping().await.unwrap();
    }

    #[tokio::test]
    #[ignore]
    async fn ensure_network_is_idempotent() {
        let runtime = runtime();
        runtime.ensure_network().await.unwrap();
        runtime.ensure_network().await.unwrap();
    }

    #[tokio::test]
    #[ignore]
    async fn pull_tag_and_prune_cycle() {
        let runtime = runtime();
        let source = ImageSource::Registry {
            repository: "alpine".to_string(),
            tag: "latest".to_string(),
        };
        runtime.ensure_image(&source).await.unwrap();

        let id = DeploymentId::parse("20250309143005").unwrap();
        let tagged = runtime
            .tag_image(&source.reference(), "haloy-itest", &id)
            .await
            .unwrap();
        assert_eq!(tagged, "haloy-itest:20250309143005");

        runtime.check_platform(&tagged).await.unwrap();

        let removed = runtime
            .remove_old_images("haloy-itest", &id, 0)
            .await
            .unwrap();
        // The current tag is always spared.
        assert!(removed.is_empty());
    }

    #[tokio::test]
    #[ignore]
    async fn missing_local_image_is_an_image_error() {
        let runtime = runtime();
        let source = ImageSource::Local {
            reference: "haloy-does-not-exist:nope".to_string(),
        };
        let err = runtime.ensure_image(&source).await.unwrap_err();
        assert!(matches!(err, Error::Image(_)));
    }
}
