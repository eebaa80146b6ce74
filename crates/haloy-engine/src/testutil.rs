//! Scripted runtime and fixtures for engine tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::json;

use haloy_broker::{LogBroker, LogStream};
use haloy_core::config::{AppConfig, ImageSource};
use haloy_core::id::DeploymentId;
use haloy_core::labels::ContainerLabels;
use haloy_core::log::LogEntry;
use haloy_core::{Error, Result};
use haloy_runtime::{AppContainer, ContainerRuntime, StartedContainer, container_name};
use haloy_store::Store;
use haloy_vault::{Identity, Vault};

use crate::DeployEngine;

pub struct TestEngine {
    pub engine: DeployEngine,
    pub runtime: Arc<MockRuntime>,
    pub store: Store,
    pub vault: Arc<Vault>,
}

pub async fn test_engine() -> TestEngine {
    let store = Store::open_in_memory().await.unwrap();
    let vault = Arc::new(Vault::new(Identity::generate()));
    let broker = Arc::new(LogBroker::new());
    let runtime = Arc::new(MockRuntime::new());
    let engine = DeployEngine::new(
        Arc::clone(&runtime) as Arc<dyn ContainerRuntime>,
        store.clone(),
        Arc::clone(&vault),
        broker,
        10,
    );
    TestEngine {
        engine,
        runtime,
        store,
        vault,
    }
}

pub fn web_config(replicas: u32) -> AppConfig {
    serde_json::from_value(json!({
        "name": "web",
        "image": {
            "repository": "registry.example.com/web",
            "tag": "v1",
            "history": {"strategy": "local", "count": 10},
        },
        "replicas": replicas,
        "port": "8080",
        "healthCheckPath": "/healthz",
        "domains": [{"canonical": "a.test"}],
    }))
    .unwrap()
}

/// Drain a deployment stream until its terminal entry arrives.
pub async fn collect_until_terminal(stream: &mut LogStream) -> Vec<LogEntry> {
    let mut entries = Vec::new();
    loop {
        let entry = tokio::time::timeout(Duration::from_secs(5), stream.recv())
            .await
            .expect("log stream timed out before terminal entry")
            .expect("log stream closed before terminal entry");
        let terminal = entry.is_terminal();
        entries.push(entry);
        if terminal {
            return entries;
        }
    }
}

#[derive(Debug, Clone)]
pub struct MockContainer {
    pub id: String,
    pub name: String,
    pub labels: ContainerLabels,
    pub env: HashMap<String, String>,
    pub running: bool,
}

#[derive(Default)]
struct MockState {
    containers: Vec<MockContainer>,
    images: HashSet<String>,
    pull_count: u32,
    image_prune_calls: Vec<(String, DeploymentId, u32)>,
    fail_pull: Option<String>,
    fail_create_at: Option<u32>,
    fail_health: Option<String>,
    fail_stop: Option<String>,
    next_id: u32,
}

/// An in-memory container runtime with scriptable failure points.
#[derive(Default)]
pub struct MockRuntime {
    state: Mutex<MockState>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().expect("mock runtime poisoned")
    }

    pub fn containers_for(&self, app_name: &str) -> Vec<MockContainer> {
        self.lock()
            .containers
            .iter()
            .filter(|c| c.labels.app_name == app_name)
            .cloned()
            .collect()
    }

    pub fn pull_count(&self) -> u32 {
        self.lock().pull_count
    }

    pub fn image_prune_calls(&self) -> Vec<(String, DeploymentId, u32)> {
        self.lock().image_prune_calls.clone()
    }

    pub fn fail_pull(&self, message: &str) {
        self.lock().fail_pull = Some(message.to_string());
    }

    pub fn fail_create_at(&self, replica: u32) {
        self.lock().fail_create_at = Some(replica);
    }

    pub fn fail_health(&self, message: &str) {
        self.lock().fail_health = Some(message.to_string());
    }

    pub fn fail_stop(&self, message: &str) {
        self.lock().fail_stop = Some(message.to_string());
    }

    /// Simulate an image disappearing from the local store.
    pub fn drop_image(&self, reference: &str) {
        self.lock().images.remove(reference);
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn ensure_image(&self, source: &ImageSource) -> Result<()> {
        let mut state = self.lock();
        match source {
            ImageSource::Registry { .. } => {
                if let Some(message) = &state.fail_pull {
                    return Err(Error::Image(message.clone()));
                }
                state.pull_count += 1;
                state.images.insert(source.reference());
                Ok(())
            }
            ImageSource::Local { reference } => {
                if state.images.contains(reference) {
                    Ok(())
                } else {
                    Err(Error::Image(format!("local image {reference} is not loaded")))
                }
            }
        }
    }

    async fn image_exists(&self, reference: &str) -> Result<bool> {
        Ok(self.lock().images.contains(reference))
    }

    async fn tag_image(
        &self,
        source_ref: &str,
        app_name: &str,
        deployment_id: &DeploymentId,
    ) -> Result<String> {
        let mut state = self.lock();
        if !state.images.contains(source_ref) {
            return Err(Error::Image(format!("no such image {source_ref}")));
        }
        let target = format!("{app_name}:{deployment_id}");
        state.images.insert(target.clone());
        Ok(target)
    }

    async fn check_platform(&self, _image_ref: &str) -> Result<()> {
        Ok(())
    }

    async fn run_replicas(
        &self,
        deployment_id: &DeploymentId,
        image_ref: &str,
        config: &AppConfig,
        resolved_env: &HashMap<String, String>,
    ) -> Result<Vec<StartedContainer>> {
        let mut state = self.lock();
        if !state.images.contains(image_ref) {
            return Err(Error::Start(format!("image {image_ref} not present")));
        }
        let labels = ContainerLabels {
            app_name: config.name.clone(),
            deployment_id: deployment_id.clone(),
            acme_email: config.acme_email.clone(),
            port: config.port.clone(),
            health_check_path: config.health_check_path.clone(),
            domains: config.domains.clone(),
        };
        let mut started = Vec::new();
        for replica in 1..=config.replicas {
            if state.fail_create_at == Some(replica) {
                // Mirror the real adapter: the partial batch is removed.
                let batch: HashSet<String> =
                    started.iter().map(|c: &StartedContainer| c.id.clone()).collect();
                state.containers.retain(|c| !batch.contains(&c.id));
                return Err(Error::Start(format!("creating replica {replica} failed")));
            }
            state.next_id += 1;
            let id = format!("mock-{}", state.next_id);
            let name = container_name(&config.name, deployment_id, replica, config.replicas);
            state.containers.push(MockContainer {
                id: id.clone(),
                name: name.clone(),
                labels: labels.clone(),
                env: resolved_env.clone(),
                running: true,
            });
            started.push(StartedContainer { id, name, replica });
        }
        Ok(started)
    }

    async fn health_check(
        &self,
        _container_id: &str,
        _initial_delay: Option<Duration>,
    ) -> Result<()> {
        if let Some(message) = &self.lock().fail_health {
            return Err(Error::Health(message.clone()));
        }
        Ok(())
    }

    async fn list_app_containers(
        &self,
        app_name: &str,
        include_stopped: bool,
    ) -> Result<Vec<AppContainer>> {
        Ok(self
            .lock()
            .containers
            .iter()
            .filter(|c| c.labels.app_name == app_name && (include_stopped || c.running))
            .map(|c| AppContainer {
                id: c.id.clone(),
                name: c.name.clone(),
                labels: c.labels.clone(),
                running: c.running,
            })
            .collect())
    }

    async fn stop_containers(
        &self,
        app_name: &str,
        ignore_deployment_id: Option<&DeploymentId>,
    ) -> Result<Vec<String>> {
        let mut state = self.lock();
        if let Some(message) = &state.fail_stop {
            return Err(Error::Stop(message.clone()));
        }
        let mut stopped = Vec::new();
        for container in &mut state.containers {
            if container.labels.app_name == app_name
                && container.running
                && Some(&container.labels.deployment_id) != ignore_deployment_id
            {
                container.running = false;
                stopped.push(container.id.clone());
            }
        }
        Ok(stopped)
    }

    async fn remove_containers(
        &self,
        app_name: &str,
        ignore_deployment_id: Option<&DeploymentId>,
    ) -> Result<Vec<String>> {
        let mut state = self.lock();
        let removed: Vec<String> = state
            .containers
            .iter()
            .filter(|c| {
                c.labels.app_name == app_name
                    && Some(&c.labels.deployment_id) != ignore_deployment_id
            })
            .map(|c| c.id.clone())
            .collect();
        state
            .containers
            .retain(|c| !removed.contains(&c.id));
        Ok(removed)
    }

    async fn force_remove(&self, container_ids: &[String]) -> Result<()> {
        self.lock()
            .containers
            .retain(|c| !container_ids.contains(&c.id));
        Ok(())
    }

    async fn remove_old_images(
        &self,
        app_name: &str,
        current: &DeploymentId,
        keep: u32,
    ) -> Result<Vec<String>> {
        let mut state = self.lock();
        state
            .image_prune_calls
            .push((app_name.to_string(), current.clone(), keep));

        let prefix = format!("{app_name}:");
        let mut tagged: Vec<(DeploymentId, String)> = state
            .images
            .iter()
            .filter_map(|reference| {
                let suffix = reference.strip_prefix(&prefix)?;
                DeploymentId::parse(suffix).ok().map(|id| (id, reference.clone()))
            })
            .collect();
        tagged.sort_by(|a, b| b.0.cmp(&a.0));

        let mut removed = Vec::new();
        for (id, reference) in tagged.into_iter().skip(keep as usize) {
            if id == *current {
                continue;
            }
            state.images.remove(&reference);
            removed.push(reference);
        }
        Ok(removed)
    }

    async fn ensure_network(&self) -> Result<()> {
        Ok(())
    }

    async fn load_image(&self, _archive: Bytes) -> Result<String> {
        Ok("image archive loaded".to_string())
    }
}
