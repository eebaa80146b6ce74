//! The deploy state machine.
//!
//! Admitted → Validated → ImageReady → Tagged → ContainersStarted →
//! HealthGated → Superseded → Retained → Success, with Failed reachable
//! from any step. Failure never leaves partial state behind: containers
//! created for the failing deployment are force-removed and no history row
//! is written.

use serde_json::json;

use haloy_core::config::{AppConfig, HistoryStrategy};
use haloy_core::deployment::Deployment;
use haloy_core::id::DeploymentId;
use haloy_core::{Error, Result};
use haloy_runtime::StartedContainer;

use crate::logger::EventLog;
use crate::{DeployEngine, StoreSecrets};

impl DeployEngine {
    /// Run a full deployment. Emits the start entry, drives the state
    /// machine, and always closes with exactly one terminal entry.
    pub async fn deploy(&self, deployment_id: DeploymentId, config: AppConfig) -> Result<()> {
        let log = EventLog::new(self.broker.clone(), deployment_id.clone());
        log.info(format!("deploying {}", config.name));
        match self.run_deploy(&deployment_id, config, &log, None).await {
            Ok(()) => {
                log.complete("deployment complete");
                Ok(())
            }
            Err(err) => {
                log.fail(&err);
                Err(err)
            }
        }
    }

    /// The shared body of deploy and rollback. `rolled_back_from` is set
    /// when a rollback replays an old snapshot under a fresh id.
    pub(crate) async fn run_deploy(
        &self,
        deployment_id: &DeploymentId,
        config: AppConfig,
        log: &EventLog,
        rolled_back_from: Option<&DeploymentId>,
    ) -> Result<()> {
        // Validated
        let config = config.normalize(self.history_keep_default)?;
        let source = config.image.source()?;

        // ImageReady
        self.runtime.ensure_image(&source).await?;
        log.info(format!("image {} ready", source.reference()));

        // Tagged
        let image_ref = self
            .runtime
            .tag_image(&source.reference(), &config.name, deployment_id)
            .await?;
        self.runtime.check_platform(&image_ref).await?;

        // ContainersStarted
        let resolved_env = self
            .vault
            .resolve_env(&config.env, &StoreSecrets(&self.store))
            .await?;
        self.runtime.ensure_network().await?;
        let started = self
            .runtime
            .run_replicas(deployment_id, &image_ref, &config, &resolved_env)
            .await?;
        log.info_with(
            format!("started {} replica(s)", started.len()),
            &[("containers", json!(started.len()))],
        );

        // HealthGated
        if let Err(err) = self.gate_health(&started, log).await {
            self.discard_batch(&started, log).await;
            return Err(err);
        }
        log.info("all replicas healthy");

        // Superseded: failures here are logged but do not fail the deploy,
        // the new replicas are already serving.
        match self
            .runtime
            .stop_containers(&config.name, Some(deployment_id))
            .await
        {
            Ok(stopped) if !stopped.is_empty() => {
                log.info(format!("stopped {} superseded container(s)", stopped.len()));
            }
            Ok(_) => {}
            Err(err) => log.warn(format!("stopping superseded containers: {err}")),
        }
        if let Err(err) = self
            .runtime
            .remove_containers(&config.name, Some(deployment_id))
            .await
        {
            log.warn(format!("removing superseded containers: {err}"));
        }

        // Retained
        let history = config.image.history();
        if history.strategy == HistoryStrategy::None {
            log.info("history strategy is none, skipping retention");
            return Ok(());
        }
        let row = Deployment {
            id: deployment_id.clone(),
            app_name: config.name.clone(),
            app_config: config.clone(),
            image_ref: image_ref.clone(),
            rolled_back_from: rolled_back_from.map(|id| id.to_string()),
        };
        self.store.save_deployment(&row).await?;
        let pruned = self
            .store
            .prune_old_deployments(&config.name, history.count)
            .await?;
        if pruned > 0 {
            log.info(format!("pruned {pruned} old deployment record(s)"));
        }

        let image_keep = match history.strategy {
            HistoryStrategy::Local => history.count,
            HistoryStrategy::Registry => 1,
            HistoryStrategy::None => unreachable!("handled above"),
        };
        match self
            .runtime
            .remove_old_images(&config.name, deployment_id, image_keep)
            .await
        {
            Ok(removed) if !removed.is_empty() => {
                log.info(format!("removed {} old image(s)", removed.len()));
            }
            Ok(_) => {}
            Err(err) => log.warn(format!("removing old images: {err}")),
        }
        Ok(())
    }

    async fn gate_health(&self, started: &[StartedContainer], log: &EventLog) -> Result<()> {
        for container in started {
            log.info(format!("health checking {}", container.name));
            self.runtime
                .health_check(&container.id, None)
                .await
                .map_err(|err| match err {
                    Error::Health(msg) => {
                        Error::Health(format!("replica {}: {msg}", container.name))
                    }
                    other => other,
                })?;
        }
        Ok(())
    }

    /// Remove every container of a failed batch so the runtime shows no
    /// trace of the failing deployment id.
    async fn discard_batch(&self, started: &[StartedContainer], log: &EventLog) {
        let ids: Vec<String> = started.iter().map(|c| c.id.clone()).collect();
        if let Err(err) = self.runtime.force_remove(&ids).await {
            log.warn(format!("removing failed replicas: {err}"));
        }
    }
}
