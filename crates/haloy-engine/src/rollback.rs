//! The rollback state machine.
//!
//! A rollback replays the stored snapshot of a prior deployment through the
//! regular deploy path under a fresh id; the new row records where it came
//! from. Candidates are prior deployments whose image is still available
//! under their own history strategy.

use haloy_core::config::HistoryStrategy;
use haloy_core::deployment::{Deployment, RollbackTarget};
use haloy_core::id::DeploymentId;
use haloy_core::{Error, Result};

use crate::logger::EventLog;
use crate::DeployEngine;

/// How far back the candidate search looks.
const CANDIDATE_WINDOW: u32 = 50;

impl DeployEngine {
    /// Roll `app_name` back to `target_id`, deploying its snapshot under
    /// `new_id`. Ends with exactly one terminal entry on `new_id`'s stream.
    pub async fn rollback(
        &self,
        app_name: &str,
        target_id: DeploymentId,
        new_id: DeploymentId,
    ) -> Result<()> {
        let log = EventLog::new(self.broker.clone(), new_id.clone());
        log.info(format!("rolling back {app_name} to {target_id}"));
        match self
            .run_rollback(app_name, &target_id, &new_id, &log)
            .await
        {
            Ok(()) => {
                log.complete("rollback complete");
                Ok(())
            }
            Err(err) => {
                log.fail(&err);
                Err(err)
            }
        }
    }

    async fn run_rollback(
        &self,
        app_name: &str,
        target_id: &DeploymentId,
        new_id: &DeploymentId,
        log: &EventLog,
    ) -> Result<()> {
        let target = self
            .rollback_candidates(app_name)
            .await?
            .into_iter()
            .find(|candidate| candidate.id == *target_id)
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "rollback target {target_id} for {app_name} is not available"
                ))
            })?;
        log.info(format!(
            "replaying snapshot of {} (image {})",
            target.id, target.image_ref
        ));
        self.run_deploy(new_id, target.app_config, log, Some(target_id))
            .await
    }

    /// Rollback targets newest-first, with `is_running` set on the
    /// deployment whose replicas currently serve traffic.
    pub async fn rollback_targets(&self, app_name: &str) -> Result<Vec<RollbackTarget>> {
        let current = self.current_deployment(app_name).await?;
        let candidates = self.rollback_candidates(app_name).await?;
        Ok(candidates
            .into_iter()
            .map(|deployment| RollbackTarget {
                is_running: Some(&deployment.id) == current.as_ref(),
                deployment_id: deployment.id,
                image_ref: deployment.image_ref,
                app_config: deployment.app_config,
            })
            .collect())
    }

    /// Prior deployments whose image is still available under that
    /// deployment's own history strategy.
    async fn rollback_candidates(&self, app_name: &str) -> Result<Vec<Deployment>> {
        let history = self
            .store
            .get_deployment_history(app_name, CANDIDATE_WINDOW)
            .await
            .map_err(haloy_core::Error::from)?;
        let mut candidates = Vec::with_capacity(history.len());
        for deployment in history {
            let available = match deployment.app_config.image.history().strategy {
                HistoryStrategy::None => false,
                HistoryStrategy::Registry => true,
                HistoryStrategy::Local => {
                    self.runtime.image_exists(&deployment.image_ref).await?
                }
            };
            if available {
                candidates.push(deployment);
            }
        }
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{collect_until_terminal, test_engine, web_config, TestEngine};

    fn id(s: &str) -> DeploymentId {
        DeploymentId::parse(s).unwrap()
    }

    #[tokio::test]
    async fn rollback_replays_the_old_snapshot_under_a_new_id() {
        let TestEngine {
            engine, runtime, store, ..
        } = test_engine().await;
        let first = id("20250309143005");
        let second = id("20250309143100");
        let third = id("20250309143200");

        engine.deploy(first.clone(), web_config(1)).await.unwrap();
        engine.deploy(second.clone(), web_config(2)).await.unwrap();

        let mut stream = engine.broker().subscribe_deployment(&third);
        engine
            .rollback("web", first.clone(), third.clone())
            .await
            .unwrap();

        // A new row exists, back-referencing the target.
        let row = store.get_deployment(&third).await.unwrap();
        assert_eq!(row.rolled_back_from.as_deref(), Some(first.as_str()));
        // The snapshot of the target was replayed: one replica, not two.
        assert_eq!(row.app_config.replicas, 1);

        let containers = runtime.containers_for("web");
        assert_eq!(containers.len(), 1);
        assert_eq!(containers[0].labels.deployment_id, third);

        let entries = collect_until_terminal(&mut stream).await;
        assert!(entries.last().unwrap().is_deployment_complete);
    }

    #[tokio::test]
    async fn targets_are_newest_first_with_running_marked() {
        let TestEngine { engine, .. } = test_engine().await;
        let first = id("20250309143005");
        let second = id("20250309143100");
        let third = id("20250309143200");

        engine.deploy(first.clone(), web_config(1)).await.unwrap();
        engine.deploy(second.clone(), web_config(1)).await.unwrap();
        engine
            .rollback("web", first.clone(), third.clone())
            .await
            .unwrap();

        let targets = engine.rollback_targets("web").await.unwrap();
        let ids: Vec<&str> = targets.iter().map(|t| t.deployment_id.as_str()).collect();
        assert_eq!(
            ids,
            ["20250309143200", "20250309143100", "20250309143005"]
        );
        let running: Vec<bool> = targets.iter().map(|t| t.is_running).collect();
        assert_eq!(running, [true, false, false]);
    }

    #[tokio::test]
    async fn unknown_target_fails_with_not_found() {
        let TestEngine { engine, .. } = test_engine().await;
        engine
            .deploy(id("20250309143005"), web_config(1))
            .await
            .unwrap();

        let new_id = id("20250309143200");
        let mut stream = engine.broker().subscribe_deployment(&new_id);
        let err = engine
            .rollback("web", id("20250309140000"), new_id)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        let entries = collect_until_terminal(&mut stream).await;
        let terminal = entries.last().unwrap();
        assert!(terminal.is_deployment_failed);
        assert_eq!(terminal.fields["kind"], "NotFound");
    }

    #[tokio::test]
    async fn locally_missing_images_are_not_candidates() {
        let TestEngine {
            engine, runtime, ..
        } = test_engine().await;
        let first = id("20250309143005");
        let second = id("20250309143100");
        engine.deploy(first.clone(), web_config(1)).await.unwrap();
        engine.deploy(second.clone(), web_config(1)).await.unwrap();

        // The first deployment's image vanished from the local store.
        runtime.drop_image("web:20250309143005");

        let targets = engine.rollback_targets("web").await.unwrap();
        let ids: Vec<&str> = targets.iter().map(|t| t.deployment_id.as_str()).collect();
        assert_eq!(ids, ["20250309143100"]);

        let err = engine
            .rollback("web", first, id("20250309143200"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
