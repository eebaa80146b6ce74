//! Deployment history persistence.

use haloy_core::deployment::Deployment;
use haloy_core::id::DeploymentId;

use crate::error::{StoreError, StoreResult};
use crate::Store;

#[derive(Debug, sqlx::FromRow)]
struct DeploymentRow {
    id: String,
    app_name: String,
    app_config: String,
    image_ref: String,
    rolled_back_from: Option<String>,
}

impl TryFrom<DeploymentRow> for Deployment {
    type Error = StoreError;

    fn try_from(row: DeploymentRow) -> StoreResult<Deployment> {
        let id = DeploymentId::parse(&row.id)
            .map_err(|e| StoreError::Corrupt(format!("deployment id {:?}: {e}", row.id)))?;
        let app_config = serde_json::from_str(&row.app_config)
            .map_err(|e| StoreError::Corrupt(format!("snapshot for {}: {e}", row.id)))?;
        Ok(Deployment {
            id,
            app_name: row.app_name,
            app_config,
            image_ref: row.image_ref,
            rolled_back_from: row.rolled_back_from,
        })
    }
}

impl Store {
    /// Insert a deployment row. Fails with `Duplicate` if the id exists.
    pub async fn save_deployment(&self, deployment: &Deployment) -> StoreResult<()> {
        let snapshot = serde_json::to_string(&deployment.app_config)
            .map_err(|e| StoreError::Corrupt(format!("serializing snapshot: {e}")))?;
        let result = sqlx::query(
            r#"
            INSERT INTO deployments (id, app_name, app_config, image_ref, rolled_back_from)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(deployment.id.as_str())
        .bind(&deployment.app_name)
        .bind(&snapshot)
        .bind(&deployment.image_ref)
        .bind(&deployment.rolled_back_from)
        .execute(self.pool())
        .await;
        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(
                StoreError::Duplicate(format!("deployment {}", deployment.id)),
            ),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_deployment(&self, id: &DeploymentId) -> StoreResult<Deployment> {
        let row = sqlx::query_as::<_, DeploymentRow>("SELECT * FROM deployments WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("deployment {id}")))?;
        row.try_into()
    }

    /// The newest `limit` deployments for an app, newest first.
    pub async fn get_deployment_history(
        &self,
        app_name: &str,
        limit: u32,
    ) -> StoreResult<Vec<Deployment>> {
        let rows = sqlx::query_as::<_, DeploymentRow>(
            "SELECT * FROM deployments WHERE app_name = $1 ORDER BY id DESC LIMIT $2",
        )
        .bind(app_name)
        .bind(i64::from(limit))
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(Deployment::try_from).collect()
    }

    /// Delete all but the `keep` newest deployments for an app. Returns how
    /// many rows were pruned.
    pub async fn prune_old_deployments(&self, app_name: &str, keep: u32) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM deployments
            WHERE app_name = $1
              AND id NOT IN (
                SELECT id FROM deployments
                WHERE app_name = $1
                ORDER BY id DESC
                LIMIT $2
              )
            "#,
        )
        .bind(app_name)
        .bind(i64::from(keep))
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected())
    }
}
