//! Encrypted secret persistence.
//!
//! Only ciphertext ever touches the database. Listings expose an MD5
//! fingerprint of the ciphertext so operators can spot drift between hosts
//! without revealing values; it carries no security weight.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{StoreError, StoreResult};
use crate::Store;

/// Secret listing entry: everything but the value.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretMetadata {
    pub name: String,
    /// MD5 fingerprint of the stored ciphertext.
    pub digest_value: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Store {
    /// Insert or replace a secret's ciphertext, refreshing `updated_at`.
    pub async fn set_secret(&self, name: &str, ciphertext: &str) -> StoreResult<()> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO secrets (name, encrypted_value, created_at, updated_at)
            VALUES ($1, $2, $3, $3)
            ON CONFLICT (name) DO UPDATE SET
                encrypted_value = excluded.encrypted_value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(name)
        .bind(ciphertext)
        .bind(now)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_secret_ciphertext(&self, name: &str) -> StoreResult<String> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT encrypted_value FROM secrets WHERE name = $1")
                .bind(name)
                .fetch_optional(self.pool())
                .await?;
        row.map(|(ciphertext,)| ciphertext)
            .ok_or_else(|| StoreError::NotFound(format!("secret {name}")))
    }

    /// All secrets, most recently updated first.
    pub async fn list_secrets(&self) -> StoreResult<Vec<SecretMetadata>> {
        let rows: Vec<(String, String, DateTime<Utc>, DateTime<Utc>)> = sqlx::query_as(
            r#"
            SELECT name, encrypted_value, created_at, updated_at
            FROM secrets
            ORDER BY updated_at DESC, name ASC
            "#,
        )
        .fetch_all(self.pool())
        .await?;
        Ok(rows
            .into_iter()
            .map(|(name, ciphertext, created_at, updated_at)| SecretMetadata {
                name,
                digest_value: format!("{:x}", md5::compute(ciphertext.as_bytes())),
                created_at,
                updated_at,
            })
            .collect())
    }

    /// Delete a secret; `NotFound` if no row was affected.
    pub async fn delete_secret(&self, name: &str) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM secrets WHERE name = $1")
            .bind(name)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("secret {name}")));
        }
        Ok(())
    }
}
