//! Deploy and rollback engine.
//!
//! The engine owns the deployment state machine: image preparation,
//! container lifecycle, health gating, superseding the previous rollout,
//! retention, and history persistence. Every step is narrated through the
//! log broker; each deploy or rollback ends with exactly one terminal log
//! entry.

pub mod deploy;
pub mod logger;
pub mod ops;
pub mod rollback;

#[cfg(test)]
mod testutil;

pub use logger::EventLog;
pub use ops::{AppStatus, StopOutcome};

use std::sync::Arc;

use async_trait::async_trait;

use haloy_broker::LogBroker;
use haloy_runtime::ContainerRuntime;
use haloy_store::Store;
use haloy_vault::{SecretCiphertexts, Vault};

/// The deployment engine. Cheap to clone behind `Arc`s in app state.
pub struct DeployEngine {
    runtime: Arc<dyn ContainerRuntime>,
    store: Store,
    vault: Arc<Vault>,
    broker: Arc<LogBroker>,
    history_keep_default: u32,
}

impl DeployEngine {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        store: Store,
        vault: Arc<Vault>,
        broker: Arc<LogBroker>,
        history_keep_default: u32,
    ) -> Self {
        Self {
            runtime,
            store,
            vault,
            broker,
            history_keep_default,
        }
    }

    pub fn broker(&self) -> &Arc<LogBroker> {
        &self.broker
    }
}

/// Lets the vault read secret ciphertext straight from the store during env
/// resolution.
pub(crate) struct StoreSecrets<'a>(pub &'a Store);

#[async_trait]
impl SecretCiphertexts for StoreSecrets<'_> {
    async fn secret_ciphertext(&self, name: &str) -> haloy_core::Result<String> {
        self.0
            .get_secret_ciphertext(name)
            .await
            .map_err(haloy_core::Error::from)
    }
}
