//! Shared application state.

use std::future::Future;
use std::sync::Arc;

use haloy_broker::LogBroker;
use haloy_core::id::{DeploymentId, IdFactory};
use haloy_engine::{DeployEngine, EventLog};
use haloy_runtime::ContainerRuntime;
use haloy_store::Store;
use haloy_vault::Vault;

use crate::config::ServerConfig;

/// Everything the handlers need, behind cheap clones.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<DeployEngine>,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub store: Store,
    pub vault: Arc<Vault>,
    pub broker: Arc<LogBroker>,
    pub ids: Arc<IdFactory>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        store: Store,
        vault: Arc<Vault>,
        broker: Arc<LogBroker>,
        ids: Arc<IdFactory>,
        config: ServerConfig,
    ) -> Self {
        let engine = Arc::new(DeployEngine::new(
            Arc::clone(&runtime),
            store.clone(),
            Arc::clone(&vault),
            Arc::clone(&broker),
            config.history_keep,
        ));
        Self {
            engine,
            runtime,
            store,
            vault,
            broker,
            ids,
            config: Arc::new(config),
        }
    }

    /// Run an accepted deploy/rollback as a detached task with its own
    /// deadline, decoupled from the request that admitted it. The engine
    /// emits its own terminal entry; only a deadline overrun needs one from
    /// us.
    pub fn dispatch<F>(&self, deployment_id: DeploymentId, operation: F)
    where
        F: Future<Output = haloy_core::Result<()>> + Send + 'static,
    {
        let timeout = self.config.context_timeout;
        let broker = Arc::clone(&self.broker);
        tokio::spawn(async move {
            if tokio::time::timeout(timeout, operation).await.is_err() {
                let err = haloy_core::Error::Timeout(format!(
                    "operation exceeded {}s and was cancelled",
                    timeout.as_secs()
                ));
                EventLog::new(broker, deployment_id).fail(&err);
            }
        });
    }
}
