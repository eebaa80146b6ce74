//! Per-deployment event logging.
//!
//! Engine steps are narrated twice: as `tracing` diagnostics for the host
//! operator, and as structured [`LogEntry`] values on the broker for the
//! client following the rollout over SSE.

use std::sync::Arc;

use serde_json::Value;
use tracing::{error, info, warn};

use haloy_broker::LogBroker;
use haloy_core::id::DeploymentId;
use haloy_core::log::{LogEntry, LogLevel};
use haloy_core::Error;

/// A logger bound to one deployment id.
pub struct EventLog {
    broker: Arc<LogBroker>,
    deployment_id: DeploymentId,
}

impl EventLog {
    pub fn new(broker: Arc<LogBroker>, deployment_id: DeploymentId) -> Self {
        Self {
            broker,
            deployment_id,
        }
    }

    pub fn deployment_id(&self) -> &DeploymentId {
        &self.deployment_id
    }

    fn publish(&self, entry: LogEntry) {
        self.broker
            .publish(entry.with_deployment(self.deployment_id.clone()));
    }

    pub fn info(&self, message: impl Into<String>) {
        let message = message.into();
        info!(deployment_id = %self.deployment_id, "{message}");
        self.publish(LogEntry::new(LogLevel::Info, message));
    }

    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        warn!(deployment_id = %self.deployment_id, "{message}");
        self.publish(LogEntry::new(LogLevel::Warn, message));
    }

    pub fn info_with(&self, message: impl Into<String>, fields: &[(&str, Value)]) {
        let message = message.into();
        info!(deployment_id = %self.deployment_id, "{message}");
        let mut entry = LogEntry::new(LogLevel::Info, message);
        for (key, value) in fields {
            entry = entry.with_field(*key, value.clone());
        }
        self.publish(entry);
    }

    /// Emit the successful terminal entry.
    pub fn complete(&self, message: impl Into<String>) {
        let message = message.into();
        info!(deployment_id = %self.deployment_id, "{message}");
        self.publish(LogEntry::new(LogLevel::Info, message).completed());
    }

    /// Emit the failed terminal entry, carrying the machine-readable kind.
    pub fn fail(&self, err: &Error) {
        error!(deployment_id = %self.deployment_id, kind = err.kind(), "deployment failed: {err}");
        self.publish(
            LogEntry::new(LogLevel::Error, format!("deployment failed: {err}"))
                .with_field("kind", err.kind())
                .failed(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn entries_are_bound_to_the_deployment() {
        let broker = Arc::new(LogBroker::new());
        let id = DeploymentId::parse("20250309143005").unwrap();
        let mut stream = broker.subscribe_deployment(&id);

        let log = EventLog::new(Arc::clone(&broker), id.clone());
        log.info("starting");
        log.fail(&Error::Health("probe failed".into()));

        let first = stream.recv().await.unwrap();
        assert_eq!(first.deployment_id.as_ref(), Some(&id));
        assert_eq!(first.message, "starting");

        let terminal = stream.recv().await.unwrap();
        assert!(terminal.is_deployment_failed);
        assert_eq!(terminal.fields["kind"], "HealthError");
    }
}
