//! Log entries published to the log broker.
//!
//! Every line the deploy engine emits becomes one `LogEntry`. Entries bound
//! to a deployment carry its id; each deployment ends with exactly one
//! terminal entry (`is_deployment_complete` xor `is_deployment_failed`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::id::DeploymentId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// A structured log event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub fields: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_id: Option<DeploymentId>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_deployment_complete: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_deployment_failed: bool,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            fields: Map::new(),
            deployment_id: None,
            is_deployment_complete: false,
            is_deployment_failed: false,
        }
    }

    pub fn with_deployment(mut self, id: DeploymentId) -> Self {
        self.deployment_id = Some(id);
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Mark this entry as the successful terminal event of its deployment.
    pub fn completed(mut self) -> Self {
        self.is_deployment_complete = true;
        self
    }

    /// Mark this entry as the failed terminal event of its deployment.
    pub fn failed(mut self) -> Self {
        self.is_deployment_failed = true;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.is_deployment_complete || self.is_deployment_failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_flags_are_exclusive_by_construction() {
        let done = LogEntry::new(LogLevel::Info, "deployment complete").completed();
        assert!(done.is_terminal());
        assert!(!done.is_deployment_failed);

        let failed = LogEntry::new(LogLevel::Error, "deployment failed").failed();
        assert!(failed.is_terminal());
        assert!(!failed.is_deployment_complete);
    }

    #[test]
    fn serializes_camel_case_and_omits_empty() {
        let entry = LogEntry::new(LogLevel::Info, "starting");
        let json = serde_json::to_value(&entry).unwrap();
        let object = json.as_object().unwrap();
        assert!(object.contains_key("timestamp"));
        assert!(!object.contains_key("deploymentId"));
        assert!(!object.contains_key("isDeploymentComplete"));
        assert!(!object.contains_key("fields"));

        let entry = entry
            .with_deployment(DeploymentId::parse("20250309143005").unwrap())
            .with_field("kind", "HealthError")
            .failed();
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["deploymentId"], "20250309143005");
        assert_eq!(json["isDeploymentFailed"], true);
        assert_eq!(json["fields"]["kind"], "HealthError");
    }
}
