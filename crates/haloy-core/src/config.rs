//! Application configuration.
//!
//! `AppConfig` is what operators submit to the deploy endpoint and what gets
//! persisted verbatim as the deployment snapshot. Wire decoding is strict:
//! unknown fields are rejected so typos fail loudly instead of deploying the
//! wrong thing.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const MAX_NAME_LEN: usize = 63;
const DEFAULT_HISTORY_KEEP: u32 = 10;

fn default_replicas() -> u32 {
    1
}

fn default_health_check_path() -> String {
    "/".to_string()
}

fn default_history_count() -> u32 {
    DEFAULT_HISTORY_KEEP
}

/// A fully described application: what to run, where traffic goes, and what
/// history to keep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct AppConfig {
    /// Unique app slug; also the repository-local image tag prefix.
    pub name: String,
    pub image: ImageConfig,
    #[serde(default = "default_replicas")]
    pub replicas: u32,
    /// Service port inside the container.
    pub port: String,
    #[serde(default = "default_health_check_path")]
    pub health_check_path: String,
    #[serde(default)]
    pub acme_email: String,
    pub domains: Vec<Domain>,
    #[serde(default)]
    pub env: Vec<EnvVar>,
    #[serde(default)]
    pub volumes: Vec<VolumeBind>,
    /// Override for the container network; defaults to the shared bridge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_mode: Option<String>,
}

impl AppConfig {
    /// Fill defaults and enforce invariants, returning the normalized config
    /// that becomes the deployment snapshot.
    pub fn normalize(mut self, default_history_keep: u32) -> Result<AppConfig> {
        let source = self.image.source()?;
        if self.image.history.is_none() {
            self.image.history = Some(HistoryPolicy {
                strategy: match source {
                    ImageSource::Registry { .. } => HistoryStrategy::Registry,
                    ImageSource::Local { .. } => HistoryStrategy::Local,
                },
                count: default_history_keep,
            });
        }
        self.validate()?;
        Ok(self)
    }

    /// Check invariants without mutating. `normalize` calls this after
    /// filling defaults; stored snapshots are expected to already pass.
    pub fn validate(&self) -> Result<()> {
        validate_name(&self.name)?;
        self.image.source()?;
        if self.replicas < 1 {
            return Err(Error::Validation("replicas must be at least 1".into()));
        }
        match self.port.parse::<u16>() {
            Ok(0) | Err(_) => {
                return Err(Error::Validation(format!(
                    "port must be a TCP port number, got {:?}",
                    self.port
                )));
            }
            Ok(_) => {}
        }
        if !self.health_check_path.starts_with('/') {
            return Err(Error::Validation(format!(
                "healthCheckPath must start with '/', got {:?}",
                self.health_check_path
            )));
        }
        if self.domains.is_empty() {
            return Err(Error::Validation(
                "at least one canonical domain is required".into(),
            ));
        }
        for domain in &self.domains {
            if domain.canonical.is_empty() {
                return Err(Error::Validation("domain canonical must not be empty".into()));
            }
        }
        for env in &self.env {
            env.validate()?;
        }
        for volume in &self.volumes {
            volume.validate()?;
        }
        Ok(())
    }
}

fn validate_name(name: &str) -> Result<()> {
    let valid_shape = name
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        && !name.starts_with('-')
        && !name.ends_with('-');
    if name.is_empty() || name.len() > MAX_NAME_LEN || !valid_shape {
        return Err(Error::Validation(format!(
            "app name must be a lowercase slug of at most {MAX_NAME_LEN} chars, got {name:?}"
        )));
    }
    Ok(())
}

/// Where the image comes from and how much history to retain.
///
/// Exactly one of `repository` (registry pull) or `reference` (an image
/// already loaded into the runtime) must be set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ImageConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<HistoryPolicy>,
}

impl ImageConfig {
    /// Resolve the tagged source variant, rejecting configs that specify
    /// both origins or neither.
    pub fn source(&self) -> Result<ImageSource> {
        match (&self.repository, &self.reference) {
            (Some(repository), None) => {
                if repository.is_empty() {
                    return Err(Error::Validation("image repository must not be empty".into()));
                }
                Ok(ImageSource::Registry {
                    repository: repository.clone(),
                    tag: self.tag.clone().unwrap_or_else(|| "latest".to_string()),
                })
            }
            (None, Some(reference)) => {
                if self.tag.is_some() {
                    return Err(Error::Validation(
                        "image tag is only valid with a registry repository".into(),
                    ));
                }
                if reference.is_empty() {
                    return Err(Error::Validation("image reference must not be empty".into()));
                }
                Ok(ImageSource::Local {
                    reference: reference.clone(),
                })
            }
            (Some(_), Some(_)) => Err(Error::Validation(
                "image must specify either repository or reference, not both".into(),
            )),
            (None, None) => Err(Error::Validation(
                "image must specify a repository or a local reference".into(),
            )),
        }
    }

    /// The history policy, with the source-appropriate default when the
    /// config predates normalization.
    pub fn history(&self) -> HistoryPolicy {
        self.history.clone().unwrap_or_else(|| HistoryPolicy {
            strategy: if self.repository.is_some() {
                HistoryStrategy::Registry
            } else {
                HistoryStrategy::Local
            },
            count: DEFAULT_HISTORY_KEEP,
        })
    }
}

/// The resolved image origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Registry { repository: String, tag: String },
    Local { reference: String },
}

impl ImageSource {
    /// The runtime reference used for inspect/pull/tag operations.
    pub fn reference(&self) -> String {
        match self {
            ImageSource::Registry { repository, tag } => format!("{repository}:{tag}"),
            ImageSource::Local { reference } => reference.clone(),
        }
    }
}

/// Retention policy for deployment rows and local images.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct HistoryPolicy {
    #[serde(default)]
    pub strategy: HistoryStrategy,
    #[serde(default = "default_history_count")]
    pub count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryStrategy {
    /// Keep no history: no deployment rows, no rollbacks.
    None,
    /// Keep `count` images locally; rollback targets must be present locally.
    #[default]
    Local,
    /// History images live in the registry; keep only the current one locally.
    Registry,
}

impl std::fmt::Display for HistoryStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HistoryStrategy::None => write!(f, "none"),
            HistoryStrategy::Local => write!(f, "local"),
            HistoryStrategy::Registry => write!(f, "registry"),
        }
    }
}

/// A routable domain: one canonical name plus redirect aliases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct Domain {
    pub canonical: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// One container environment variable: a literal value or a secret lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct EnvVar {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,
}

impl EnvVar {
    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::Validation("env variable name must not be empty".into()));
        }
        match (&self.value, &self.secret_name) {
            (Some(_), None) | (None, Some(_)) => Ok(()),
            _ => Err(Error::Validation(format!(
                "env variable {:?} must set exactly one of value or secretName",
                self.name
            ))),
        }
    }
}

/// A host bind mount.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct VolumeBind {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub read_only: bool,
}

impl VolumeBind {
    fn validate(&self) -> Result<()> {
        if self.source.is_empty() || self.target.is_empty() {
            return Err(Error::Validation("volume source and target must be set".into()));
        }
        Ok(())
    }

    /// Docker bind specification, `source:target[:ro]`.
    pub fn bind_spec(&self) -> String {
        if self.read_only {
            format!("{}:{}:ro", self.source, self.target)
        } else {
            format!("{}:{}", self.source, self.target)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_config() -> AppConfig {
        serde_json::from_value(serde_json::json!({
            "name": "web",
            "image": {"repository": "registry.example.com/web", "tag": "v1"},
            "replicas": 2,
            "port": "8080",
            "healthCheckPath": "/healthz",
            "domains": [{"canonical": "a.test"}],
        }))
        .unwrap()
    }

    #[test]
    fn normalize_fills_history_default() {
        let config = registry_config().normalize(10).unwrap();
        let history = config.image.history();
        assert_eq!(history.strategy, HistoryStrategy::Registry);
        assert_eq!(history.count, 10);
    }

    #[test]
    fn local_reference_defaults_to_local_history() {
        let config: AppConfig = serde_json::from_value(serde_json::json!({
            "name": "web",
            "image": {"reference": "web-preload:latest"},
            "port": "8080",
            "domains": [{"canonical": "a.test"}],
        }))
        .unwrap();
        let config = config.normalize(5).unwrap();
        assert_eq!(config.image.history().strategy, HistoryStrategy::Local);
        assert_eq!(config.image.history().count, 5);
        assert_eq!(config.replicas, 1);
        assert_eq!(config.health_check_path, "/");
    }

    #[test]
    fn rejects_both_image_origins() {
        let config: AppConfig = serde_json::from_value(serde_json::json!({
            "name": "web",
            "image": {"repository": "r/web", "reference": "web:x"},
            "port": "8080",
            "domains": [{"canonical": "a.test"}],
        }))
        .unwrap();
        assert!(matches!(config.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn rejects_missing_image_origin() {
        let config: AppConfig = serde_json::from_value(serde_json::json!({
            "name": "web",
            "image": {},
            "port": "8080",
            "domains": [{"canonical": "a.test"}],
        }))
        .unwrap();
        assert!(matches!(config.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn rejects_unknown_fields() {
        let result = serde_json::from_value::<AppConfig>(serde_json::json!({
            "name": "web",
            "image": {"repository": "r/web"},
            "port": "8080",
            "domains": [{"canonical": "a.test"}],
            "replicaCount": 3,
        }));
        assert!(result.is_err());
    }

    #[test]
    fn rejects_bad_names() {
        let too_long = "x".repeat(64);
        for name in ["", "-web", "web-", "Web", "web app", too_long.as_str()] {
            let mut config = registry_config();
            config.name = name.to_string();
            assert!(config.validate().is_err(), "name {name:?} should be rejected");
        }
        let mut config = registry_config();
        config.name = "web-2".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_empty_domains() {
        let mut config = registry_config();
        config.domains.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_bad_port() {
        for port in ["", "0", "http", "70000"] {
            let mut config = registry_config();
            config.port = port.to_string();
            assert!(config.validate().is_err(), "port {port:?} should be rejected");
        }
    }

    #[test]
    fn env_var_requires_exactly_one_source() {
        let mut config = registry_config();
        config.env = vec![EnvVar {
            name: "DB_URL".into(),
            value: Some("x".into()),
            secret_name: Some("DB_URL".into()),
        }];
        assert!(config.validate().is_err());

        config.env = vec![EnvVar {
            name: "DB_URL".into(),
            value: None,
            secret_name: None,
        }];
        assert!(config.validate().is_err());

        config.env = vec![EnvVar {
            name: "DB_URL".into(),
            value: None,
            secret_name: Some("DB_URL".into()),
        }];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn image_source_reference() {
        let source = ImageSource::Registry {
            repository: "registry.example.com/web".into(),
            tag: "v1".into(),
        };
        assert_eq!(source.reference(), "registry.example.com/web:v1");

        let source = ImageSource::Local {
            reference: "web-preload:latest".into(),
        };
        assert_eq!(source.reference(), "web-preload:latest");
    }

    #[test]
    fn volume_bind_spec() {
        let bind = VolumeBind {
            source: "/srv/data".into(),
            target: "/data".into(),
            read_only: true,
        };
        assert_eq!(bind.bind_spec(), "/srv/data:/data:ro");
    }

    #[test]
    fn snapshot_round_trips_through_json() {
        let config = registry_config().normalize(3).unwrap();
        let json = serde_json::to_string(&config).unwrap();
        let back: AppConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);
    }
}
