//! Process configuration, loaded once from the environment at startup.

use std::net::SocketAddr;
use std::time::Duration;

use haloy_core::{Error, Result};

const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:9999";
const DEFAULT_DB_PATH: &str = "haloy.db";
const DEFAULT_IDENTITY_ENV: &str = "HALOY_IDENTITY";
const DEFAULT_NETWORK_NAME: &str = "haloy-public";
const DEFAULT_CONTEXT_TIMEOUT_SECS: u64 = 300;
const DEFAULT_HISTORY_KEEP: u32 = 10;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bearer token required on every non-health route.
    pub api_token: String,
    pub log_level: String,
    pub listen_addr: SocketAddr,
    pub db_path: String,
    /// Name of the environment variable holding the encryption identity.
    pub identity_env: String,
    /// The shared bridge network managed containers attach to.
    pub network_name: String,
    /// Deadline for a background deploy/rollback task.
    pub context_timeout: Duration,
    /// Deployment rows kept per app when the config does not say.
    pub history_keep: u32,
    /// Relayed by the version endpoint; the proxy itself is external.
    pub haproxy_version: String,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        let api_token = std::env::var("HALOY_API_TOKEN")
            .ok()
            .filter(|token| !token.is_empty())
            .ok_or_else(|| Error::Validation("HALOY_API_TOKEN must be set".into()))?;

        let listen_addr = env_or("HALOY_LISTEN_ADDR", DEFAULT_LISTEN_ADDR)
            .parse()
            .map_err(|e| Error::Validation(format!("HALOY_LISTEN_ADDR: {e}")))?;

        let context_timeout = match std::env::var("HALOY_CONTEXT_TIMEOUT_SECS") {
            Ok(raw) => Duration::from_secs(
                raw.parse()
                    .map_err(|e| Error::Validation(format!("HALOY_CONTEXT_TIMEOUT_SECS: {e}")))?,
            ),
            Err(_) => Duration::from_secs(DEFAULT_CONTEXT_TIMEOUT_SECS),
        };

        let history_keep = match std::env::var("HALOY_HISTORY_KEEP") {
            Ok(raw) => raw
                .parse()
                .map_err(|e| Error::Validation(format!("HALOY_HISTORY_KEEP: {e}")))?,
            Err(_) => DEFAULT_HISTORY_KEEP,
        };

        Ok(Self {
            api_token,
            log_level: env_or("HALOY_LOG_LEVEL", "info"),
            listen_addr,
            db_path: env_or("HALOY_DB_PATH", DEFAULT_DB_PATH),
            identity_env: env_or("HALOY_IDENTITY_ENV", DEFAULT_IDENTITY_ENV),
            network_name: env_or("HALOY_NETWORK_NAME", DEFAULT_NETWORK_NAME),
            context_timeout,
            history_keep,
            haproxy_version: env_or("HALOY_HAPROXY_VERSION", "unknown"),
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}
