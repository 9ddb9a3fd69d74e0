//! Daemon configuration.
//!
//! Read from `$PAWLINK_CONFIG`, or `~/.config/pawlink/config.json` when the
//! variable is unset. Every field has a default, so a missing file or a
//! partial one is fine.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use pawlink_device_registration::{RegistrationConfig, RetryPolicy};
use pawlink_hub_connection::{ReconnectConfig, SessionConfig};
use pawlink_hub_store::StoreConfig;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectSection {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            max_attempts: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegistrationSection {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for RegistrationSection {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_delay_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HubdConfig {
    /// Base URL of the REST API.
    pub api_base_url: String,
    /// WebSocket URL of the hub relay.
    pub socket_url: String,
    /// Bearer token for both REST and the relay.
    pub token: String,
    pub poll_interval_secs: u64,
    pub offline_threshold_secs: u64,
    pub reconnect: ReconnectSection,
    pub registration: RegistrationSection,
}

impl Default for HubdConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:3000/api".into(),
            socket_url: "ws://localhost:3000/socket".into(),
            token: String::new(),
            poll_interval_secs: 45,
            offline_threshold_secs: 120,
            reconnect: ReconnectSection::default(),
            registration: RegistrationSection::default(),
        }
    }
}

impl HubdConfig {
    /// Loads the configuration from its default location.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&config_path()?)
    }

    /// Loads `path`. A missing file yields defaults; so does one that does
    /// not parse, with a warning.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        match serde_json::from_str::<HubdConfig>(&content) {
            Ok(config) => Ok(config),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config, using defaults"
                );
                Ok(Self::default())
            }
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::new(&self.socket_url, &self.token)
    }

    pub fn reconnect_config(&self) -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: Duration::from_millis(self.reconnect.initial_delay_ms),
            max_delay: Duration::from_millis(self.reconnect.max_delay_ms),
            max_attempts: self.reconnect.max_attempts,
            ..ReconnectConfig::default()
        }
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            offline_threshold: Duration::from_secs(self.offline_threshold_secs),
            poll_interval: Duration::from_secs(self.poll_interval_secs),
        }
    }

    pub fn registration_config(&self) -> RegistrationConfig {
        RegistrationConfig {
            retry: RetryPolicy {
                max_retries: self.registration.max_retries,
                delay: Duration::from_millis(self.registration.retry_delay_ms),
            },
            ..RegistrationConfig::default()
        }
    }
}

fn config_path() -> anyhow::Result<PathBuf> {
    if let Ok(path) = std::env::var("PAWLINK_CONFIG") {
        return Ok(PathBuf::from(path));
    }
    let home = std::env::var("HOME").map_err(|_| anyhow::anyhow!("HOME is not set"))?;
    Ok(PathBuf::from(home)
        .join(".config")
        .join("pawlink")
        .join("config.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = HubdConfig::load_from(&dir.path().join("config.json")).unwrap();
        assert_eq!(cfg, HubdConfig::default());
        assert_eq!(cfg.store_config(), StoreConfig::default());
        assert_eq!(cfg.registration_config(), RegistrationConfig::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "apiBaseUrl": "https://api.example.test",
                "token": "secret",
                "pollIntervalSecs": 60,
                "reconnect": { "maxAttempts": 3 },
                "registration": { "retryDelayMs": 250 }
            }"#,
        )
        .unwrap();

        let cfg = HubdConfig::load_from(&path).unwrap();

        assert_eq!(cfg.api_base_url, "https://api.example.test");
        assert_eq!(cfg.token, "secret");
        assert_eq!(cfg.socket_url, "ws://localhost:3000/socket");
        assert_eq!(cfg.store_config().poll_interval, Duration::from_secs(60));
        let reconnect = cfg.reconnect_config();
        assert_eq!(reconnect.max_attempts, 3);
        assert_eq!(reconnect.initial_delay, Duration::from_secs(1));
        let registration = cfg.registration_config();
        assert_eq!(registration.retry.max_retries, 2);
        assert_eq!(registration.retry.delay, Duration::from_millis(250));
    }

    #[test]
    fn unparsable_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(HubdConfig::load_from(&path).unwrap(), HubdConfig::default());
    }
}
