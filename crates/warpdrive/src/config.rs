//! Task plugin configuration
//!
//! Loaded from a mounted YAML file; anything missing falls back to defaults.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::error::{Error, Result};

/// Environment variable overriding `serviceApi.address`.
pub const SERVICE_API_ADDRESS_ENV: &str = "SERVICE_API_ADDRESS";

/// Main plugin configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PluginConfig {
    /// Project/service HTTP API
    #[serde(default, rename = "serviceApi")]
    pub service_api: ServiceApiConfig,

    /// Rollout behaviour
    #[serde(default)]
    pub deploy: DeployConfig,

    /// Ownership labels stamped on workloads this system deployed
    #[serde(default)]
    pub labels: LabelConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceApiConfig {
    /// Base URL, e.g. `http://aslan:25000`
    #[serde(default = "default_service_api_address")]
    pub address: String,

    #[serde(default = "default_http_timeout", rename = "timeoutSecs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeployConfig {
    /// Used when a task carries no timeout of its own
    #[serde(default = "default_deploy_timeout", rename = "defaultTimeoutSecs")]
    pub default_timeout_secs: u64,

    #[serde(default = "default_poll_interval", rename = "pollIntervalSecs")]
    pub poll_interval_secs: u64,

    /// Delay before looking up the ReplicaSet a patched Deployment rolled out
    #[serde(default = "default_replica_set_grace", rename = "replicaSetGraceSecs")]
    pub replica_set_grace_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LabelConfig {
    #[serde(default = "default_product_label")]
    pub product: String,

    #[serde(default = "default_service_label")]
    pub service: String,
}

fn default_service_api_address() -> String {
    "http://aslan:25000".to_string()
}

fn default_http_timeout() -> u64 {
    30
}

fn default_deploy_timeout() -> u64 {
    600
}

fn default_poll_interval() -> u64 {
    2
}

fn default_replica_set_grace() -> u64 {
    3
}

fn default_product_label() -> String {
    "s-product".to_string()
}

fn default_service_label() -> String {
    "s-service".to_string()
}

impl Default for ServiceApiConfig {
    fn default() -> Self {
        Self {
            address: default_service_api_address(),
            timeout_secs: default_http_timeout(),
        }
    }
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_deploy_timeout(),
            poll_interval_secs: default_poll_interval(),
            replica_set_grace_secs: default_replica_set_grace(),
        }
    }
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            product: default_product_label(),
            service: default_service_label(),
        }
    }
}

impl DeployConfig {
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    #[must_use]
    pub fn replica_set_grace(&self) -> Duration {
        Duration::from_secs(self.replica_set_grace_secs)
    }
}

impl PluginConfig {
    /// Load configuration from a mounted YAML file.
    ///
    /// A missing file yields the defaults; a malformed one is an error.
    pub fn from_mounted_file(config_path: &str) -> Result<Self> {
        let mut config = match std::fs::read_to_string(config_path) {
            Ok(contents) => Self::from_yaml(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %config_path, "No config file mounted, using defaults");
                Self::default()
            }
            Err(e) => {
                return Err(Error::Config(format!(
                    "failed to read config file {config_path}: {e}"
                )))
            }
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        serde_yaml::from_str(contents)
            .map_err(|e| Error::Config(format!("failed to parse config: {e}")))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(address) = std::env::var(SERVICE_API_ADDRESS_ENV) {
            if !address.trim().is_empty() {
                self.service_api.address = address;
            }
        }
    }

    /// Reject configurations the plugin cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.service_api.address.trim().is_empty() {
            return Err(Error::Config("serviceApi.address must not be empty".into()));
        }
        if self.deploy.poll_interval_secs == 0 {
            return Err(Error::Config("deploy.pollIntervalSecs must be positive".into()));
        }
        if self.deploy.default_timeout_secs == 0 {
            return Err(Error::Config(
                "deploy.defaultTimeoutSecs must be positive".into(),
            ));
        }
        if self.labels.product.is_empty() || self.labels.service.is_empty() {
            return Err(Error::Config("ownership label keys must be set".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_deserialization() {
        let yaml = r"
serviceApi:
  address: http://aslan.zadig:25000
deploy:
  defaultTimeoutSecs: 900
  pollIntervalSecs: 5
labels:
  product: app.example.com/project
";
        let config = PluginConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.service_api.address, "http://aslan.zadig:25000");
        assert_eq!(config.service_api.timeout_secs, 30);
        assert_eq!(config.deploy.default_timeout_secs, 900);
        assert_eq!(config.deploy.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.deploy.replica_set_grace_secs, 3);
        assert_eq!(config.labels.product, "app.example.com/project");
        assert_eq!(config.labels.service, "s-service");
    }

    #[test]
    fn test_default_config() {
        let config = PluginConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.deploy.default_timeout_secs, 600);
        assert_eq!(config.deploy.poll_interval_secs, 2);
        assert_eq!(config.labels.product, "s-product");
    }

    #[test]
    fn validate_rejects_zero_poll_interval() {
        let mut config = PluginConfig::default();
        config.deploy.poll_interval_secs = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = PluginConfig::from_mounted_file("/nonexistent/warpdrive.yaml").unwrap();
        assert_eq!(config.deploy.replica_set_grace_secs, 3);
    }
}
