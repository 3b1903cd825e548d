//! Crosswire configuration.
//!
//! TOML-based configuration with one section per component and environment
//! variable overrides for addresses and credentials.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Validation(String),
}

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub consul: ConsulSection,
    pub etcd: EtcdSection,
    pub grid: GridSection,
    pub cache: CacheSection,
    pub servicenow: ServiceNowSection,
}

impl AppConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw)?;
        Ok(config)
    }

    /// Fail fast on settings a component cannot start with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.consul.url.trim().is_empty() {
            return Err(ConfigError::Validation("consul.url must not be empty".into()));
        }
        if self.etcd.url.trim().is_empty() {
            return Err(ConfigError::Validation("etcd.url must not be empty".into()));
        }

        if self.servicenow.enabled {
            if self.servicenow.instance_url.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "servicenow.instance_url is required when the component is enabled".into(),
                ));
            }
            if self.servicenow.username.trim().is_empty()
                || self.servicenow.password.trim().is_empty()
            {
                return Err(ConfigError::Validation(
                    "servicenow credentials are required when the component is enabled".into(),
                ));
            }
        }

        Ok(())
    }
}

/// Key/value coordination service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsulSection {
    pub url: String,
    pub acl_token: Option<String>,
    pub key: Option<String>,
    pub recursive: bool,
    pub value_as_string: bool,
    pub block_seconds: u64,
    pub emit_on_timeout: bool,
}

impl Default for ConsulSection {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8500".to_string(),
            acl_token: None,
            key: None,
            recursive: false,
            value_as_string: false,
            block_seconds: 10,
            emit_on_timeout: false,
        }
    }
}

/// Second key/value store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EtcdSection {
    pub url: String,
    pub path: Option<String>,
    pub recursive: bool,
    pub timeout_ms: u64,
    pub send_empty_exchange_on_timeout: bool,
}

impl Default for EtcdSection {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:2379".to_string(),
            path: None,
            recursive: false,
            timeout_ms: 30_000,
            send_empty_exchange_on_timeout: false,
        }
    }
}

/// Tree data grid settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GridSection {
    pub path: Option<String>,
    pub subscribe_map_events: bool,
    pub subscribe_topology_events: bool,
    pub subscribe_topic_events: bool,
}

impl Default for GridSection {
    fn default() -> Self {
        Self {
            path: None,
            subscribe_map_events: true,
            subscribe_topology_events: false,
            subscribe_topic_events: false,
        }
    }
}

/// Embeddable cache settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CacheSection {
    pub action: Option<String>,
    pub key: Option<String>,
}

/// Ticketing/ITSM settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServiceNowSection {
    pub enabled: bool,
    pub instance_url: String,
    pub username: String,
    pub password: String,
    pub oauth_client_id: Option<String>,
    pub oauth_client_secret: Option<String>,
}
