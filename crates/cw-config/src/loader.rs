//! Configuration loader with file and environment variable support.

use std::env;
use std::path::PathBuf;

use tracing::info;

use crate::{AppConfig, ConfigError};

/// Standard config file search paths.
const CONFIG_PATHS: &[&str] = &[
    "crosswire.toml",
    "config.toml",
    "./config/crosswire.toml",
    "/etc/crosswire/config.toml",
];

/// Configuration loader.
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load configuration from file (if found) with environment variable
    /// overrides, then validate it.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = AppConfig::default();

        if let Some(path) = self.find_config_file() {
            info!(?path, "loading configuration from file");
            config = AppConfig::from_file(&path)?;
        }

        self.apply_env_overrides(&mut config);
        config.validate()?;

        Ok(config)
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
        }

        if let Ok(path) = env::var("CROSSWIRE_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        for path in CONFIG_PATHS {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        None
    }

    /// Addresses and credentials can be injected through the environment,
    /// overriding whatever the file said.
    fn apply_env_overrides(&self, config: &mut AppConfig) {
        if let Ok(url) = env::var("CROSSWIRE_CONSUL_URL") {
            config.consul.url = url;
        }
        if let Ok(token) = env::var("CROSSWIRE_CONSUL_ACL_TOKEN") {
            config.consul.acl_token = Some(token);
        }
        if let Ok(url) = env::var("CROSSWIRE_ETCD_URL") {
            config.etcd.url = url;
        }
        if let Ok(url) = env::var("CROSSWIRE_SERVICENOW_URL") {
            config.servicenow.instance_url = url;
        }
        if let Ok(username) = env::var("CROSSWIRE_SERVICENOW_USERNAME") {
            config.servicenow.username = username;
        }
        if let Ok(password) = env::var("CROSSWIRE_SERVICENOW_PASSWORD") {
            config.servicenow.password = password;
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
