//! Configuration
//!
//! Settings come from three layers, later ones winning: built-in defaults, a
//! YAML file, and environment variables. The CLI applies its own flags on top.

use crate::docker::{RegistryCompose, DEFAULT_TIMEOUT_SECS};
use crate::error::{Result, StevedoreError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Default Docker daemon endpoint
pub const DEFAULT_DOCKER_ENDPOINT: &str = "unix:///var/run/docker.sock";

/// Default etcd endpoint
pub const DEFAULT_ETCD_ENDPOINT: &str = "http://127.0.0.1:2379";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Docker daemon connection
    pub docker: DockerConfig,
    /// Registry location and credentials
    pub registry: RegistryCompose,
    /// etcd connection
    pub etcd: EtcdConfig,
}

/// Docker daemon connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    /// Daemon endpoint (`unix://`, `tcp://` or `http(s)://`)
    pub endpoint: String,
    /// Directory holding `cert.pem`, `key.pem` and `ca.pem`
    pub cert_path: Option<PathBuf>,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_DOCKER_ENDPOINT.to_string(),
            cert_path: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// etcd connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EtcdConfig {
    /// Gateway endpoints, tried in order
    pub endpoints: Vec<String>,
    /// Connect timeout in milliseconds
    pub dial_timeout_ms: u64,
    /// Per-request timeout in milliseconds
    pub request_timeout_ms: u64,
    /// Username for etcd authentication
    pub username: Option<String>,
    /// Password for etcd authentication
    pub password: Option<String>,
}

impl Default for EtcdConfig {
    fn default() -> Self {
        Self {
            endpoints: vec![DEFAULT_ETCD_ENDPOINT.to_string()],
            dial_timeout_ms: 5_000,
            request_timeout_ms: 10_000,
            username: None,
            password: None,
        }
    }
}

impl EtcdConfig {
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Config {
    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("stevedore").join("config.yaml"))
    }

    /// Load configuration from `path`, or from the default location when it exists
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => match Self::default_path() {
                Some(p) if p.exists() => Self::from_file(&p)?,
                _ => Self::default(),
            },
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse a YAML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading config from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse YAML config content
    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Override fields from environment variables, looked up through `var`
    pub fn apply_env<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = var("DOCKER_HOST") {
            self.docker.endpoint = host;
        }
        if let Some(path) = var("DOCKER_CERT_PATH") {
            self.docker.cert_path = Some(PathBuf::from(path));
        }
        if let Some(registry) = var("STEVEDORE_REGISTRY") {
            self.registry.registry_location = registry;
        }
        if let Some(username) = var("STEVEDORE_REGISTRY_USERNAME") {
            self.registry.registry_username = username;
        }
        if let Some(password) = var("STEVEDORE_REGISTRY_PASSWORD") {
            self.registry.registry_password = password;
        }
        if let Some(endpoints) = var("ETCD_ENDPOINTS") {
            self.etcd.endpoints = endpoints
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
    }

    /// Reject settings no adapter can work with
    pub fn validate(&self) -> Result<()> {
        if self.docker.endpoint.is_empty() {
            return Err(StevedoreError::InvalidConfig(
                "docker.endpoint must not be empty".to_string(),
            ));
        }
        if self.docker.endpoint.starts_with("https://") && self.docker.cert_path.is_none() {
            return Err(StevedoreError::InvalidConfig(
                "docker.cert_path is required for an https:// endpoint".to_string(),
            ));
        }
        if self.etcd.endpoints.is_empty() {
            return Err(StevedoreError::InvalidConfig(
                "etcd.endpoints must list at least one endpoint".to_string(),
            ));
        }
        if self.etcd.dial_timeout_ms == 0 || self.etcd.request_timeout_ms == 0 {
            return Err(StevedoreError::InvalidConfig(
                "etcd timeouts must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
