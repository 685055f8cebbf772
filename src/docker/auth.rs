//! Registry credentials

use crate::error::{Result, StevedoreError};
use bollard::auth::DockerCredentials;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Username and password for the docker registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthConfig {
    pub username: String,
    pub password: String,
}

impl AuthConfig {
    /// Create credentials; both parts must be set
    pub fn new(username: &str, password: &str) -> Result<Self> {
        if username.is_empty() || password.is_empty() {
            return Err(StevedoreError::MissingCredentials);
        }

        Ok(Self {
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    /// Credentials in the form the engine API expects
    pub fn credentials(&self, registry: &str) -> DockerCredentials {
        DockerCredentials {
            username: Some(self.username.clone()),
            password: Some(self.password.clone()),
            serveraddress: if registry.is_empty() {
                None
            } else {
                Some(registry.to_string())
            },
            ..Default::default()
        }
    }

    /// Per-registry credentials map, as used by image builds
    pub fn credentials_map(&self, registry: &str) -> HashMap<String, DockerCredentials> {
        let mut configs = HashMap::new();
        configs.insert(registry.to_string(), self.credentials(registry));
        configs
    }
}

/// Registry location together with the account used to operate on it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryCompose {
    /// Registry address, e.g. cargo.caicloud.io
    #[serde(rename = "registrylocation", skip_serializing_if = "String::is_empty")]
    pub registry_location: String,
    #[serde(rename = "registryusername", skip_serializing_if = "String::is_empty")]
    pub registry_username: String,
    #[serde(rename = "registrypassword", skip_serializing_if = "String::is_empty")]
    pub registry_password: String,
}

impl RegistryCompose {
    pub fn auth_config(&self) -> Result<AuthConfig> {
        AuthConfig::new(&self.registry_username, &self.registry_password)
    }
}
