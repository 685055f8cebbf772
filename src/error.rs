//! Error types for Stevedore

use thiserror::Error;

/// Result type for Stevedore operations
pub type Result<T> = std::result::Result<T, StevedoreError>;

/// Stevedore error types
#[derive(Error, Debug)]
pub enum StevedoreError {
    #[error("Docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("Docker daemon reported: {0}")]
    DockerStream(String),

    #[error("Invalid image reference: {0}")]
    ImageReference(String),

    #[error("Dockerfile parse error at line {line}: {message}")]
    DockerfileParse { line: usize, message: String },

    #[error("The username or password for docker registry is not set")]
    MissingCredentials,

    #[error("Cannot connect to etcd: {0}")]
    EtcdConnect(String),

    #[error("etcd request timed out: {0}")]
    EtcdTimeout(String),

    #[error("etcd error (code {code}): {message}")]
    EtcdServer { code: i32, message: String },

    #[error("etcd protocol error: {0}")]
    EtcdProtocol(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl From<reqwest::Error> for StevedoreError {
    fn from(err: reqwest::Error) -> Self {
        // A dial that exceeds the connect timeout reports both kinds; it is a connect failure.
        if err.is_connect() {
            StevedoreError::EtcdConnect(err.to_string())
        } else if err.is_timeout() {
            StevedoreError::EtcdTimeout(err.to_string())
        } else if err.is_decode() {
            StevedoreError::EtcdProtocol(err.to_string())
        } else {
            StevedoreError::EtcdConnect(err.to_string())
        }
    }
}

impl StevedoreError {
    /// Whether the error means the daemon has no such image
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StevedoreError::Docker(bollard::errors::Error::DockerResponseServerError {
                status_code: 404,
                ..
            })
        )
    }
}
