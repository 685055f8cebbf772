//! Docker client
//!
//! Forwards image and container operations to a remote Docker daemon, adding
//! registry credentials and logging. Errors from the daemon are logged and
//! returned unchanged.

use super::auth::{AuthConfig, RegistryCompose};
use super::dockerfile::DOCKERFILE_NAME;
use super::reference::ImageReference;
use crate::error::{Result, StevedoreError};
use bollard::auth::DockerCredentials;
use bollard::container::{
    Config, CreateContainerOptions, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::image::{BuildImageOptions, CreateImageOptions, PushImageOptions};
use bollard::models::HostConfig;
use bollard::{Docker, API_DEFAULT_VERSION};
use flate2::write::GzEncoder;
use flate2::Compression;
use futures::StreamExt;
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Default daemon request timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Parameters for creating a container
#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
    /// Container name; the daemon picks one when unset
    pub name: Option<String>,
    /// Image to run
    pub image: String,
    /// Command to run
    pub cmd: Vec<String>,
    /// Environment variables
    pub env: BTreeMap<String, String>,
    /// Working directory
    pub working_dir: Option<String>,
    /// Container labels
    pub labels: BTreeMap<String, String>,
    /// Bind mounts (`host:container[:mode]`)
    pub binds: Vec<String>,
    /// Network mode
    pub network_mode: Option<String>,
    /// Privileged mode
    pub privileged: bool,
}

impl ContainerSpec {
    /// Create a spec for `image` with everything else defaulted
    pub fn new(image: &str) -> Self {
        Self {
            image: image.to_string(),
            ..Default::default()
        }
    }

    /// Set container name
    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Add environment variable
    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.insert(key.to_string(), value.to_string());
        self
    }

    /// Add label
    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    /// Engine create-container config
    pub fn to_config(&self) -> Config<String> {
        let host_config = HostConfig {
            binds: (!self.binds.is_empty()).then(|| self.binds.clone()),
            network_mode: self.network_mode.clone(),
            privileged: Some(self.privileged),
            ..Default::default()
        };

        Config {
            image: Some(self.image.clone()),
            cmd: (!self.cmd.is_empty()).then(|| self.cmd.clone()),
            env: (!self.env.is_empty()).then(|| {
                self.env
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v))
                    .collect()
            }),
            working_dir: self.working_dir.clone(),
            labels: (!self.labels.is_empty()).then(|| {
                self.labels
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect::<HashMap<_, _>>()
            }),
            host_config: Some(host_config),
            ..Default::default()
        }
    }
}

/// Docker client bound to one daemon and one registry account
pub struct DockerClient {
    docker: Docker,
    registry: String,
    auth: AuthConfig,
    endpoint: String,
}

impl DockerClient {
    /// Create a client without contacting the daemon
    ///
    /// With `cert_path`, TLS material is read from `cert.pem`, `key.pem` and
    /// `ca.pem` in that directory.
    pub fn new(
        endpoint: &str,
        cert_path: Option<&Path>,
        registry: &RegistryCompose,
        timeout_secs: u64,
    ) -> Result<Self> {
        let auth = registry.auth_config()?;

        let docker = match cert_path {
            Some(dir) => Docker::connect_with_ssl(
                endpoint,
                &dir.join("key.pem"),
                &dir.join("cert.pem"),
                &dir.join("ca.pem"),
                timeout_secs,
                API_DEFAULT_VERSION,
            )?,
            None => Self::connect_plain(endpoint, timeout_secs)?,
        };

        Ok(Self {
            docker,
            registry: registry.registry_location.clone(),
            auth,
            endpoint: endpoint.to_string(),
        })
    }

    #[cfg(unix)]
    fn connect_plain(endpoint: &str, timeout_secs: u64) -> Result<Docker> {
        reject_bare_https(endpoint)?;
        if endpoint.starts_with("unix://") {
            Ok(Docker::connect_with_unix(
                endpoint,
                timeout_secs,
                API_DEFAULT_VERSION,
            )?)
        } else {
            Ok(Docker::connect_with_http(
                endpoint,
                timeout_secs,
                API_DEFAULT_VERSION,
            )?)
        }
    }

    #[cfg(not(unix))]
    fn connect_plain(endpoint: &str, timeout_secs: u64) -> Result<Docker> {
        reject_bare_https(endpoint)?;
        Ok(Docker::connect_with_http(
            endpoint,
            timeout_secs,
            API_DEFAULT_VERSION,
        )?)
    }

    /// Create a client and check that the daemon answers
    pub async fn connect(
        endpoint: &str,
        cert_path: Option<&Path>,
        registry: &RegistryCompose,
        timeout_secs: u64,
    ) -> Result<Self> {
        let client = Self::new(endpoint, cert_path, registry, timeout_secs)?;

        match client.docker.version().await {
            Ok(version) => {
                debug!(
                    "Connected to docker daemon {} (version {})",
                    endpoint,
                    version.version.unwrap_or_default()
                );
                Ok(client)
            }
            Err(e) => {
                error!("error connecting to docker daemon {}. {}.", endpoint, e);
                Err(e.into())
            }
        }
    }

    /// Daemon endpoint
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Registry location
    pub fn registry(&self) -> &str {
        &self.registry
    }

    /// Per-registry credentials, keyed by registry location
    pub fn auth_opts(&self) -> HashMap<String, DockerCredentials> {
        self.auth.credentials_map(&self.registry)
    }

    /// Pull an image; `latest` is used when the name carries no tag
    pub async fn pull_image(&self, image_name: &str) -> Result<()> {
        let reference = ImageReference::parse(image_name)
            .map_err(|e| {
                error!("imagename parse error: {}", e);
                e
            })?
            .with_default_tag();

        let from_image = match reference.digest {
            Some(ref digest) => format!("{}@{}", reference.name, digest),
            None => reference.name.clone(),
        };
        let options = CreateImageOptions {
            from_image,
            tag: reference.tag.clone().unwrap_or_default(),
            ..Default::default()
        };

        let mut stream = std::pin::pin!(self.docker.create_image(
            Some(options),
            None,
            Some(self.auth.credentials(&self.registry)),
        ));

        while let Some(item) = stream.next().await {
            let info = item.map_err(|e| {
                error!("Pull docker image {} failed: {}", reference, e);
                e
            })?;
            if let Some(message) = info.error {
                error!("Pull docker image {} failed: {}", reference, message);
                return Err(StevedoreError::DockerStream(message));
            }
            if let Some(status) = info.status {
                debug!("{}: {}", reference, status);
            }
        }

        info!("Successfully pull docker image:{}", reference);
        Ok(())
    }

    /// Build `image_name:tag_name` from `context_dir`
    ///
    /// `dockerfile` defaults to `Dockerfile` when empty. Build output is
    /// written to `output`.
    pub async fn build_image<W>(
        &self,
        image_name: &str,
        tag_name: &str,
        context_dir: &Path,
        dockerfile: Option<&str>,
        output: &mut W,
    ) -> Result<()>
    where
        W: Write + Send,
    {
        let full_name = format!("{}:{}", image_name, tag_name);
        info!("About to build docker image:{}.", full_name);

        let dockerfile = match dockerfile {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => DOCKERFILE_NAME.to_string(),
        };

        let context = archive_context(context_dir.to_path_buf()).await?;

        let options = BuildImageOptions {
            dockerfile,
            t: full_name.clone(),
            rm: true,
            memswap: Some(-1),
            ..Default::default()
        };

        let mut stream = std::pin::pin!(self.docker.build_image(
            options,
            Some(self.auth_opts()),
            Some(context.into()),
        ));

        while let Some(item) = stream.next().await {
            let info = match item {
                Ok(info) => info,
                Err(e) => {
                    error!("Built docker image:{} failed.", full_name);
                    return Err(e.into());
                }
            };
            if let Some(message) = info.error {
                error!("Built docker image:{} failed: {}", full_name, message);
                return Err(StevedoreError::DockerStream(message));
            }
            if let Some(text) = info.stream {
                output.write_all(text.as_bytes())?;
            }
        }
        output.flush()?;

        info!("Successfully built docker image:{}.", full_name);
        Ok(())
    }

    /// Push `image_name:tag_name` to the registry, writing progress to `output`
    pub async fn push_image<W>(&self, image_name: &str, tag_name: &str, output: &mut W) -> Result<()>
    where
        W: Write + Send,
    {
        info!("About to push docker image:{}:{}.", image_name, tag_name);

        let options = PushImageOptions {
            tag: tag_name.to_string(),
        };

        let mut stream = std::pin::pin!(self.docker.push_image(
            image_name,
            Some(options),
            Some(self.auth.credentials(&self.registry)),
        ));

        while let Some(item) = stream.next().await {
            let info = item.map_err(|e| {
                error!("Push docker image {}:{} failed: {}", image_name, tag_name, e);
                e
            })?;
            if let Some(message) = info.error {
                error!("Push docker image {}:{} failed: {}", image_name, tag_name, message);
                return Err(StevedoreError::DockerStream(message));
            }
            if let Some(status) = info.status {
                match info.progress {
                    Some(progress) => writeln!(output, "{} {}", status, progress)?,
                    None => writeln!(output, "{}", status)?,
                }
            }
        }
        output.flush()?;

        info!("Successfully pushed docker image:{}.", image_name);
        Ok(())
    }

    /// Run a container, pulling its image first when missing
    ///
    /// If the container cannot be started it is removed again.
    pub async fn run_container(&self, spec: &ContainerSpec) -> Result<String> {
        if !self.is_image_present(&spec.image).await? {
            info!("About to pull the image:{}.", spec.image);
            self.pull_image(&spec.image).await?;
            info!("Successfully pull the image:{}.", spec.image);
        }

        info!("About to create the container:{:?}.", spec);
        let options = spec.name.as_ref().map(|name| CreateContainerOptions {
            name: name.clone(),
            platform: None,
        });
        let created = self
            .docker
            .create_container(options, spec.to_config())
            .await
            .map_err(|e| {
                error!("Create container from {} failed: {}", spec.image, e);
                e
            })?;

        if let Err(e) = self
            .docker
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await
        {
            error!("Start container {} failed: {}", created.id, e);
            if let Err(remove_err) = self
                .docker
                .remove_container(&created.id, None::<RemoveContainerOptions>)
                .await
            {
                warn!("Remove container {} failed: {}", created.id, remove_err);
            }
            return Err(e.into());
        }

        info!("Successfully create the container:{}.", created.id);
        Ok(created.id)
    }

    /// Stop a container without grace period
    pub async fn stop_container(&self, id: &str) -> Result<()> {
        self.docker
            .stop_container(id, Some(StopContainerOptions { t: 0 }))
            .await
            .map_err(|e| {
                error!("Stop container {} failed: {}", id, e);
                e.into()
            })
    }

    /// Force-remove a container and its volumes
    pub async fn remove_container(&self, id: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            v: true,
            force: true,
            ..Default::default()
        };
        self.docker
            .remove_container(id, Some(options))
            .await
            .map_err(|e| {
                error!("Remove container {} failed: {}", id, e);
                e.into()
            })
    }

    /// Stop and then remove a container
    pub async fn stop_and_remove_container(&self, id: &str) -> Result<()> {
        self.stop_container(id).await?;
        self.remove_container(id).await
    }

    /// Remove an image by name or ID
    pub async fn remove_image(&self, name: &str) -> Result<()> {
        self.docker.remove_image(name, None, None).await?;
        Ok(())
    }

    /// Remove the `image_name:tag_name` image produced by a build
    pub async fn clean_up(&self, image_name: &str, tag_name: &str) -> Result<()> {
        let full_name = format!("{}:{}", image_name, tag_name);
        info!("About to clean up docker image:{}.", full_name);

        match self.remove_image(&full_name).await {
            Ok(()) => {
                info!("Successfully remove docker image:{}.", full_name);
                Ok(())
            }
            Err(e) => {
                error!("Remove docker image:{} failed.", full_name);
                Err(e)
            }
        }
    }

    /// Whether the daemon already has `image`
    pub async fn is_image_present(&self, image: &str) -> Result<bool> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(e) => {
                let err = StevedoreError::from(e);
                if err.is_not_found() {
                    Ok(false)
                } else {
                    Err(err)
                }
            }
        }
    }

    /// `{registry}/{username}/{service}:{version}`, lowercasing user and service
    pub fn image_name_with_tag(&self, username: &str, service_name: &str, version_name: &str) -> String {
        format!(
            "{}:{}",
            self.image_name_no_tag(username, service_name),
            version_name
        )
    }

    /// `{registry}/{username}/{service}`, lowercasing user and service
    pub fn image_name_no_tag(&self, username: &str, service_name: &str) -> String {
        format!(
            "{}/{}/{}",
            self.registry,
            username.to_lowercase(),
            service_name.to_lowercase()
        )
    }
}

/// `https://` needs TLS material; a plain connection would mangle the address
fn reject_bare_https(endpoint: &str) -> Result<()> {
    if endpoint.starts_with("https://") {
        return Err(StevedoreError::InvalidConfig(format!(
            "docker endpoint {} needs a cert_path",
            endpoint
        )));
    }
    Ok(())
}

/// Gzipped tarball of a build context directory
async fn archive_context(context_dir: PathBuf) -> Result<Vec<u8>> {
    tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        builder.append_dir_all(".", &context_dir)?;
        let encoder = builder.into_inner()?;
        Ok(encoder.finish()?)
    })
    .await
    .map_err(|e| StevedoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
}
