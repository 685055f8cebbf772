//! Docker adapter
//!
//! Thin wrapper over a remote Docker daemon: pull, build, push and run,
//! plus registry credential handling and a few image naming helpers.

pub mod auth;
pub mod client;
pub mod dockerfile;
pub mod reference;

#[cfg(test)]
pub(crate) mod testing;

pub use auth::{AuthConfig, RegistryCompose};
pub use client::{ContainerSpec, DockerClient, DEFAULT_TIMEOUT_SECS};
pub use dockerfile::{base_images, BaseImage};
pub use reference::ImageReference;
