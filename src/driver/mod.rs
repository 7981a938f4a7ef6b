//! Container drivers
//!
//! A [`Driver`] materialises containers one call at a time. Handles are
//! opaque and immutable: every call returns a new handle, leaving the input
//! usable. The [`adapter::Executor`] walks a spec and issues these calls.

pub mod adapter;
pub mod docker;
pub mod simulated;

#[cfg(test)]
mod adapter_tests;

pub use adapter::{Executor, OutputChunk, OutputStream, RunOptions, RunOutput};
pub use docker::DockerDriver;
pub use simulated::{ExecResponse, SimulatedDriver};

use crate::engine::errors::Result;
use crate::engine::secrets::SecretValue;
use crate::image::ImageRef;
use crate::spec::{FileSource, Protocol, SharingMode};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use uuid::Uuid;

/// Opaque reference to a container state held by a driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerHandle(Uuid);

impl ContainerHandle {
    /// Fresh handle
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ContainerHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ContainerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctr-{}", self.0.simple())
    }
}

/// Opaque reference to a service created with [`Driver::as_service`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceHandle(Uuid);

impl ServiceHandle {
    /// Fresh handle
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ServiceHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ServiceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "svc-{}", self.0.simple())
    }
}

/// Driver-side reference to a secret created with [`Driver::set_secret`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SecretRef {
    /// Secret name
    pub name: String,
}

/// Driver-side reference to a cache volume
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VolumeRef {
    /// Volume name as known to the engine
    pub name: String,
    /// Name used by the driver backend
    pub backend_name: String,
}

/// Options of a single exec call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecConfig {
    /// Grant root capabilities
    pub privileged: bool,
    /// Allow nested engine access
    pub experimental_nesting: bool,
    /// Prefix the command with the configured entrypoint
    pub use_entrypoint: bool,
}

/// Options of a cache mount
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheMount<'a> {
    /// Sharing mode fixed for the volume
    pub sharing: SharingMode,
    /// Host directory seeding the volume
    pub source: Option<&'a Path>,
}

/// Operations a container backend must offer
#[allow(clippy::missing_errors_doc)]
#[async_trait]
pub trait Driver: Send + Sync + fmt::Debug {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Checks that the backend is reachable
    async fn ping(&self) -> Result<()>;

    /// Starts a container state from `image`
    async fn from(&self, image: &ImageRef) -> Result<ContainerHandle>;

    /// Sets an environment variable
    async fn with_env_variable(
        &self,
        ctr: ContainerHandle,
        name: &str,
        value: &str,
        expand: bool,
    ) -> Result<ContainerHandle>;

    /// Registers a secret value with the backend
    async fn set_secret(&self, name: &str, value: &SecretValue) -> Result<SecretRef>;

    /// Exposes a secret as an environment variable
    async fn with_secret_variable(
        &self,
        ctr: ContainerHandle,
        name: &str,
        secret: &SecretRef,
    ) -> Result<ContainerHandle>;

    /// Mounts a host directory
    async fn with_mounted_directory(
        &self,
        ctr: ContainerHandle,
        path: &str,
        host_dir: &Path,
        owner: Option<&str>,
    ) -> Result<ContainerHandle>;

    /// Mounts a single file
    async fn with_mounted_file(
        &self,
        ctr: ContainerHandle,
        path: &str,
        source: &FileSource,
        owner: Option<&str>,
    ) -> Result<ContainerHandle>;

    /// Writes a file. Contents are wrapped because they may hold secrets.
    async fn with_new_file(
        &self,
        ctr: ContainerHandle,
        path: &str,
        contents: &SecretValue,
        permissions: Option<&str>,
    ) -> Result<ContainerHandle>;

    /// Resolves a named cache volume
    async fn cache_volume(&self, name: &str) -> Result<VolumeRef>;

    /// Mounts a cache volume
    async fn with_mounted_cache(
        &self,
        ctr: ContainerHandle,
        path: &str,
        volume: &VolumeRef,
        mount: CacheMount<'_>,
    ) -> Result<ContainerHandle>;

    /// Sets the working directory
    async fn with_workdir(&self, ctr: ContainerHandle, path: &str) -> Result<ContainerHandle>;

    /// Sets the user
    async fn with_user(&self, ctr: ContainerHandle, user: &str) -> Result<ContainerHandle>;

    /// Declares an exposed port
    async fn with_exposed_port(
        &self,
        ctr: ContainerHandle,
        port: u16,
        protocol: Protocol,
    ) -> Result<ContainerHandle>;

    /// Replaces (`Some`) or clears (`None`) the entrypoint
    async fn with_entrypoint(
        &self,
        ctr: ContainerHandle,
        argv: Option<&[String]>,
    ) -> Result<ContainerHandle>;

    /// Adds a metadata label
    async fn with_label(&self, ctr: ContainerHandle, key: &str, value: &str)
    -> Result<ContainerHandle>;

    /// Runs a command to completion, producing the next layer
    async fn with_exec(
        &self,
        ctr: ContainerHandle,
        argv: &[String],
        config: ExecConfig,
    ) -> Result<ContainerHandle>;

    /// Turns a container into a long-running service running `command`
    async fn as_service(
        &self,
        ctr: ContainerHandle,
        command: Option<&[String]>,
        config: ExecConfig,
    ) -> Result<ServiceHandle>;

    /// Makes `service` reachable from the container at `alias`
    async fn with_service_binding(
        &self,
        ctr: ContainerHandle,
        alias: &str,
        service: ServiceHandle,
    ) -> Result<ContainerHandle>;

    /// Standard output of the last exec
    async fn stdout(&self, ctr: ContainerHandle) -> Result<String>;

    /// Standard error of the last exec
    async fn stderr(&self, ctr: ContainerHandle) -> Result<String>;

    /// Exit code of the last exec, 0 when nothing ran
    async fn exit_code(&self, ctr: ContainerHandle) -> Result<i32>;

    /// Opens an interactive shell running `command`, returning its exit code
    async fn terminal(&self, ctr: ContainerHandle, command: &[String]) -> Result<i32>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_are_unique() {
        assert_ne!(ContainerHandle::new(), ContainerHandle::new());
        assert!(ContainerHandle::new().to_string().starts_with("ctr-"));
        assert!(ServiceHandle::new().to_string().starts_with("svc-"));
    }

    #[test]
    fn test_exec_config_default() {
        let config = ExecConfig::default();
        assert!(!config.privileged);
        assert!(!config.use_entrypoint);
    }
}
