//! Container engine core
//!
//! An [`Engine`] owns the secret and cache-volume registries. Builders hold a
//! cheap clone of it and reference both registries by name.

pub mod builder;
pub mod cache;
pub mod cancel;
pub mod errors;
pub mod pool;
pub mod recipes;
pub mod secrets;

#[cfg(test)]
mod builder_tests;

pub use builder::{ContainerBuilder, ExecOptions, MountOptions};
pub use cache::{CacheVolume, CacheVolumeRegistry};
pub use cancel::CancelToken;
pub use errors::{EngineError, ErrorKind, Result, ResultExt};
pub use pool::{ParallelRunner, PoolResult};
pub use recipes::{Distro, GoCacheOptions, NetrcPassword, Vcs};
pub use secrets::{SecretHandle, SecretRegistry, SecretValue};

use crate::image::ImageRef;
use crate::spec::{SharingMode, Spec};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Default)]
struct EngineInner {
    secrets: SecretRegistry,
    volumes: CacheVolumeRegistry,
}

/// Engine instance scoping secrets and cache volumes
#[derive(Debug, Clone, Default)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Creates an engine with empty registries
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a named secret
    ///
    /// # Errors
    ///
    /// See [`SecretRegistry::define`].
    pub fn define_secret(&self, name: &str, value: impl Into<String>) -> Result<SecretHandle> {
        self.inner.secrets.define(name, value)
    }

    /// Handle for a previously defined secret
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownSecret`] if `name` was never defined.
    pub fn secret(&self, name: &str) -> Result<SecretHandle> {
        self.inner.secrets.handle(name)
    }

    /// Resolves (creating on first use) a named cache volume
    ///
    /// # Errors
    ///
    /// See [`CacheVolumeRegistry::reference`].
    pub fn cache_volume(
        &self,
        name: &str,
        sharing: Option<SharingMode>,
        source_dir: Option<PathBuf>,
    ) -> Result<Arc<CacheVolume>> {
        self.inner.volumes.reference(name, sharing, source_dir)
    }

    /// Cache volumes created so far
    #[must_use]
    pub fn volumes(&self) -> &CacheVolumeRegistry {
        &self.inner.volumes
    }

    pub(crate) fn secrets(&self) -> &SecretRegistry {
        &self.inner.secrets
    }

    /// Replaces registered secret values in `text` with `***`
    #[must_use]
    pub fn scrub(&self, text: &str) -> String {
        self.inner.secrets.scrub(text)
    }

    /// A builder without base image, for `module`
    #[must_use]
    pub fn container(&self, module: &str) -> ContainerBuilder {
        ContainerBuilder::unbased(self.clone(), module)
    }

    /// A builder based on `image`
    #[must_use]
    pub fn from_image(&self, module: &str, image: ImageRef) -> ContainerBuilder {
        ContainerBuilder::adopt(self.clone(), Spec::new(image, module))
    }

    /// A builder continuing an existing spec verbatim
    #[must_use]
    pub fn adopt(&self, spec: Spec) -> ContainerBuilder {
        ContainerBuilder::adopt(self.clone(), spec)
    }

    /// Returns true when both handles point at the same engine
    #[must_use]
    pub fn same_as(&self, other: &Engine) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
