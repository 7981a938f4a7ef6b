//! General purpose alpine container

use super::{Facade, FacadeDefaults, FacadeOptions, base_container};
use crate::engine::errors::Result;
use crate::engine::{ContainerBuilder, Distro, Engine};
use async_trait::async_trait;

/// Defaults of the toolbox façade
pub const TOOLBOX_DEFAULTS: FacadeDefaults = FacadeDefaults {
    module: "toolbox",
    image: "alpine",
    version: "latest",
    distro: Distro::Alpine,
};

/// An alpine container for ad hoc commands
#[derive(Debug, Clone)]
pub struct Toolbox {
    container: ContainerBuilder,
}

impl Toolbox {
    /// Prepares the container described by `opts`
    ///
    /// # Errors
    ///
    /// See [`base_container`].
    pub fn new(engine: &Engine, opts: &FacadeOptions) -> Result<Self> {
        Ok(Self {
            container: base_container(engine, &TOOLBOX_DEFAULTS, opts)?,
        })
    }

    /// Installs curl, wget, bash, jq, vim, unzip and yq
    ///
    /// # Errors
    ///
    /// See [`ContainerBuilder::with_utilities`].
    pub fn with_utilities(&self) -> Result<Self> {
        self.map(|c| c.with_utilities(Distro::Alpine))
    }

    /// Mounts `dir` at `/mnt` and works there
    ///
    /// # Errors
    ///
    /// See [`ContainerBuilder::with_source`].
    pub fn with_source(&self, dir: impl Into<std::path::PathBuf>) -> Result<Self> {
        let dir = dir.into();
        self.map(|c| c.with_source(dir, None))
    }
}

#[async_trait]
impl Facade for Toolbox {
    fn container(&self) -> &ContainerBuilder {
        &self.container
    }

    fn with_container(&self, container: ContainerBuilder) -> Self {
        Self { container }
    }
}
