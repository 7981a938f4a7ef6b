//! Domain façades
//!
//! A façade wraps a [`ContainerBuilder`] configured for one tool and adds
//! domain methods that append operations. Construction follows one
//! precedence rule: an existing spec is adopted verbatim, otherwise an
//! explicit image URL is validated and used, otherwise the façade's default
//! image and version are resolved.

pub mod gotest;
pub mod terraform;
pub mod toolbox;

#[cfg(test)]
mod facade_tests;

pub use gotest::{GoTest, GoTestOptions};
pub use terraform::{Terraform, TerraformCommand};
pub use toolbox::Toolbox;

use crate::driver::{Executor, RunOptions, RunOutput};
use crate::engine::errors::{EngineError, Result};
use crate::engine::{ContainerBuilder, Distro, Engine};
use crate::image::{ImageRef, ImageResolver};
use crate::parse::parse_env_slice;
use crate::spec::Spec;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

static ENV_KEY_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_]+$").unwrap());

/// Construction options shared by every façade
#[derive(Debug, Clone, Default)]
pub struct FacadeOptions {
    /// Image tag, the façade default when unset
    pub version: Option<String>,
    /// Full image URL overriding image and version
    pub image_url: Option<String>,
    /// Spec to continue instead of starting from an image
    pub existing: Option<Spec>,
    /// `K=V` entries forwarded into the container
    pub env_vars_from_host: Vec<String>,
    /// Extra packages installed on top of the base image
    pub extra_packages: Vec<String>,
}

impl FacadeOptions {
    /// Empty options
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the image tag
    #[must_use]
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Sets a full image URL
    #[must_use]
    pub fn image_url(mut self, url: impl Into<String>) -> Self {
        self.image_url = Some(url.into());
        self
    }

    /// Continues `spec` instead of starting from an image
    #[must_use]
    pub fn existing(mut self, spec: Spec) -> Self {
        self.existing = Some(spec);
        self
    }

    /// Forwards `K=V` entries
    #[must_use]
    pub fn env_vars<I, S>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.env_vars_from_host.extend(entries.into_iter().map(Into::into));
        self
    }

    /// Installs extra packages
    #[must_use]
    pub fn packages<I, S>(mut self, packages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_packages.extend(packages.into_iter().map(Into::into));
        self
    }
}

/// Fixed defaults of a façade
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FacadeDefaults {
    /// Module name recorded in specs and error prefixes
    pub module: &'static str,
    /// Default image
    pub image: &'static str,
    /// Default tag
    pub version: &'static str,
    /// Distribution of the default image
    pub distro: Distro,
}

/// Builds the starting container of a façade
///
/// # Errors
///
/// [`EngineError::InvalidImageUrl`] for a malformed image URL,
/// [`EngineError::MalformedEnv`] for an invalid forwarded entry.
pub fn base_container(
    engine: &Engine,
    defaults: &FacadeDefaults,
    opts: &FacadeOptions,
) -> Result<ContainerBuilder> {
    let (container, adopted) = if let Some(existing) = &opts.existing {
        tracing::debug!(module = defaults.module, base = %existing.base(), "Adopting existing spec");
        (engine.adopt(existing.clone()), true)
    } else if let Some(url) = opts.image_url.as_deref().filter(|u| !u.trim().is_empty()) {
        let image = ImageRef::parse(url.trim())?;
        (engine.from_image(defaults.module, image), false)
    } else {
        let image = ImageResolver::new()
            .with_fallback_image(defaults.image)
            .with_fallback_version(defaults.version)
            .resolve("", opts.version.as_deref().unwrap_or(""))?;
        (engine.from_image(defaults.module, image), false)
    };
    tracing::info!(
        module = defaults.module,
        adopted,
        "Façade container prepared"
    );

    let vars = parse_env_slice(&opts.env_vars_from_host)?;
    let container = container.with_env_vars(&vars)?;

    let packages: Vec<&str> = opts
        .extra_packages
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect();
    if packages.is_empty() {
        Ok(container)
    } else {
        container.with_packages(defaults.distro, &packages)
    }
}

/// Behaviour shared by every façade
#[async_trait]
pub trait Facade: Send + Sync + Sized {
    /// Underlying container builder
    fn container(&self) -> &ContainerBuilder;

    /// A copy of this façade using `container`
    #[must_use]
    fn with_container(&self, container: ContainerBuilder) -> Self;

    /// Module name used for error prefixes
    fn module(&self) -> &str {
        self.container().module()
    }

    /// Current spec
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConfig`] when no base image is set.
    fn spec(&self) -> Result<Spec> {
        self.container().spec()
    }

    /// Applies a builder transformation, for recipes without a façade method
    ///
    /// # Errors
    ///
    /// Whatever `f` returns.
    fn map<F>(&self, f: F) -> Result<Self>
    where
        F: FnOnce(&ContainerBuilder) -> Result<ContainerBuilder>,
    {
        Ok(self.with_container(f(self.container())?))
    }

    /// Executes the spec
    ///
    /// # Errors
    ///
    /// See [`Executor::run`].
    async fn run(&self, executor: &Executor, opts: &RunOptions) -> Result<RunOutput> {
        executor.run(&self.spec()?, opts).await
    }

    /// Runs shell text and returns its standard output
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidConfig`] for blank text, plus the errors of
    /// [`Executor::run`].
    async fn run_shell(&self, executor: &Executor, cmd: &str, opts: &RunOptions) -> Result<String> {
        let spec = self.container().with_shell_exec(cmd)?.spec()?;
        let output = executor
            .run(&spec, opts)
            .await
            .map_err(|e| e.wrap(self.module().to_string(), "shell command failed"))?;
        Ok(output.stdout)
    }

    /// Output of `printenv`
    ///
    /// # Errors
    ///
    /// See [`Executor::run`].
    async fn print_env(&self, executor: &Executor, opts: &RunOptions) -> Result<String> {
        let spec = self.container().with_exec(["printenv"])?.spec()?;
        let output = executor
            .run(&spec, opts)
            .await
            .map_err(|e| e.wrap(self.module().to_string(), "printing environment failed"))?;
        Ok(output.stdout)
    }

    /// Value of one environment variable inside the container
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidConfig`] for a key outside `[a-zA-Z0-9_]`,
    /// [`EngineError::Domain`] when the variable is not set.
    async fn inspect_env(&self, executor: &Executor, key: &str, opts: &RunOptions) -> Result<String> {
        if key.is_empty() {
            return Err(EngineError::config("environment variable key cannot be empty"));
        }
        if !ENV_KEY_REGEX.is_match(key) {
            return Err(EngineError::config(format!(
                "the key {key} is invalid, does not match the pattern {}",
                ENV_KEY_REGEX.as_str()
            )));
        }

        let not_found = || {
            EngineError::domain(
                self.module().to_string(),
                format!("environment variable {key} not found"),
            )
        };
        let spec = self.container().with_exec(["printenv", key])?.spec()?;
        match executor.run(&spec, opts).await {
            Ok(output) if output.stdout.trim().is_empty() => Err(not_found()),
            Ok(output) => Ok(output.stdout.trim_end_matches('\n').to_string()),
            Err(EngineError::ExecFailed { exit_code: 1, .. }) => Err(not_found()),
            Err(e) => Err(e.wrap(
                self.module().to_string(),
                format!("failed to inspect the environment variable: {key}"),
            )),
        }
    }

    /// Opens an interactive shell in the container
    ///
    /// # Errors
    ///
    /// See [`Executor::terminal`].
    async fn terminal(&self, executor: &Executor, opts: &RunOptions) -> Result<i32> {
        executor
            .terminal(&self.spec()?, &["/bin/sh".to_string()], opts)
            .await
    }
}
