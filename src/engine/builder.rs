//! Fluent container builder
//!
//! Every method takes `&self` and returns a new builder holding a new
//! [`Spec`] snapshot with exactly one operation appended. Validation
//! failures leave the receiver untouched.

use super::Engine;
use super::errors::{EngineError, Result};
use super::secrets::SecretHandle;
use crate::image::ImageRef;
use crate::parse::{EnvVar, validate_env_name};
use crate::spec::{FileChunk, FileSource, Operation, Protocol, SharingMode, Spec, SpecState};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::PathBuf;
use std::sync::Arc;

static OCTAL_MODE_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^0?[0-7]{3,4}$").unwrap());

/// Options for [`ContainerBuilder::with_mounted_directory`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountOptions {
    /// Owner applied to the mount (`user[:group]`)
    pub owner: Option<String>,
    /// Octal permission mode
    pub mode: Option<String>,
}

impl MountOptions {
    /// Sets the owner
    #[must_use]
    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// Sets the permission mode
    #[must_use]
    pub fn mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = Some(mode.into());
        self
    }
}

/// Options for [`ContainerBuilder::with_exec_opts`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecOptions {
    /// Grant root capabilities to the process
    pub privileged: bool,
    /// Allow the process to reach the engine
    pub experimental_nesting: bool,
}

/// Immutable builder of container specs
#[derive(Debug, Clone)]
pub struct ContainerBuilder {
    engine: Engine,
    module: Arc<str>,
    spec: Option<Spec>,
}

fn require_absolute(what: &str, path: &str) -> Result<()> {
    if path.starts_with('/') {
        Ok(())
    } else {
        Err(EngineError::config(format!(
            "{what} must be an absolute path, got '{path}'"
        )))
    }
}

fn require_non_blank(what: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(EngineError::config(format!("{what} must not be empty")))
    } else {
        Ok(())
    }
}

pub(crate) fn validate_mode(mode: &str) -> Result<()> {
    if OCTAL_MODE_REGEX.is_match(mode) {
        Ok(())
    } else {
        Err(EngineError::config(format!(
            "permission mode must be an octal string such as 0755, got '{mode}'"
        )))
    }
}

fn collect_argv<I, S>(argv: I) -> Result<Vec<String>>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let argv: Vec<String> = argv.into_iter().map(Into::into).collect();
    if argv.first().is_none_or(|cmd| cmd.trim().is_empty()) {
        return Err(EngineError::config("exec requires a command"));
    }
    Ok(argv)
}

impl ContainerBuilder {
    pub(crate) fn unbased(engine: Engine, module: &str) -> Self {
        Self {
            engine,
            module: Arc::from(module),
            spec: None,
        }
    }

    pub(crate) fn adopt(engine: Engine, spec: Spec) -> Self {
        Self {
            engine,
            module: Arc::from(spec.meta().module_name.as_str()),
            spec: Some(spec),
        }
    }

    /// Engine this builder registers secrets and volumes with
    #[must_use]
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Module name recorded in the spec metadata
    #[must_use]
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Current state of the spec under construction
    #[must_use]
    pub fn state(&self) -> SpecState {
        self.spec.as_ref().map_or(SpecState::Unbased, Spec::state)
    }

    /// Current snapshot
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConfig`] while no base image is set.
    pub fn spec(&self) -> Result<Spec> {
        self.spec
            .clone()
            .ok_or_else(|| EngineError::config("no base image set"))
    }

    /// Number of operations appended so far
    #[must_use]
    pub fn op_count(&self) -> usize {
        self.spec.as_ref().map_or(0, Spec::len)
    }

    fn push(&self, op: Operation) -> Result<Self> {
        let Some(spec) = &self.spec else {
            return Err(EngineError::config(format!(
                "base image must be set before {}",
                op.name()
            )));
        };
        tracing::debug!(module = %self.module, op = %op, "Operation appended");
        Ok(Self {
            engine: self.engine.clone(),
            module: Arc::clone(&self.module),
            spec: Some(spec.append(op)?),
        })
    }

    /// Selects the base image. Allowed once.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConfig`] when a base is already set.
    pub fn from(&self, image: ImageRef) -> Result<Self> {
        if self.spec.is_some() {
            return Err(EngineError::config("base image is already set"));
        }
        Ok(Self {
            engine: self.engine.clone(),
            module: Arc::clone(&self.module),
            spec: Some(Spec::new(image, self.module.as_ref())),
        })
    }

    /// Parses `url` and selects it as base image
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidImageUrl`] or the errors of [`ContainerBuilder::from`].
    pub fn from_url(&self, url: &str) -> Result<Self> {
        self.from(ImageRef::parse(url)?)
    }

    /// Sets an environment variable
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::MalformedEnv`] for an invalid name.
    pub fn with_env_variable(
        &self,
        name: &str,
        value: impl Into<String>,
        expand: bool,
    ) -> Result<Self> {
        let name = name.trim();
        validate_env_name(name)?;
        self.push(Operation::SetEnv {
            name: name.to_string(),
            value: value.into(),
            expand,
        })
    }

    /// Applies parsed assignments in order, one operation each
    ///
    /// # Errors
    ///
    /// Returns the first invalid name.
    pub fn with_env_vars(&self, vars: &[EnvVar]) -> Result<Self> {
        vars.iter().try_fold(self.clone(), |builder, var| {
            builder.with_env_variable(&var.name, var.value.clone(), var.expand)
        })
    }

    /// Exposes a registered secret as an environment variable
    ///
    /// # Errors
    ///
    /// [`EngineError::MalformedEnv`] for an invalid name,
    /// [`EngineError::UnknownSecret`] when the handle belongs to no secret of
    /// this engine.
    pub fn with_secret_variable(&self, name: &str, secret: &SecretHandle) -> Result<Self> {
        let name = name.trim();
        validate_env_name(name)?;
        self.engine.secret(secret.name())?;
        self.push(Operation::BindSecret {
            name: name.to_string(),
            secret: secret.name().to_string(),
        })
    }

    /// Mounts a host directory at `mount_path`
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConfig`] for a relative mount path or a
    /// malformed mode.
    pub fn with_mounted_directory(
        &self,
        mount_path: &str,
        host_dir: impl Into<PathBuf>,
        options: MountOptions,
    ) -> Result<Self> {
        require_absolute("mount path", mount_path)?;
        if let Some(mode) = &options.mode {
            validate_mode(mode)?;
        }
        self.push(Operation::MountDir {
            host_dir: host_dir.into(),
            mount_path: mount_path.to_string(),
            owner: options.owner,
            mode: options.mode,
        })
    }

    /// Mounts a single file at `mount_path`
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConfig`] for a relative mount path or an
    /// unparsable URL source.
    pub fn with_mounted_file(
        &self,
        mount_path: &str,
        source: FileSource,
        owner: Option<&str>,
    ) -> Result<Self> {
        require_absolute("mount path", mount_path)?;
        if let FileSource::Url(raw) = &source {
            let parsed = url::Url::parse(raw)
                .map_err(|e| EngineError::config(format!("invalid file URL '{raw}': {e}")))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(EngineError::config(format!(
                    "unsupported URL scheme '{}'",
                    parsed.scheme()
                )));
            }
        }
        self.push(Operation::MountFile {
            source,
            mount_path: mount_path.to_string(),
            owner: owner.map(str::to_string),
        })
    }

    /// Writes a file built from literal and secret chunks
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidConfig`] for a relative path or malformed mode,
    /// [`EngineError::UnknownSecret`] for an undefined secret chunk.
    pub fn with_new_file(
        &self,
        path: &str,
        contents: Vec<FileChunk>,
        permissions: Option<&str>,
    ) -> Result<Self> {
        require_absolute("file path", path)?;
        if let Some(mode) = permissions {
            validate_mode(mode)?;
        }
        for chunk in &contents {
            if let FileChunk::Secret(name) = chunk {
                self.engine.secret(name)?;
            }
        }
        self.push(Operation::NewFile {
            path: path.to_string(),
            contents,
            permissions: permissions.map(str::to_string),
        })
    }

    /// Attaches a named cache volume.
    ///
    /// The volume is created on first use with `sharing` or `Shared`.
    ///
    /// # Errors
    ///
    /// [`EngineError::CacheVolumeConflict`] when `sharing` contradicts the
    /// volume's fixed mode, [`EngineError::InvalidConfig`] for a relative path.
    pub fn with_mounted_cache(
        &self,
        mount_path: &str,
        volume: &str,
        sharing: Option<SharingMode>,
        source_dir: Option<PathBuf>,
    ) -> Result<Self> {
        require_absolute("cache mount path", mount_path)?;
        let handle = self.engine.cache_volume(volume, sharing, source_dir.clone())?;
        self.push(Operation::MountCacheVolume {
            volume: handle.name().to_string(),
            mount_path: mount_path.to_string(),
            sharing: handle.sharing(),
            source_dir,
        })
    }

    /// Sets the working directory for later operations
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConfig`] for a relative path.
    pub fn with_workdir(&self, path: &str) -> Result<Self> {
        require_absolute("workdir", path)?;
        self.push(Operation::SetWorkdir {
            path: path.to_string(),
        })
    }

    /// Runs a command
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConfig`] for an empty argv or when no
    /// base image is set.
    pub fn with_exec<I, S>(&self, argv: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with_exec_opts(argv, ExecOptions::default())
    }

    /// Runs a command with extra capabilities
    ///
    /// # Errors
    ///
    /// See [`ContainerBuilder::with_exec`].
    pub fn with_exec_opts<I, S>(&self, argv: I, options: ExecOptions) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let argv = collect_argv(argv)?;
        self.push(Operation::Exec {
            argv,
            privileged: options.privileged,
            experimental_nesting: options.experimental_nesting,
        })
    }

    /// Runs shell text with `sh -c`, bypassing the entrypoint
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConfig`] for blank text.
    pub fn with_shell_exec(&self, script: &str) -> Result<Self> {
        require_non_blank("shell command", script)?;
        self.push(Operation::ShellExec {
            script: script.to_string(),
        })
    }

    /// Replaces the entrypoint
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConfig`] for an empty argv.
    pub fn with_entrypoint<I, S>(&self, argv: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let argv = collect_argv(argv)?;
        self.push(Operation::SetEntrypoint { argv: Some(argv) })
    }

    /// Clears the entrypoint
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConfig`] when no base image is set.
    pub fn without_entrypoint(&self) -> Result<Self> {
        self.push(Operation::SetEntrypoint { argv: None })
    }

    /// Declares an exposed port
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConfig`] for port 0.
    pub fn with_exposed_port(&self, port: u16, protocol: Protocol) -> Result<Self> {
        if port == 0 {
            return Err(EngineError::config("port must be between 1 and 65535"));
        }
        self.push(Operation::ExposePort { port, protocol })
    }

    /// Runs later operations as `user`
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConfig`] for a blank user.
    pub fn with_user(&self, user: &str) -> Result<Self> {
        require_non_blank("user", user)?;
        self.push(Operation::SetUser {
            user: user.trim().to_string(),
        })
    }

    /// Changes ownership of `paths` recursively
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConfig`] for a blank user or no paths.
    pub fn with_chown<S: AsRef<str>>(
        &self,
        user: &str,
        group: Option<&str>,
        paths: &[S],
        as_root: bool,
    ) -> Result<Self> {
        require_non_blank("owner", user)?;
        let paths = collect_paths(paths)?;
        self.push(Operation::Chown {
            user: user.trim().to_string(),
            group: group
                .map(str::trim)
                .filter(|g| !g.is_empty())
                .map(str::to_string),
            paths,
            as_root,
        })
    }

    /// Changes permissions of `paths` recursively.
    ///
    /// With `as_root`, the change runs as root and `user` (when given) is
    /// restored afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConfig`] for a malformed mode or no paths.
    pub fn with_chmod<S: AsRef<str>>(
        &self,
        mode: &str,
        paths: &[S],
        as_root: bool,
        user: Option<&str>,
    ) -> Result<Self> {
        validate_mode(mode)?;
        let paths = collect_paths(paths)?;
        self.push(Operation::Chmod {
            mode: mode.to_string(),
            paths,
            as_root,
            user: user
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .map(str::to_string),
        })
    }

    /// Attaches a metadata label
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConfig`] for a blank key.
    pub fn with_tag(&self, key: &str, value: impl Into<String>) -> Result<Self> {
        require_non_blank("tag key", key)?;
        self.push(Operation::AddTag {
            key: key.trim().to_string(),
            value: value.into(),
        })
    }

    /// Binds `service` as a sidecar reachable at `alias`
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConfig`] for a blank alias.
    pub fn with_service_binding(&self, alias: &str, service: &Spec) -> Result<Self> {
        require_non_blank("service alias", alias)?;
        self.push(Operation::BindService {
            alias: alias.trim().to_string(),
            service: Box::new(service.clone()),
        })
    }
}

fn collect_paths<S: AsRef<str>>(paths: &[S]) -> Result<Vec<String>> {
    if paths.is_empty() {
        return Err(EngineError::config("at least one path is required"));
    }
    paths
        .iter()
        .map(|p| {
            let p = p.as_ref().trim();
            require_non_blank("path", p)?;
            Ok(p.to_string())
        })
        .collect()
}
