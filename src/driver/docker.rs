//! Docker CLI driver
//!
//! Container state is kept client side. Each exec replays it as a
//! `docker run`, then commits the result as the next layer. Secret values
//! are staged as read-only files, bind-mounted under [`SECRETS_DIR`] and
//! exported by a `/bin/sh` prologue, so they reach neither argv, the
//! container config nor a committed layer. Specs binding secrets therefore
//! need `/bin/sh` in their image.

use super::{
    CacheMount, ContainerHandle, Driver, ExecConfig, SecretRef, ServiceHandle, VolumeRef,
};
use crate::engine::errors::{EngineError, Result};
use crate::engine::secrets::SecretValue;
use crate::image::ImageRef;
use crate::parse::{expand, join_args};
use crate::spec::{FileSource, Protocol};
use ahash::{AHashMap, AHashSet};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use tempfile::TempDir;
use tokio::process::Command;
use tokio::sync::OnceCell;
use uuid::Uuid;

/// Helper image used to fetch URL-sourced files
const FETCH_IMAGE: &str = "curlimages/curl:latest";
/// Helper image used to seed cache volumes
const SEED_IMAGE: &str = "alpine:latest";
const VOLUME_PREFIX: &str = "ctrforge-cache-";
/// Container directory holding bind-mounted secret files
pub const SECRETS_DIR: &str = "/run/ctrforge/secrets";

#[derive(Debug, Clone, Default)]
struct LastExec {
    stdout: String,
    stderr: String,
    exit_code: i32,
}

#[derive(Debug, Clone, Default)]
struct DockerState {
    image: String,
    env: Vec<(String, String)>,
    secret_env: Vec<(String, String)>,
    volumes: Vec<String>,
    workdir: Option<String>,
    user: Option<String>,
    entrypoint: Option<Vec<String>>,
    entrypoint_set: bool,
    ports: Vec<(u16, Protocol)>,
    labels: Vec<(String, String)>,
    network: Option<String>,
    last: Option<LastExec>,
}

impl DockerState {
    fn set_env(&mut self, name: &str, value: String) {
        self.secret_env.retain(|(k, _)| k != name);
        match self.env.iter_mut().find(|(k, _)| k == name) {
            Some(entry) => entry.1 = value,
            None => self.env.push((name.to_string(), value)),
        }
    }

    fn get_env(&self, name: &str) -> Option<String> {
        self.env
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
    }
}

#[derive(Debug, Clone)]
struct ServiceDef {
    state: DockerState,
    command: Option<Vec<String>>,
    config: ExecConfig,
}

/// Entrypoint and command of an image config, as `docker image inspect` reports them
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ImageDefaults {
    #[serde(default)]
    entrypoint: Option<Vec<String>>,
    #[serde(default)]
    cmd: Option<Vec<String>>,
}

/// A secret file on the host bound to an env var in the container
#[derive(Debug, Clone, PartialEq, Eq)]
struct SecretMount {
    var: String,
    host: PathBuf,
}

impl SecretMount {
    fn container_path(&self) -> String {
        format!("{SECRETS_DIR}/{}", self.var)
    }
}

/// Shell text exporting every mounted secret, then running `"$@"`
fn secret_prologue(secrets: &[SecretMount]) -> String {
    let mut script = String::new();
    for secret in secrets {
        let _ = write!(
            script,
            "export {}=\"$(cat {})\"; ",
            secret.var,
            secret.container_path()
        );
    }
    script.push_str("exec \"$@\"");
    script
}

/// Full argv of a run. With `use_entrypoint` the client-side entrypoint, or
/// the image's, prefixes `argv`, and an empty `argv` falls back to the image
/// command.
fn command_line(
    state: &DockerState,
    argv: &[String],
    use_entrypoint: bool,
    defaults: &ImageDefaults,
) -> Vec<String> {
    if !use_entrypoint {
        return argv.to_vec();
    }
    let entrypoint = if state.entrypoint_set {
        state.entrypoint.clone().unwrap_or_default()
    } else {
        defaults.entrypoint.clone().unwrap_or_default()
    };
    let args = if argv.is_empty() && !state.entrypoint_set {
        defaults.cmd.clone().unwrap_or_default()
    } else {
        argv.to_vec()
    };
    entrypoint.into_iter().chain(args).collect()
}

/// Builds the `docker run` arguments replaying `state` around `command`
fn run_args(
    state: &DockerState,
    name: &str,
    command: &[String],
    config: ExecConfig,
    detach: bool,
    secrets: &[SecretMount],
) -> Vec<String> {
    let mut args = vec!["run".to_string(), "--name".to_string(), name.to_string()];
    if detach {
        args.push("-d".to_string());
    }
    if config.privileged {
        args.push("--privileged".to_string());
    }
    if config.experimental_nesting {
        args.push("-v".to_string());
        args.push("/var/run/docker.sock:/var/run/docker.sock".to_string());
    }
    if let Some(network) = &state.network {
        args.push("--network".to_string());
        args.push(network.clone());
    }
    for (k, v) in &state.env {
        args.push("-e".to_string());
        args.push(format!("{k}={v}"));
    }
    for volume in &state.volumes {
        args.push("-v".to_string());
        args.push(volume.clone());
    }
    for secret in secrets {
        args.push("-v".to_string());
        args.push(format!("{}:{}:ro", secret.host.display(), secret.container_path()));
    }
    if let Some(workdir) = &state.workdir {
        args.push("-w".to_string());
        args.push(workdir.clone());
    }
    if let Some(user) = &state.user {
        args.push("-u".to_string());
        args.push(user.clone());
    }

    if !secrets.is_empty() {
        args.push("--entrypoint".to_string());
        args.push("/bin/sh".to_string());
        args.push(state.image.clone());
        args.push("-c".to_string());
        args.push(secret_prologue(secrets));
        args.push("sh".to_string());
        args.extend(command.iter().cloned());
    } else if let Some((program, rest)) = command.split_first() {
        args.push("--entrypoint".to_string());
        args.push(program.clone());
        args.push(state.image.clone());
        args.extend(rest.iter().cloned());
    } else {
        args.push(state.image.clone());
    }
    args
}

/// `--change` instructions of a commit: image metadata plus the base
/// entrypoint and command, replacing what the exec container ran with
fn commit_changes(state: &DockerState, defaults: &ImageDefaults) -> Vec<String> {
    let mut changes = Vec::new();
    for (port, protocol) in &state.ports {
        changes.push(format!("EXPOSE {port}/{protocol}"));
    }
    for (key, value) in &state.labels {
        changes.push(format!("LABEL {key}={value:?}"));
    }
    let json = |argv: &Option<Vec<String>>| {
        serde_json::to_string(argv.as_deref().unwrap_or_default())
            .unwrap_or_else(|_| "[]".to_string())
    };
    changes.push(format!("ENTRYPOINT {}", json(&defaults.entrypoint)));
    changes.push(format!("CMD {}", json(&defaults.cmd)));
    changes
}

fn commit_args(
    state: &DockerState,
    defaults: &ImageDefaults,
    container: &str,
    tag: &str,
) -> Vec<String> {
    let mut args = vec!["commit".to_string()];
    for change in commit_changes(state, defaults) {
        args.push("--change".to_string());
        args.push(change);
    }
    args.push(container.to_string());
    args.push(tag.to_string());
    args
}

/// Commands releasing what a driver created: containers first, then the
/// network they joined, then committed layers
fn cleanup_commands(
    started: &[String],
    network: Option<&str>,
    layers: &[String],
) -> Vec<Vec<String>> {
    let mut commands = Vec::new();
    if !started.is_empty() {
        commands.push(
            ["rm", "-f"]
                .iter()
                .map(ToString::to_string)
                .chain(started.iter().cloned())
                .collect(),
        );
    }
    if let Some(network) = network {
        commands.push(vec!["network".to_string(), "rm".to_string(), network.to_string()]);
    }
    if !layers.is_empty() {
        commands.push(
            ["rmi", "-f"]
                .iter()
                .map(ToString::to_string)
                .chain(layers.iter().cloned())
                .collect(),
        );
    }
    commands
}

/// Driver backed by the `docker` command line client
///
/// Committed layers, service containers and the service network live as
/// long as the driver and are removed when it is dropped.
#[derive(Debug)]
pub struct DockerDriver {
    binary: String,
    layer_repository: String,
    staging: TempDir,
    containers: Mutex<AHashMap<ContainerHandle, DockerState>>,
    secrets: Mutex<AHashMap<String, PathBuf>>,
    services: Mutex<AHashMap<ServiceHandle, ServiceDef>>,
    defaults: Mutex<AHashMap<String, ImageDefaults>>,
    started: Mutex<Vec<String>>,
    layers: Mutex<Vec<String>>,
    seeded: Mutex<AHashSet<String>>,
    network: OnceCell<String>,
}

impl DockerDriver {
    /// Driver invoking `binary` and committing layers to `layer_repository`
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Io`] when the staging directory cannot be created.
    pub fn new(binary: impl Into<String>, layer_repository: impl Into<String>) -> Result<Self> {
        let staging = tempfile::Builder::new().prefix("ctrforge-").tempdir()?;
        Ok(Self {
            binary: binary.into(),
            layer_repository: layer_repository.into(),
            staging,
            containers: Mutex::new(AHashMap::new()),
            secrets: Mutex::new(AHashMap::new()),
            services: Mutex::new(AHashMap::new()),
            defaults: Mutex::new(AHashMap::new()),
            started: Mutex::new(Vec::new()),
            layers: Mutex::new(Vec::new()),
            seeded: Mutex::new(AHashSet::new()),
            network: OnceCell::new(),
        })
    }

    /// Layers committed so far
    #[must_use]
    pub fn layers(&self) -> Vec<String> {
        self.layers.lock().clone()
    }

    fn get(&self, ctr: ContainerHandle) -> Result<DockerState> {
        self.containers
            .lock()
            .get(&ctr)
            .cloned()
            .ok_or_else(|| EngineError::InternalInvariant(format!("unknown container {ctr}")))
    }

    fn derive<F>(&self, ctr: ContainerHandle, change: F) -> Result<ContainerHandle>
    where
        F: FnOnce(&mut DockerState),
    {
        let mut next = self.get(ctr)?;
        change(&mut next);
        let handle = ContainerHandle::new();
        self.containers.lock().insert(handle, next);
        Ok(handle)
    }

    fn secret_mounts(&self, state: &DockerState) -> Result<Vec<SecretMount>> {
        let secrets = self.secrets.lock();
        state
            .secret_env
            .iter()
            .map(|(var, secret)| {
                secrets
                    .get(secret)
                    .map(|host| SecretMount {
                        var: var.clone(),
                        host: host.clone(),
                    })
                    .ok_or_else(|| EngineError::UnknownSecret {
                        name: secret.clone(),
                    })
            })
            .collect()
    }

    async fn docker<S: AsRef<str>>(&self, args: &[S]) -> Result<Output> {
        let args: Vec<&str> = args.iter().map(AsRef::as_ref).collect();
        tracing::debug!(binary = %self.binary, args = %join_args(&args), "Invoking docker");
        Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                EngineError::DriverUnavailable(format!("cannot run '{}': {e}", self.binary))
            })
    }

    async fn docker_ok<S: AsRef<str>>(&self, args: &[S]) -> Result<String> {
        let output = self.docker(args).await?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(EngineError::DriverUnavailable(format!(
                "docker {} failed: {}",
                args.first().map_or("", AsRef::as_ref),
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }

    fn stage_path(&self) -> PathBuf {
        self.staging.path().join(Uuid::new_v4().simple().to_string())
    }

    /// Writes `contents` to a fresh staging file with `mode`
    async fn stage(&self, contents: &str, mode: u32) -> Result<PathBuf> {
        let staged = self.stage_path();
        tokio::fs::write(&staged, contents).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&staged, std::fs::Permissions::from_mode(mode)).await?;
        }
        #[cfg(not(unix))]
        let _ = mode;
        Ok(staged)
    }

    /// Entrypoint and command of `image`, pulling it when it is not local yet
    async fn image_defaults(&self, image: &str) -> Result<ImageDefaults> {
        if let Some(defaults) = self.defaults.lock().get(image).cloned() {
            return Ok(defaults);
        }
        let inspect = ["image", "inspect", "--format", "{{json .Config}}", image];
        let raw = match self.docker_ok(&inspect).await {
            Ok(raw) => raw,
            Err(_) => {
                self.docker_ok(&["pull", "--quiet", image]).await?;
                self.docker_ok(&inspect).await?
            }
        };
        let defaults: ImageDefaults = serde_json::from_str(&raw).map_err(|e| {
            EngineError::DriverUnavailable(format!("unreadable config of image {image}: {e}"))
        })?;
        self.defaults
            .lock()
            .insert(image.to_string(), defaults.clone());
        Ok(defaults)
    }

    async fn network(&self) -> Result<String> {
        self.network
            .get_or_try_init(|| async {
                let name = format!("ctrforge-{}", Uuid::new_v4().simple());
                self.docker_ok(&["network", "create", name.as_str()]).await?;
                tracing::info!(network = %name, "Service network created");
                Ok(name)
            })
            .await
            .cloned()
    }

    async fn fetch(&self, url: &str) -> Result<PathBuf> {
        let target = self.stage_path();
        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mount = format!("{}:/out", self.staging.path().display());
        let out = format!("/out/{file_name}");
        self.docker_ok(&[
            "run", "--rm", "-v", mount.as_str(), FETCH_IMAGE, "-fsSL", "-o", out.as_str(), url,
        ])
        .await
        .map_err(|e| e.wrap("docker", format!("downloading {url} failed")))?;
        Ok(target)
    }

    async fn seed_volume(&self, backend_name: &str, source: &Path) -> Result<()> {
        if !self.seeded.lock().insert(backend_name.to_string()) {
            return Ok(());
        }
        let dst = format!("{backend_name}:/dst");
        let src = format!("{}:/src:ro", source.display());
        self.docker_ok(&[
            "run", "--rm", "-v", dst.as_str(), "-v", src.as_str(), SEED_IMAGE, "cp", "-a",
            "/src/.", "/dst/",
        ])
        .await?;
        Ok(())
    }

    async fn exec_container(
        &self,
        state: &DockerState,
        argv: &[String],
        config: ExecConfig,
    ) -> Result<(Option<String>, LastExec)> {
        let name = format!("ctrforge-{}", Uuid::new_v4().simple());
        let defaults = self.image_defaults(&state.image).await?;
        let secrets = self.secret_mounts(state)?;
        let command = command_line(state, argv, config.use_entrypoint, &defaults);
        let args = run_args(state, &name, &command, config, false, &secrets);
        let output = self.docker(args.as_slice()).await?;
        let last = LastExec {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        };

        let layer = if last.exit_code == 0 {
            let tag = format!("{}:{}", self.layer_repository, Uuid::new_v4().simple());
            self.docker_ok(commit_args(state, &defaults, &name, &tag).as_slice())
                .await?;
            self.layers.lock().push(tag.clone());
            self.defaults.lock().insert(tag.clone(), defaults);
            Some(tag)
        } else {
            None
        };

        if let Err(e) = self.docker_ok(&["rm", "-f", name.as_str()]).await {
            tracing::warn!(container = %name, error = %e, "Failed to remove exec container");
        }
        Ok((layer, last))
    }
}

impl Drop for DockerDriver {
    fn drop(&mut self) {
        let started = std::mem::take(&mut *self.started.lock());
        let layers = std::mem::take(&mut *self.layers.lock());
        for command in cleanup_commands(&started, self.network.get().map(String::as_str), &layers)
        {
            let _ = std::process::Command::new(&self.binary)
                .args(&command)
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
        }
    }
}

#[async_trait]
impl Driver for DockerDriver {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn ping(&self) -> Result<()> {
        let version = self
            .docker_ok(&["version", "--format", "{{.Server.Version}}"])
            .await?;
        tracing::info!(server = %version, "Docker daemon reachable");
        Ok(())
    }

    async fn from(&self, image: &ImageRef) -> Result<ContainerHandle> {
        let handle = ContainerHandle::new();
        self.containers.lock().insert(
            handle,
            DockerState {
                image: image.url(),
                ..DockerState::default()
            },
        );
        Ok(handle)
    }

    async fn with_env_variable(
        &self,
        ctr: ContainerHandle,
        name: &str,
        value: &str,
        expand_value: bool,
    ) -> Result<ContainerHandle> {
        self.derive(ctr, |s| {
            let value = if expand_value {
                expand(value, |k| s.get_env(k))
            } else {
                value.to_string()
            };
            s.set_env(name, value);
        })
    }

    async fn set_secret(&self, name: &str, value: &SecretValue) -> Result<SecretRef> {
        // readable by any container user, the staging directory stays private on the host
        let staged = self.stage(value.expose(), 0o444).await?;
        self.secrets.lock().insert(name.to_string(), staged);
        Ok(SecretRef {
            name: name.to_string(),
        })
    }

    async fn with_secret_variable(
        &self,
        ctr: ContainerHandle,
        name: &str,
        secret: &SecretRef,
    ) -> Result<ContainerHandle> {
        self.derive(ctr, |s| {
            s.env.retain(|(k, _)| k != name);
            s.secret_env.retain(|(k, _)| k != name);
            s.secret_env.push((name.to_string(), secret.name.clone()));
        })
    }

    async fn with_mounted_directory(
        &self,
        ctr: ContainerHandle,
        path: &str,
        host_dir: &Path,
        owner: Option<&str>,
    ) -> Result<ContainerHandle> {
        if let Some(owner) = owner {
            tracing::debug!(path, owner, "Bind mounts keep host ownership");
        }
        let host_dir = std::fs::canonicalize(host_dir)?;
        let volume = format!("{}:{path}", host_dir.display());
        self.derive(ctr, |s| s.volumes.push(volume))
    }

    async fn with_mounted_file(
        &self,
        ctr: ContainerHandle,
        path: &str,
        source: &FileSource,
        owner: Option<&str>,
    ) -> Result<ContainerHandle> {
        if let Some(owner) = owner {
            tracing::debug!(path, owner, "Bind mounts keep host ownership");
        }
        let host = match source {
            FileSource::Host(host) => std::fs::canonicalize(host)?,
            FileSource::Url(url) => self.fetch(url).await?,
        };
        let volume = format!("{}:{path}:ro", host.display());
        self.derive(ctr, |s| s.volumes.push(volume))
    }

    async fn with_new_file(
        &self,
        ctr: ContainerHandle,
        path: &str,
        contents: &SecretValue,
        permissions: Option<&str>,
    ) -> Result<ContainerHandle> {
        let mode = permissions
            .and_then(|m| u32::from_str_radix(m, 8).ok())
            .unwrap_or(0o644);
        let staged = self.stage(contents.expose(), mode).await?;
        let volume = format!("{}:{path}:ro", staged.display());
        self.derive(ctr, |s| s.volumes.push(volume))
    }

    async fn cache_volume(&self, name: &str) -> Result<VolumeRef> {
        let backend_name = format!("{VOLUME_PREFIX}{name}");
        self.docker_ok(&["volume", "create", backend_name.as_str()])
            .await?;
        Ok(VolumeRef {
            name: name.to_string(),
            backend_name,
        })
    }

    async fn with_mounted_cache(
        &self,
        ctr: ContainerHandle,
        path: &str,
        volume: &VolumeRef,
        mount: CacheMount<'_>,
    ) -> Result<ContainerHandle> {
        if let Some(source) = mount.source {
            self.seed_volume(&volume.backend_name, source).await?;
        }
        let spec = format!("{}:{path}", volume.backend_name);
        self.derive(ctr, |s| s.volumes.push(spec))
    }

    async fn with_workdir(&self, ctr: ContainerHandle, path: &str) -> Result<ContainerHandle> {
        self.derive(ctr, |s| s.workdir = Some(path.to_string()))
    }

    async fn with_user(&self, ctr: ContainerHandle, user: &str) -> Result<ContainerHandle> {
        self.derive(ctr, |s| s.user = Some(user.to_string()))
    }

    async fn with_exposed_port(
        &self,
        ctr: ContainerHandle,
        port: u16,
        protocol: Protocol,
    ) -> Result<ContainerHandle> {
        self.derive(ctr, |s| s.ports.push((port, protocol)))
    }

    async fn with_entrypoint(
        &self,
        ctr: ContainerHandle,
        argv: Option<&[String]>,
    ) -> Result<ContainerHandle> {
        let argv = argv.map(<[String]>::to_vec);
        self.derive(ctr, |s| {
            s.entrypoint = argv;
            s.entrypoint_set = true;
        })
    }

    async fn with_label(
        &self,
        ctr: ContainerHandle,
        key: &str,
        value: &str,
    ) -> Result<ContainerHandle> {
        self.derive(ctr, |s| s.labels.push((key.to_string(), value.to_string())))
    }

    async fn with_exec(
        &self,
        ctr: ContainerHandle,
        argv: &[String],
        config: ExecConfig,
    ) -> Result<ContainerHandle> {
        let state = self.get(ctr)?;
        tracing::info!(image = %state.image, cmd = %join_args(argv), "docker exec");
        let (layer, last) = self.exec_container(&state, argv, config).await?;
        self.derive(ctr, |s| {
            if let Some(layer) = layer {
                s.image = layer;
            }
            s.last = Some(last);
        })
    }

    async fn as_service(
        &self,
        ctr: ContainerHandle,
        command: Option<&[String]>,
        config: ExecConfig,
    ) -> Result<ServiceHandle> {
        let state = self.get(ctr)?;
        let handle = ServiceHandle::new();
        self.services.lock().insert(
            handle,
            ServiceDef {
                state,
                command: command.map(<[String]>::to_vec),
                config,
            },
        );
        Ok(handle)
    }

    async fn with_service_binding(
        &self,
        ctr: ContainerHandle,
        alias: &str,
        service: ServiceHandle,
    ) -> Result<ContainerHandle> {
        let def = self
            .services
            .lock()
            .get(&service)
            .cloned()
            .ok_or_else(|| EngineError::InternalInvariant(format!("unknown service {service}")))?;
        let network = self.network().await?;

        let mut state = def.state.clone();
        state.network = Some(network.clone());
        let name = format!("ctrforge-svc-{}", Uuid::new_v4().simple());
        let defaults = self.image_defaults(&state.image).await?;
        let command = command_line(
            &state,
            def.command.as_deref().unwrap_or_default(),
            def.command.is_none(),
            &defaults,
        );
        let secrets = self.secret_mounts(&state)?;
        let mut args = run_args(&state, &name, &command, def.config, true, &secrets);
        args.insert(3, alias.to_string());
        args.insert(3, "--network-alias".to_string());
        let output = self.docker(args.as_slice()).await?;
        if !output.status.success() {
            return Err(EngineError::DriverUnavailable(format!(
                "service '{alias}' failed to start: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        self.started.lock().push(name);
        tracing::info!(alias, network = %network, "Service started");

        self.derive(ctr, |s| s.network = Some(network))
    }

    async fn stdout(&self, ctr: ContainerHandle) -> Result<String> {
        Ok(self.get(ctr)?.last.map(|l| l.stdout).unwrap_or_default())
    }

    async fn stderr(&self, ctr: ContainerHandle) -> Result<String> {
        Ok(self.get(ctr)?.last.map(|l| l.stderr).unwrap_or_default())
    }

    async fn exit_code(&self, ctr: ContainerHandle) -> Result<i32> {
        Ok(self.get(ctr)?.last.map_or(0, |l| l.exit_code))
    }

    async fn terminal(&self, ctr: ContainerHandle, command: &[String]) -> Result<i32> {
        let state = self.get(ctr)?;
        let name = format!("ctrforge-term-{}", Uuid::new_v4().simple());
        let secrets = self.secret_mounts(&state)?;
        let mut args = run_args(&state, &name, command, ExecConfig::default(), false, &secrets);
        args.insert(1, "-it".to_string());
        args.insert(1, "--rm".to_string());
        let status = Command::new(&self.binary)
            .args(&args)
            .status()
            .await
            .map_err(|e| {
                EngineError::DriverUnavailable(format!("cannot run '{}': {e}", self.binary))
            })?;
        Ok(status.code().unwrap_or(-1))
    }
}
