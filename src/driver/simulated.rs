//! In-process driver
//!
//! Keeps container state in memory and interprets a small command set
//! (`printenv`, `env`, `cat`, `echo`, `uname`, `pwd`, `whoami`, `ls`, `true`,
//! `false`, `exit N`, `cd`, `sh -c`/`bash -c`). Other commands succeed with no
//! output unless strict mode is on. Every call is recorded for assertions.

use super::{
    CacheMount, ContainerHandle, Driver, ExecConfig, SecretRef, ServiceHandle, VolumeRef,
};
use crate::engine::errors::{EngineError, Result};
use crate::engine::secrets::SecretValue;
use crate::image::ImageRef;
use crate::parse::{expand, join_args};
use crate::spec::{FileSource, Protocol};
use ahash::AHashMap;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Canned result for a command prefix
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecResponse {
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
    /// Exit code
    pub exit_code: i32,
}

impl ExecResponse {
    /// Successful response printing `stdout`
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    /// Failing response with `exit_code` and `stderr`
    pub fn fail(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stderr: stderr.into(),
            exit_code,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
enum SimFile {
    Inline(String),
    Host(PathBuf),
    Remote(String),
}

#[derive(Debug, Clone)]
struct SimContainer {
    image: String,
    env: Vec<(String, String)>,
    workdir: String,
    user: String,
    entrypoint: Option<Vec<String>>,
    files: BTreeMap<String, SimFile>,
    dirs: BTreeMap<String, PathBuf>,
    caches: BTreeMap<String, String>,
    ports: Vec<(u16, Protocol)>,
    labels: BTreeMap<String, String>,
    services: BTreeMap<String, ServiceHandle>,
    last: Option<ExecResponse>,
}

impl SimContainer {
    fn new(image: String) -> Self {
        Self {
            image,
            env: vec![(
                "PATH".to_string(),
                "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin".to_string(),
            )],
            workdir: "/".to_string(),
            user: "root".to_string(),
            entrypoint: None,
            files: BTreeMap::new(),
            dirs: BTreeMap::new(),
            caches: BTreeMap::new(),
            ports: Vec::new(),
            labels: BTreeMap::new(),
            services: BTreeMap::new(),
            last: None,
        }
    }

    fn get_env(&self, name: &str) -> Option<String> {
        self.env
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
    }

    fn set_env(&mut self, name: &str, value: String) {
        match self.env.iter_mut().find(|(k, _)| k == name) {
            Some(entry) => entry.1 = value,
            None => self.env.push((name.to_string(), value)),
        }
    }

    fn resolve_path(&self, cwd: &str, path: &str) -> String {
        if path.starts_with('/') {
            path.to_string()
        } else if cwd.ends_with('/') {
            format!("{cwd}{path}")
        } else {
            format!("{cwd}/{path}")
        }
    }

    fn host_path(&self, path: &str) -> Option<PathBuf> {
        self.dirs.iter().rev().find_map(|(mount, host)| {
            let rest = path.strip_prefix(mount.as_str())?;
            if rest.is_empty() {
                Some(host.clone())
            } else {
                rest.strip_prefix('/').map(|rest| host.join(rest))
            }
        })
    }

    fn read_file(&self, path: &str) -> Option<String> {
        match self.files.get(path) {
            Some(SimFile::Inline(content)) => Some(content.clone()),
            Some(SimFile::Host(host)) => std::fs::read_to_string(host).ok(),
            Some(SimFile::Remote(_)) => Some(String::new()),
            None => self
                .host_path(path)
                .and_then(|host| std::fs::read_to_string(host).ok()),
        }
    }

    fn list_dir(&self, path: &str) -> Vec<String> {
        let prefix = if path.ends_with('/') {
            path.to_string()
        } else {
            format!("{path}/")
        };
        let mut names: Vec<String> = self
            .files
            .keys()
            .chain(self.dirs.keys())
            .chain(self.caches.keys())
            .filter_map(|p| p.strip_prefix(&prefix))
            .filter_map(|rest| rest.split('/').next())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();
        if let Some(host) = self.host_path(path) {
            if let Ok(entries) = std::fs::read_dir(host) {
                names.extend(
                    entries
                        .filter_map(std::result::Result::ok)
                        .map(|e| e.file_name().to_string_lossy().into_owned()),
                );
            }
        }
        names.sort();
        names.dedup();
        names
    }
}

/// Mutable state of one exec, shared by the commands of a script
struct ShellState<'a> {
    ctr: &'a SimContainer,
    cwd: String,
    stdout: String,
    stderr: String,
}

/// In-memory driver for tests, dry runs and the `simulated` CLI mode
#[derive(Debug, Default)]
pub struct SimulatedDriver {
    containers: Mutex<AHashMap<ContainerHandle, SimContainer>>,
    services: Mutex<AHashMap<ServiceHandle, SimContainer>>,
    secrets: Mutex<AHashMap<String, SecretValue>>,
    responses: Mutex<Vec<(String, ExecResponse)>>,
    calls: Mutex<Vec<String>>,
    unavailable: AtomicBool,
    strict: bool,
    latency: Option<Duration>,
}

impl SimulatedDriver {
    /// A reachable, non-strict driver
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Unknown commands exit with 127 instead of succeeding
    #[must_use]
    pub fn with_strict_commands(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Sleeps for `latency` before each exec
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Simulates an unreachable backend
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Answers every exec whose command line starts with `prefix`
    pub fn respond(&self, prefix: impl Into<String>, response: ExecResponse) {
        self.responses.lock().push((prefix.into(), response));
    }

    /// Calls received so far, in order
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Environment of a container, for assertions
    #[must_use]
    pub fn env_of(&self, ctr: ContainerHandle) -> Option<Vec<(String, String)>> {
        self.containers.lock().get(&ctr).map(|c| c.env.clone())
    }

    /// Labels of a container, for assertions
    #[must_use]
    pub fn labels_of(&self, ctr: ContainerHandle) -> Option<BTreeMap<String, String>> {
        self.containers.lock().get(&ctr).map(|c| c.labels.clone())
    }

    /// Exposed ports of a container, for assertions
    #[must_use]
    pub fn ports_of(&self, ctr: ContainerHandle) -> Option<Vec<(u16, Protocol)>> {
        self.containers.lock().get(&ctr).map(|c| c.ports.clone())
    }

    fn record(&self, call: String) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(EngineError::DriverUnavailable(
                "simulated driver is offline".to_string(),
            ));
        }
        tracing::trace!(call = %call, "Simulated driver call");
        self.calls.lock().push(call);
        Ok(())
    }

    fn get(&self, ctr: ContainerHandle) -> Result<SimContainer> {
        self.containers
            .lock()
            .get(&ctr)
            .cloned()
            .ok_or_else(|| EngineError::InternalInvariant(format!("unknown container {ctr}")))
    }

    fn derive<F>(&self, ctr: ContainerHandle, change: F) -> Result<ContainerHandle>
    where
        F: FnOnce(&mut SimContainer),
    {
        let mut next = self.get(ctr)?;
        change(&mut next);
        let handle = ContainerHandle::new();
        self.containers.lock().insert(handle, next);
        Ok(handle)
    }

    fn canned(&self, line: &str) -> Option<ExecResponse> {
        self.responses
            .lock()
            .iter()
            .rev()
            .find(|(prefix, _)| line.starts_with(prefix.as_str()))
            .map(|(_, response)| response.clone())
    }

    fn run_argv(&self, state: &mut ShellState<'_>, argv: &[String]) -> i32 {
        let Some(cmd) = argv.first() else {
            return 0;
        };
        if let Some(response) = self.canned(&argv.join(" ")) {
            state.stdout.push_str(&response.stdout);
            state.stderr.push_str(&response.stderr);
            return response.exit_code;
        }

        let args = &argv[1..];
        match cmd.as_str() {
            "sh" | "bash" if args.first().is_some_and(|a| a == "-c") => match args.get(1) {
                Some(script) => self.run_script(state, script),
                None => {
                    state.stderr.push_str(&format!("{cmd}: -c: option requires an argument\n"));
                    2
                }
            },
            "printenv" | "env" => {
                if let Some(name) = args.first().filter(|_| cmd == "printenv") {
                    match state.ctr.get_env(name) {
                        Some(value) => {
                            state.stdout.push_str(&value);
                            state.stdout.push('\n');
                            0
                        }
                        None => 1,
                    }
                } else {
                    for (k, v) in &state.ctr.env {
                        state.stdout.push_str(&format!("{k}={v}\n"));
                    }
                    0
                }
            }
            "echo" => {
                let (newline, words) = match args.first().map(String::as_str) {
                    Some("-n") => (false, &args[1..]),
                    Some("-e") => (true, &args[1..]),
                    _ => (true, args),
                };
                state.stdout.push_str(&words.join(" ").replace("\\n", "\n"));
                if newline {
                    state.stdout.push('\n');
                }
                0
            }
            "cat" => {
                let mut code = 0;
                for path in args {
                    let full = state.ctr.resolve_path(&state.cwd, path);
                    match state.ctr.read_file(&full) {
                        Some(content) => state.stdout.push_str(&content),
                        None => {
                            state
                                .stderr
                                .push_str(&format!("cat: {path}: No such file or directory\n"));
                            code = 1;
                        }
                    }
                }
                code
            }
            "ls" => {
                let target = args
                    .iter()
                    .find(|a| !a.starts_with('-'))
                    .map_or_else(|| state.cwd.clone(), |p| state.ctr.resolve_path(&state.cwd, p));
                for name in state.ctr.list_dir(&target) {
                    state.stdout.push_str(&name);
                    state.stdout.push('\n');
                }
                0
            }
            "uname" => {
                if args.iter().any(|a| a == "-a") {
                    state.stdout.push_str("Linux simulated 6.1.0 x86_64 Linux\n");
                } else if args.iter().any(|a| a == "-m") {
                    state.stdout.push_str("x86_64\n");
                } else {
                    state.stdout.push_str("Linux\n");
                }
                0
            }
            "pwd" => {
                state.stdout.push_str(&state.cwd);
                state.stdout.push('\n');
                0
            }
            "whoami" => {
                state.stdout.push_str(&state.ctr.user);
                state.stdout.push('\n');
                0
            }
            "cd" => {
                let target = args.first().map_or("/", String::as_str);
                state.cwd = state.ctr.resolve_path(&state.cwd, target);
                0
            }
            "true" => 0,
            "false" => 1,
            "exit" => args.first().and_then(|c| c.parse().ok()).unwrap_or(0),
            other if self.strict => {
                state.stderr.push_str(&format!("sh: {other}: not found\n"));
                127
            }
            _ => 0,
        }
    }

    /// Runs `a && b; c`, honouring `&&` short-circuit
    fn run_script(&self, state: &mut ShellState<'_>, script: &str) -> i32 {
        let mut code = 0;
        let mut skip_until_semicolon = false;
        for (command, separator) in split_script(script) {
            if !skip_until_semicolon {
                let expanded = expand(&command, |name| state.ctr.get_env(name));
                code = match shell_words::split(&expanded) {
                    Ok(argv) => self.run_argv(state, &argv),
                    Err(e) => {
                        state.stderr.push_str(&format!("sh: syntax error: {e}\n"));
                        2
                    }
                };
                if argv_is_exit(&command) {
                    return code;
                }
            }
            skip_until_semicolon = match separator {
                Some(Separator::And) => skip_until_semicolon || code != 0,
                _ => false,
            };
        }
        code
    }
}

fn argv_is_exit(command: &str) -> bool {
    command.trim_start().starts_with("exit")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Separator {
    And,
    Semicolon,
}

/// Splits shell text on unquoted `&&`, `;` and newlines
fn split_script(script: &str) -> Vec<(String, Option<Separator>)> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut chars = script.chars().peekable();

    while let Some(ch) = chars.next() {
        match quote {
            Some(q) => {
                if ch == q {
                    quote = None;
                }
                current.push(ch);
            }
            None => match ch {
                '\'' | '"' => {
                    quote = Some(ch);
                    current.push(ch);
                }
                '&' if chars.peek() == Some(&'&') => {
                    chars.next();
                    parts.push((std::mem::take(&mut current), Some(Separator::And)));
                }
                ';' | '\n' => parts.push((std::mem::take(&mut current), Some(Separator::Semicolon))),
                _ => current.push(ch),
            },
        }
    }
    parts.push((current, None));
    parts
        .into_iter()
        .filter(|(cmd, _)| !cmd.trim().is_empty())
        .collect()
}

#[async_trait]
impl Driver for SimulatedDriver {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn ping(&self) -> Result<()> {
        self.record("Ping".to_string())
    }

    async fn from(&self, image: &ImageRef) -> Result<ContainerHandle> {
        self.record(format!("From({image})"))?;
        let handle = ContainerHandle::new();
        self.containers
            .lock()
            .insert(handle, SimContainer::new(image.to_string()));
        Ok(handle)
    }

    async fn with_env_variable(
        &self,
        ctr: ContainerHandle,
        name: &str,
        value: &str,
        expand_value: bool,
    ) -> Result<ContainerHandle> {
        self.record(format!("WithEnvVariable({name}={value}, expand={expand_value})"))?;
        self.derive(ctr, |c| {
            let value = if expand_value {
                expand(value, |k| c.get_env(k))
            } else {
                value.to_string()
            };
            c.set_env(name, value);
        })
    }

    async fn set_secret(&self, name: &str, value: &SecretValue) -> Result<SecretRef> {
        self.record(format!("SetSecret({name})"))?;
        self.secrets.lock().insert(name.to_string(), value.clone());
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
        self.record(format!("WithSecretVariable({name}, secret:{})", secret.name))?;
        let value = self
            .secrets
            .lock()
            .get(&secret.name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownSecret {
                name: secret.name.clone(),
            })?;
        self.derive(ctr, |c| c.set_env(name, value.expose().to_string()))
    }

    async fn with_mounted_directory(
        &self,
        ctr: ContainerHandle,
        path: &str,
        host_dir: &Path,
        owner: Option<&str>,
    ) -> Result<ContainerHandle> {
        self.record(format!(
            "WithMountedDirectory({path}, {}, owner={})",
            host_dir.display(),
            owner.unwrap_or("")
        ))?;
        let host_dir = host_dir.to_path_buf();
        self.derive(ctr, |c| {
            c.dirs.insert(path.to_string(), host_dir);
        })
    }

    async fn with_mounted_file(
        &self,
        ctr: ContainerHandle,
        path: &str,
        source: &FileSource,
        owner: Option<&str>,
    ) -> Result<ContainerHandle> {
        self.record(format!(
            "WithMountedFile({path}, {source}, owner={})",
            owner.unwrap_or("")
        ))?;
        let file = match source {
            FileSource::Host(host) => SimFile::Host(host.clone()),
            FileSource::Url(url) => SimFile::Remote(url.clone()),
        };
        self.derive(ctr, |c| {
            c.files.insert(path.to_string(), file);
        })
    }

    async fn with_new_file(
        &self,
        ctr: ContainerHandle,
        path: &str,
        contents: &SecretValue,
        permissions: Option<&str>,
    ) -> Result<ContainerHandle> {
        self.record(format!(
            "WithNewFile({path}, permissions={})",
            permissions.unwrap_or("")
        ))?;
        let contents = contents.expose().to_string();
        self.derive(ctr, |c| {
            c.files.insert(path.to_string(), SimFile::Inline(contents));
        })
    }

    async fn cache_volume(&self, name: &str) -> Result<VolumeRef> {
        self.record(format!("CacheVolume({name})"))?;
        Ok(VolumeRef {
            name: name.to_string(),
            backend_name: name.to_string(),
        })
    }

    async fn with_mounted_cache(
        &self,
        ctr: ContainerHandle,
        path: &str,
        volume: &VolumeRef,
        mount: CacheMount<'_>,
    ) -> Result<ContainerHandle> {
        self.record(format!(
            "WithMountedCache({path}, {}, {})",
            volume.name, mount.sharing
        ))?;
        let name = volume.name.clone();
        self.derive(ctr, |c| {
            c.caches.insert(path.to_string(), name);
        })
    }

    async fn with_workdir(&self, ctr: ContainerHandle, path: &str) -> Result<ContainerHandle> {
        self.record(format!("WithWorkdir({path})"))?;
        self.derive(ctr, |c| c.workdir = path.to_string())
    }

    async fn with_user(&self, ctr: ContainerHandle, user: &str) -> Result<ContainerHandle> {
        self.record(format!("WithUser({user})"))?;
        self.derive(ctr, |c| c.user = user.to_string())
    }

    async fn with_exposed_port(
        &self,
        ctr: ContainerHandle,
        port: u16,
        protocol: Protocol,
    ) -> Result<ContainerHandle> {
        self.record(format!("WithExposedPort({port}/{protocol})"))?;
        self.derive(ctr, |c| c.ports.push((port, protocol)))
    }

    async fn with_entrypoint(
        &self,
        ctr: ContainerHandle,
        argv: Option<&[String]>,
    ) -> Result<ContainerHandle> {
        match argv {
            Some(argv) => self.record(format!("WithEntrypoint({argv:?})"))?,
            None => self.record("WithoutEntrypoint".to_string())?,
        }
        let argv = argv.map(<[String]>::to_vec);
        self.derive(ctr, |c| c.entrypoint = argv)
    }

    async fn with_label(
        &self,
        ctr: ContainerHandle,
        key: &str,
        value: &str,
    ) -> Result<ContainerHandle> {
        self.record(format!("WithLabel({key}={value})"))?;
        self.derive(ctr, |c| {
            c.labels.insert(key.to_string(), value.to_string());
        })
    }

    async fn with_exec(
        &self,
        ctr: ContainerHandle,
        argv: &[String],
        config: ExecConfig,
    ) -> Result<ContainerHandle> {
        self.record(format!("WithExec({argv:?})"))?;
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let container = self.get(ctr)?;
        let full_argv: Vec<String> = match (&container.entrypoint, config.use_entrypoint) {
            (Some(entrypoint), true) => entrypoint.iter().chain(argv).cloned().collect(),
            _ => argv.to_vec(),
        };
        tracing::debug!(image = %container.image, cmd = %join_args(&full_argv), "Simulated exec");

        let mut state = ShellState {
            ctr: &container,
            cwd: container.workdir.clone(),
            stdout: String::new(),
            stderr: String::new(),
        };
        let exit_code = self.run_argv(&mut state, &full_argv);
        let response = ExecResponse {
            stdout: state.stdout,
            stderr: state.stderr,
            exit_code,
        };

        self.derive(ctr, |c| c.last = Some(response))
    }

    async fn as_service(
        &self,
        ctr: ContainerHandle,
        command: Option<&[String]>,
        config: ExecConfig,
    ) -> Result<ServiceHandle> {
        self.record(format!(
            "AsService({:?}, privileged={})",
            command.unwrap_or_default(),
            config.privileged
        ))?;
        let container = self.get(ctr)?;
        let handle = ServiceHandle::new();
        self.services.lock().insert(handle, container);
        Ok(handle)
    }

    async fn with_service_binding(
        &self,
        ctr: ContainerHandle,
        alias: &str,
        service: ServiceHandle,
    ) -> Result<ContainerHandle> {
        self.record(format!("WithServiceBinding({alias})"))?;
        if !self.services.lock().contains_key(&service) {
            return Err(EngineError::InternalInvariant(format!(
                "unknown service {service}"
            )));
        }
        self.derive(ctr, |c| {
            c.services.insert(alias.to_string(), service);
        })
    }

    async fn stdout(&self, ctr: ContainerHandle) -> Result<String> {
        self.record("Stdout".to_string())?;
        Ok(self.get(ctr)?.last.map(|l| l.stdout).unwrap_or_default())
    }

    async fn stderr(&self, ctr: ContainerHandle) -> Result<String> {
        self.record("Stderr".to_string())?;
        Ok(self.get(ctr)?.last.map(|l| l.stderr).unwrap_or_default())
    }

    async fn exit_code(&self, ctr: ContainerHandle) -> Result<i32> {
        self.record("ExitCode".to_string())?;
        Ok(self.get(ctr)?.last.map_or(0, |l| l.exit_code))
    }

    async fn terminal(&self, ctr: ContainerHandle, command: &[String]) -> Result<i32> {
        self.record(format!("Terminal({command:?})"))?;
        self.get(ctr)?;
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(items: &[&str]) -> Vec<String> {
        items.iter().map(ToString::to_string).collect()
    }

    async fn alpine(driver: &SimulatedDriver) -> ContainerHandle {
        driver.from(&ImageRef::parse("alpine").unwrap()).await.unwrap()
    }

    #[tokio::test]
    async fn test_handles_are_immutable() {
        let driver = SimulatedDriver::new();
        let base = alpine(&driver).await;
        let with_env = driver
            .with_env_variable(base, "A", "1", false)
            .await
            .unwrap();
        assert!(driver.env_of(base).unwrap().iter().all(|(k, _)| k != "A"));
        assert!(driver.env_of(with_env).unwrap().contains(&("A".to_string(), "1".to_string())));
    }

    #[tokio::test]
    async fn test_expand_uses_existing_env() {
        let driver = SimulatedDriver::new();
        let ctr = alpine(&driver).await;
        let ctr = driver.with_env_variable(ctr, "GOPATH", "/go", false).await.unwrap();
        let ctr = driver
            .with_env_variable(ctr, "BIN", "$GOPATH/bin", true)
            .await
            .unwrap();
        let ctr = driver.with_exec(ctr, &argv(&["printenv", "BIN"]), ExecConfig::default()).await.unwrap();
        assert_eq!(driver.stdout(ctr).await.unwrap(), "/go/bin\n");
    }

    #[tokio::test]
    async fn test_shell_script_and_chain() {
        let driver = SimulatedDriver::new();
        let ctr = alpine(&driver).await;
        let ctr = driver
            .with_exec(
                ctr,
                &argv(&["sh", "-c", "false && echo never; echo after"]),
                ExecConfig::default(),
            )
            .await
            .unwrap();
        assert_eq!(driver.stdout(ctr).await.unwrap(), "after\n");
        assert_eq!(driver.exit_code(ctr).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_exit_code_is_reported() {
        let driver = SimulatedDriver::new();
        let ctr = alpine(&driver).await;
        let ctr = driver
            .with_exec(ctr, &argv(&["sh", "-c", "exit 3"]), ExecConfig::default())
            .await
            .unwrap();
        assert_eq!(driver.exit_code(ctr).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_new_file_and_cat() {
        let driver = SimulatedDriver::new();
        let ctr = alpine(&driver).await;
        let ctr = driver
            .with_new_file(ctr, "/etc/motd", &SecretValue::new("hello\n"), None)
            .await
            .unwrap();
        let ctr = driver
            .with_exec(ctr, &argv(&["cat", "/etc/motd"]), ExecConfig::default())
            .await
            .unwrap();
        assert_eq!(driver.stdout(ctr).await.unwrap(), "hello\n");
    }

    #[tokio::test]
    async fn test_mounted_directory_reads_host_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.tf"), "terraform {}\n").unwrap();
        let driver = SimulatedDriver::new();
        let ctr = alpine(&driver).await;
        let ctr = driver
            .with_mounted_directory(ctr, "/mnt", dir.path(), None)
            .await
            .unwrap();
        let ctr = driver.with_workdir(ctr, "/mnt").await.unwrap();
        let listed = driver
            .with_exec(ctr, &argv(&["ls"]), ExecConfig::default())
            .await
            .unwrap();
        assert_eq!(driver.stdout(listed).await.unwrap(), "main.tf\n");
        let read = driver
            .with_exec(ctr, &argv(&["cat", "main.tf"]), ExecConfig::default())
            .await
            .unwrap();
        assert_eq!(driver.stdout(read).await.unwrap(), "terraform {}\n");
    }

    #[tokio::test]
    async fn test_canned_responses_and_strict_mode() {
        let driver = SimulatedDriver::new().with_strict_commands(true);
        driver.respond("terraform version", ExecResponse::ok("Terraform v1.9.0\n"));
        let ctr = alpine(&driver).await;
        let ok = driver
            .with_exec(ctr, &argv(&["terraform", "version"]), ExecConfig::default())
            .await
            .unwrap();
        assert_eq!(driver.stdout(ok).await.unwrap(), "Terraform v1.9.0\n");

        let missing = driver
            .with_exec(ctr, &argv(&["tflint"]), ExecConfig::default())
            .await
            .unwrap();
        assert_eq!(driver.exit_code(missing).await.unwrap(), 127);
    }

    #[tokio::test]
    async fn test_offline_driver_fails_calls() {
        let driver = SimulatedDriver::new();
        driver.set_available(false);
        let err = driver.ping().await.unwrap_err();
        assert!(matches!(err, EngineError::DriverUnavailable(_)));
    }

    #[test]
    fn test_split_script() {
        let parts = split_script("cd / && echo 'a && b'; pwd");
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[1].0.trim(), "echo 'a && b'");
        assert_eq!(parts[0].1, Some(Separator::And));
    }
}
