//! Spec execution
//!
//! [`Executor`] translates the ordered operations of a [`Spec`] into
//! [`Driver`] calls, one operation at a time and never reordered. Exec
//! results are checked as they complete; the first non-zero exit aborts the
//! run with [`EngineError::ExecFailed`].

use super::{CacheMount, ContainerHandle, Driver, ExecConfig};
use crate::engine::cache::CacheVolume;
use crate::engine::errors::{EngineError, Result};
use crate::engine::secrets::SecretValue;
use crate::engine::{CancelToken, Engine};
use crate::spec::{FileChunk, Operation, SharingMode, Spec, SpecState};
use ahash::AHashMap;
use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedMutexGuard, mpsc};
use uuid::Uuid;

const ADAPTER_MODULE: &str = "adapter";
const OUTPUT_TAIL_LINES: usize = 20;
const ROOT_USER: &str = "root";

/// Which stream a chunk of output came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    /// Standard output
    Stdout,
    /// Standard error
    Stderr,
}

/// Output of one exec, forwarded as soon as it is available
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    /// Index of the operation that produced it
    pub op_index: usize,
    /// Source stream
    pub stream: OutputStream,
    /// Text, with secret values scrubbed
    pub text: String,
}

/// Per-run options
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Cancels the run when triggered
    pub cancel: CancelToken,
    /// Overrides the executor's default timeout
    pub timeout: Option<Duration>,
    /// Receives exec output while the run progresses
    pub output: Option<mpsc::UnboundedSender<OutputChunk>>,
}

impl RunOptions {
    /// Options with a fresh token and no timeout
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `cancel` as cancellation token
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Fails the run with [`EngineError::Timeout`] after `timeout`
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Streams exec output to `sink`
    #[must_use]
    pub fn with_output(mut self, sink: mpsc::UnboundedSender<OutputChunk>) -> Self {
        self.output = Some(sink);
        self
    }
}

/// Result of a successful run, describing the last exec
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutput {
    /// Final container state
    pub container: ContainerHandle,
    /// Standard output of the last exec
    pub stdout: String,
    /// Standard error of the last exec
    pub stderr: String,
    /// Exit code of the last exec, 0 when nothing ran
    pub exit_code: i32,
    /// Number of execs performed
    pub execs: usize,
}

/// Container state threaded through the operations of one spec
#[derive(Debug, Default)]
struct RunState {
    ctr: Option<ContainerHandle>,
    user: Option<String>,
    locked: Vec<Arc<CacheVolume>>,
    stdout: String,
    stderr: String,
    exit_code: i32,
    execs: usize,
}

impl RunState {
    fn ctr(&self) -> Result<ContainerHandle> {
        self.ctr
            .ok_or_else(|| EngineError::InternalInvariant("operation before From".to_string()))
    }
}

/// Runs specs against a driver
#[derive(Debug)]
pub struct Executor {
    driver: Arc<dyn Driver>,
    engine: Engine,
    timeout: Option<Duration>,
    states: Mutex<AHashMap<Uuid, SpecState>>,
}

impl Executor {
    /// Executor resolving secrets and volumes through `engine`
    #[must_use]
    pub fn new(driver: Arc<dyn Driver>, engine: Engine) -> Self {
        Self {
            driver,
            engine,
            timeout: None,
            states: Mutex::new(AHashMap::new()),
        }
    }

    /// Timeout applied when [`RunOptions::timeout`] is unset
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Backing driver
    #[must_use]
    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    /// Engine the executor resolves names with
    #[must_use]
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Lifecycle state of `spec` as seen by this executor
    #[must_use]
    pub fn state_of(&self, spec: &Spec) -> SpecState {
        self.states
            .lock()
            .get(&spec.meta().id)
            .copied()
            .unwrap_or_else(|| spec.state())
    }

    /// Applies every operation of `spec` in order.
    ///
    /// # Errors
    ///
    /// [`EngineError::DriverUnavailable`] when the driver cannot be reached,
    /// [`EngineError::ExecFailed`] for the first non-zero exec,
    /// [`EngineError::Canceled`] or [`EngineError::Timeout`] when interrupted,
    /// and any failure of an operation wrapped with its index.
    pub async fn run(&self, spec: &Spec, opts: &RunOptions) -> Result<RunOutput> {
        let start = Instant::now();
        tracing::info!(
            module = %spec.meta().module_name,
            base = %spec.base(),
            ops = spec.len(),
            driver = self.driver.name(),
            "Running spec"
        );

        let result = self
            .guarded(opts, async {
                let _private = self.acquire_private(spec).await;
                let state = self.apply(spec.ops(), opts, None).await?;
                Ok(RunOutput {
                    container: state.ctr()?,
                    stdout: state.stdout,
                    stderr: state.stderr,
                    exit_code: state.exit_code,
                    execs: state.execs,
                })
            })
            .await;

        let state = match &result {
            Err(e) if matches!(e.root_cause(), EngineError::Canceled | EngineError::Timeout(_)) => {
                SpecState::Canceled
            }
            _ => SpecState::Executed,
        };
        self.states.lock().insert(spec.meta().id, state);

        match &result {
            Ok(output) => tracing::info!(
                module = %spec.meta().module_name,
                execs = output.execs,
                duration_ms = start.elapsed().as_millis(),
                "Spec completed"
            ),
            Err(e) => tracing::error!(
                module = %spec.meta().module_name,
                error = %self.engine.scrub(&e.to_string()),
                "Spec failed"
            ),
        }
        result
    }

    /// Applies `spec` and opens an interactive shell in the result.
    ///
    /// Returns the exit code of the shell.
    ///
    /// # Errors
    ///
    /// See [`Executor::run`].
    pub async fn terminal(&self, spec: &Spec, command: &[String], opts: &RunOptions) -> Result<i32> {
        let output = self.run(spec, opts).await?;
        tracing::info!(module = %spec.meta().module_name, "Opening terminal");
        self.driver.terminal(output.container, command).await
    }

    async fn guarded<F>(&self, opts: &RunOptions, work: F) -> Result<RunOutput>
    where
        F: std::future::Future<Output = Result<RunOutput>>,
    {
        if opts.cancel.is_cancelled() {
            return Err(EngineError::Canceled);
        }
        self.driver.ping().await.map_err(|e| {
            e.wrap(
                ADAPTER_MODULE,
                format!("{} driver is unreachable", self.driver.name()),
            )
        })?;

        let cancellable = async {
            tokio::select! {
                biased;
                () = opts.cancel.cancelled() => Err(EngineError::Canceled),
                result = work => result,
            }
        };

        match opts.timeout.or(self.timeout) {
            Some(limit) => tokio::time::timeout(limit, cancellable)
                .await
                .unwrap_or(Err(EngineError::Timeout(limit))),
            None => cancellable.await,
        }
    }

    /// Takes every `Private` volume of the spec tree for the whole run, in
    /// name order so concurrent runs cannot deadlock.
    async fn acquire_private(&self, spec: &Spec) -> Vec<OwnedMutexGuard<()>> {
        let mut names = Vec::new();
        collect_volume_names(spec, &mut names);
        names.sort();
        names.dedup();

        let mut guards = Vec::new();
        for name in names {
            if let Some(volume) = self.engine.volumes().get(&name) {
                if volume.sharing() == SharingMode::Private {
                    if let Some(guard) = volume.acquire().await {
                        tracing::debug!(volume = %name, "Private cache volume acquired");
                        guards.push(guard);
                    }
                }
            }
        }
        guards
    }

    fn apply<'a>(
        &'a self,
        ops: &'a [Operation],
        opts: &'a RunOptions,
        service_of: Option<&'a str>,
    ) -> BoxFuture<'a, Result<RunState>> {
        async move {
            let mut state = RunState::default();
            for (index, op) in ops.iter().enumerate() {
                if opts.cancel.is_cancelled() {
                    return Err(EngineError::Canceled);
                }
                tracing::debug!(index, op = %op, service = service_of.unwrap_or(""), "Applying operation");
                self.apply_op(&mut state, index, op, opts)
                    .await
                    .map_err(|e| match (e, op) {
                        (e @ EngineError::Canceled, _) => e,
                        (e @ EngineError::ExecFailed { .. }, op) if !matches!(op, Operation::BindService { .. }) => e,
                        (e, op) => e.wrap(
                            ADAPTER_MODULE,
                            format!("operation #{index} ({}) failed", op.name()),
                        ),
                    })?;
            }
            Ok(state)
        }
        .boxed()
    }

    async fn apply_op(
        &self,
        state: &mut RunState,
        index: usize,
        op: &Operation,
        opts: &RunOptions,
    ) -> Result<()> {
        let driver = self.driver.as_ref();
        match op {
            Operation::From { image } => {
                state.ctr = Some(driver.from(image).await?);
            }
            Operation::SetEnv {
                name,
                value,
                expand,
            } => {
                state.ctr = Some(
                    driver
                        .with_env_variable(state.ctr()?, name, value, *expand)
                        .await?,
                );
            }
            Operation::BindSecret { name, secret } => {
                let value = self.engine.secrets().resolve(secret)?;
                let secret_ref = driver.set_secret(secret, &value).await?;
                state.ctr = Some(
                    driver
                        .with_secret_variable(state.ctr()?, name, &secret_ref)
                        .await?,
                );
            }
            Operation::MountDir {
                host_dir,
                mount_path,
                owner,
                mode,
            } => {
                state.ctr = Some(
                    driver
                        .with_mounted_directory(
                            state.ctr()?,
                            mount_path,
                            host_dir,
                            owner.as_deref(),
                        )
                        .await?,
                );
                if let Some(mode) = mode {
                    let argv = vec![
                        "chmod".to_string(),
                        "-R".to_string(),
                        mode.clone(),
                        mount_path.clone(),
                    ];
                    self.exec(state, index, &argv, ExecConfig::default(), opts)
                        .await?;
                }
            }
            Operation::MountFile {
                source,
                mount_path,
                owner,
            } => {
                state.ctr = Some(
                    driver
                        .with_mounted_file(state.ctr()?, mount_path, source, owner.as_deref())
                        .await?,
                );
            }
            Operation::MountCacheVolume {
                volume,
                mount_path,
                sharing,
                source_dir,
            } => {
                let handle = self.engine.volumes().get(volume);
                let sharing = handle.as_ref().map_or(*sharing, |v| v.sharing());
                if let Some(handle) = handle {
                    if sharing == SharingMode::Locked
                        && !state.locked.iter().any(|v| Arc::ptr_eq(v, &handle))
                    {
                        state.locked.push(handle);
                        state.locked.sort_by(|a, b| a.name().cmp(b.name()));
                    }
                }
                let volume_ref = driver.cache_volume(volume).await?;
                state.ctr = Some(
                    driver
                        .with_mounted_cache(
                            state.ctr()?,
                            mount_path,
                            &volume_ref,
                            CacheMount {
                                sharing,
                                source: source_dir.as_deref(),
                            },
                        )
                        .await?,
                );
            }
            Operation::NewFile {
                path,
                contents,
                permissions,
            } => {
                let contents = self.resolve_contents(contents)?;
                state.ctr = Some(
                    driver
                        .with_new_file(state.ctr()?, path, &contents, permissions.as_deref())
                        .await?,
                );
            }
            Operation::SetWorkdir { path } => {
                state.ctr = Some(driver.with_workdir(state.ctr()?, path).await?);
            }
            Operation::Exec {
                argv,
                privileged,
                experimental_nesting,
            } => {
                let config = ExecConfig {
                    privileged: *privileged,
                    experimental_nesting: *experimental_nesting,
                    use_entrypoint: false,
                };
                self.exec(state, index, argv, config, opts).await?;
            }
            Operation::ShellExec { script } => {
                let argv = vec!["sh".to_string(), "-c".to_string(), script.clone()];
                self.exec(state, index, &argv, ExecConfig::default(), opts)
                    .await?;
            }
            Operation::SetEntrypoint { argv } => {
                state.ctr = Some(driver.with_entrypoint(state.ctr()?, argv.as_deref()).await?);
            }
            Operation::ExposePort { port, protocol } => {
                state.ctr = Some(
                    driver
                        .with_exposed_port(state.ctr()?, *port, *protocol)
                        .await?,
                );
            }
            Operation::SetUser { user } => {
                state.ctr = Some(driver.with_user(state.ctr()?, user).await?);
                state.user = Some(user.clone());
            }
            Operation::Chown {
                user,
                group,
                paths,
                as_root,
            } => {
                let owner = match group {
                    Some(group) => format!("{user}:{group}"),
                    None => user.clone(),
                };
                if *as_root {
                    state.ctr = Some(driver.with_user(state.ctr()?, ROOT_USER).await?);
                }
                for path in paths {
                    let argv = vec![
                        "chown".to_string(),
                        "-R".to_string(),
                        owner.clone(),
                        path.clone(),
                    ];
                    self.exec(state, index, &argv, ExecConfig::default(), opts)
                        .await?;
                }
                if *as_root {
                    state.ctr = Some(driver.with_user(state.ctr()?, user).await?);
                    state.user = Some(user.clone());
                }
            }
            Operation::Chmod {
                mode,
                paths,
                as_root,
                user,
            } => {
                if *as_root {
                    state.ctr = Some(driver.with_user(state.ctr()?, ROOT_USER).await?);
                }
                for path in paths {
                    let argv = vec![
                        "chmod".to_string(),
                        "-R".to_string(),
                        mode.clone(),
                        path.clone(),
                    ];
                    self.exec(state, index, &argv, ExecConfig::default(), opts)
                        .await?;
                }
                if *as_root {
                    let restore = user
                        .clone()
                        .or_else(|| state.user.clone())
                        .unwrap_or_else(|| ROOT_USER.to_string());
                    state.ctr = Some(driver.with_user(state.ctr()?, &restore).await?);
                    state.user = Some(restore);
                }
            }
            Operation::AddTag { key, value } => {
                state.ctr = Some(driver.with_label(state.ctr()?, key, value).await?);
            }
            Operation::BindService { alias, service } => {
                let (ops, command) = split_service_command(service.ops());
                tracing::info!(alias = %alias, base = %service.base(), "Starting service");
                let service_state = self.apply(ops, opts, Some(alias)).await?;
                let handle = driver
                    .as_service(
                        service_state.ctr()?,
                        command.map(|(argv, _)| argv.as_slice()),
                        command.map_or_else(ExecConfig::default, |(_, config)| config),
                    )
                    .await?;
                state.ctr = Some(
                    driver
                        .with_service_binding(state.ctr()?, alias, handle)
                        .await?,
                );
            }
        }
        Ok(())
    }

    async fn exec(
        &self,
        state: &mut RunState,
        index: usize,
        argv: &[String],
        config: ExecConfig,
        opts: &RunOptions,
    ) -> Result<()> {
        let mut guards = Vec::with_capacity(state.locked.len());
        for volume in &state.locked {
            if let Some(guard) = volume.acquire().await {
                guards.push(guard);
            }
        }

        let driver = self.driver.as_ref();
        let ctr = driver.with_exec(state.ctr()?, argv, config).await?;
        let exit_code = driver.exit_code(ctr).await?;
        let stdout = driver.stdout(ctr).await?;
        let stderr = driver.stderr(ctr).await?;
        drop(guards);

        state.execs += 1;
        tracing::debug!(index, exit_code, "Exec finished");
        self.forward(opts, index, OutputStream::Stdout, &stdout);
        self.forward(opts, index, OutputStream::Stderr, &stderr);

        if exit_code != 0 {
            let combined = if stderr.trim().is_empty() { &stdout } else { &stderr };
            return Err(EngineError::ExecFailed {
                op_index: index,
                exit_code,
                output_tail: self.engine.scrub(&tail(combined, OUTPUT_TAIL_LINES)),
            });
        }

        state.ctr = Some(ctr);
        state.stdout = stdout;
        state.stderr = stderr;
        state.exit_code = exit_code;
        Ok(())
    }

    fn forward(&self, opts: &RunOptions, op_index: usize, stream: OutputStream, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(sink) = &opts.output {
            // A dropped receiver only means nobody is listening.
            let _ = sink.send(OutputChunk {
                op_index,
                stream,
                text: self.engine.scrub(text),
            });
        }
    }

    fn resolve_contents(&self, contents: &[FileChunk]) -> Result<SecretValue> {
        let mut out = String::new();
        for chunk in contents {
            match chunk {
                FileChunk::Text(text) => out.push_str(text),
                FileChunk::Secret(name) => out.push_str(self.engine.secrets().resolve(name)?.expose()),
            }
        }
        Ok(SecretValue::new(out))
    }
}

/// A service spec's trailing `Exec` becomes the service command
fn split_service_command(ops: &[Operation]) -> (&[Operation], Option<(&Vec<String>, ExecConfig)>) {
    match ops.split_last() {
        Some((
            Operation::Exec {
                argv,
                privileged,
                experimental_nesting,
            },
            rest,
        )) => (
            rest,
            Some((
                argv,
                ExecConfig {
                    privileged: *privileged,
                    experimental_nesting: *experimental_nesting,
                    use_entrypoint: false,
                },
            )),
        ),
        _ => (ops, None),
    }
}

fn collect_volume_names(spec: &Spec, names: &mut Vec<String>) {
    for op in spec.ops() {
        match op {
            Operation::MountCacheVolume { volume, .. } => names.push(volume.clone()),
            Operation::BindService { service, .. } => collect_volume_names(service, names),
            _ => {}
        }
    }
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tail_keeps_last_lines() {
        let text = (1..=30).map(|i| i.to_string()).collect::<Vec<_>>().join("\n");
        let out = tail(&text, 3);
        assert_eq!(out, "28\n29\n30");
        assert_eq!(tail("one", 5), "one");
    }

    #[test]
    fn test_run_options_builders() {
        let opts = RunOptions::new().with_timeout(Duration::from_secs(2));
        assert_eq!(opts.timeout, Some(Duration::from_secs(2)));
        assert!(opts.output.is_none());
    }
}
