//! Go test façade

use super::{Facade, FacadeDefaults, FacadeOptions, base_container};
use crate::engine::errors::{EngineError, Result};
use crate::engine::{ContainerBuilder, Distro, Engine, GoCacheOptions};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const GOTEST_MODULE: &str = "gotest";

/// Defaults of the go test façade
pub const GOTEST_DEFAULTS: FacadeDefaults = FacadeDefaults {
    module: GOTEST_MODULE,
    image: "golang",
    version: "1.23-alpine",
    distro: Distro::Alpine,
};

const DEFAULT_PACKAGE: &str = "./...";

/// Flags of one `go test` invocation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GoTestOptions {
    /// `-race`, which also turns cgo on
    pub race: bool,
    /// `-v`
    pub verbose: bool,
    /// `-short`
    pub short: bool,
    /// `-run <regex>`
    pub run: Option<String>,
    /// `-timeout <duration>`
    pub timeout: Option<String>,
    /// `-count <n>`
    pub count: Option<u32>,
    /// `-failfast`
    pub failfast: bool,
    /// `-json`
    pub json: bool,
    /// Extra flags appended as given
    pub flags: Vec<String>,
}

impl GoTestOptions {
    /// Builds the flag list
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidConfig`] when an extra argument is neither a
    /// flag nor the value of the preceding flag.
    pub fn to_args(&self) -> Result<Vec<String>> {
        let mut args = Vec::new();
        if self.race {
            args.push("-race".to_string());
        }
        if self.verbose {
            args.push("-v".to_string());
        }
        if self.short {
            args.push("-short".to_string());
        }
        if self.failfast {
            args.push("-failfast".to_string());
        }
        if self.json {
            args.push("-json".to_string());
        }
        if let Some(pattern) = self.run.as_deref().filter(|p| !p.trim().is_empty()) {
            args.extend(["-run".to_string(), pattern.trim().to_string()]);
        }
        if let Some(timeout) = self.timeout.as_deref().filter(|t| !t.trim().is_empty()) {
            args.extend(["-timeout".to_string(), timeout.trim().to_string()]);
        }
        if let Some(count) = self.count {
            args.extend(["-count".to_string(), count.to_string()]);
        }

        validate_flags(&self.flags)?;
        args.extend(self.flags.iter().map(|f| f.trim().to_string()));
        Ok(args)
    }
}

fn validate_flags(flags: &[String]) -> Result<()> {
    let mut expect_value = false;
    for flag in flags.iter().map(|f| f.trim()) {
        if flag.is_empty() {
            return Err(EngineError::config("go test flags cannot be empty"));
        }
        if flag.starts_with('-') {
            // `-flag value` leaves the next token as its value
            expect_value = !flag.contains('=');
        } else if expect_value {
            expect_value = false;
        } else {
            return Err(EngineError::config(format!(
                "invalid go test argument '{flag}', flags must start with '-'"
            )));
        }
    }
    Ok(())
}

/// Runs `go test` over a mounted source tree
#[derive(Debug, Clone)]
pub struct GoTest {
    container: ContainerBuilder,
}

impl GoTest {
    /// Prepares a golang container with build and module caches and cgo off
    ///
    /// # Errors
    ///
    /// See [`base_container`].
    pub fn new(engine: &Engine, opts: &FacadeOptions) -> Result<Self> {
        let mut container = base_container(engine, &GOTEST_DEFAULTS, opts)?;
        if opts.existing.is_none() {
            let caches = GoCacheOptions::default();
            container = container
                .with_go_build_cache(&caches)?
                .with_go_mod_cache(&caches)?
                .with_cgo_disabled()?;
        }
        Ok(Self { container })
    }

    /// Mounts `src` at `/mnt`, optionally working in a subdirectory
    ///
    /// # Errors
    ///
    /// See [`ContainerBuilder::with_source`].
    pub fn with_source(&self, src: impl Into<PathBuf>, workdir: Option<&str>) -> Result<Self> {
        let src = src.into();
        self.map(|c| c.with_source(src, workdir))
    }

    /// Appends `go test <flags> <packages>`, defaulting to `./...`
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidConfig`] for malformed flags.
    pub fn test<S: AsRef<str>>(&self, packages: &[S], opts: &GoTestOptions) -> Result<Self> {
        let mut argv = vec!["go".to_string(), "test".to_string()];
        argv.extend(opts.to_args()?);

        let packages: Vec<String> = packages
            .iter()
            .map(|p| p.as_ref().trim())
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect();
        if packages.is_empty() {
            argv.push(DEFAULT_PACKAGE.to_string());
        } else {
            argv.extend(packages);
        }
        tracing::info!(command = %argv.join(" "), "Go test command");

        let mut container = self.container.clone();
        if opts.race {
            container = container
                .with_cgo_enabled()?
                .with_gcc_compiler(GOTEST_DEFAULTS.distro)?;
        }
        let container = container.with_exec(argv)?;
        Ok(self.with_container(container))
    }
}

#[async_trait]
impl Facade for GoTest {
    fn container(&self) -> &ContainerBuilder {
        &self.container
    }

    fn with_container(&self, container: ContainerBuilder) -> Self {
        Self { container }
    }
}
