//! Configuration management

use crate::engine::errors::{EngineError, Result, ResultExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Environment variable overriding [`Config::log_level`]
pub const ENV_LOG_LEVEL: &str = "CTRFORGE_LOG_LEVEL";
/// Environment variable overriding [`Config::driver`]
pub const ENV_DRIVER: &str = "CTRFORGE_DRIVER";
/// Environment variable overriding [`Config::docker_binary`]
pub const ENV_DOCKER: &str = "CTRFORGE_DOCKER";

/// Backend executing specs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    /// In-memory driver
    Simulated,
    /// The `docker` CLI
    #[default]
    Docker,
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverKind::Simulated => write!(f, "simulated"),
            DriverKind::Docker => write!(f, "docker"),
        }
    }
}

impl FromStr for DriverKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "simulated" | "sim" => Ok(DriverKind::Simulated),
            "docker" => Ok(DriverKind::Docker),
            other => Err(EngineError::config(format!(
                "unknown driver '{other}', expected simulated or docker"
            ))),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level
    pub log_level: String,
    /// Default driver
    pub driver: DriverKind,
    /// Docker CLI binary
    pub docker_binary: String,
    /// Default run timeout in seconds
    pub exec_timeout_secs: Option<u64>,
    /// Specs run concurrently by the parallel runner
    pub max_parallel: usize,
    /// Repository committed layers are tagged into
    pub layer_repository: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            driver: DriverKind::Docker,
            docker_binary: "docker".to_string(),
            exec_timeout_secs: None,
            max_parallel: 4,
            layer_repository: "ctrforge-layer".to_string(),
        }
    }
}

impl Config {
    /// Reads a YAML file; missing keys keep their defaults
    ///
    /// # Errors
    ///
    /// IO or YAML failures.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).with_context("config", || {
            format!("failed to read {}", path.display())
        })?;
        let config: Self = serde_yaml::from_str(&text).with_context("config", || {
            format!("failed to parse {}", path.display())
        })?;
        tracing::debug!(path = %path.display(), "Configuration file loaded");
        Ok(config)
    }

    /// Loads `path` when given, then applies the environment overrides
    ///
    /// # Errors
    ///
    /// See [`Config::from_file`] and [`Config::with_overrides`].
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.with_overrides(|name| std::env::var(name).ok())
    }

    /// Applies `CTRFORGE_*` overrides read through `lookup`
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidConfig`] for an unknown driver name.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        if let Some(level) = get(ENV_LOG_LEVEL) {
            self.log_level = level;
        }
        if let Some(driver) = get(ENV_DRIVER) {
            self.driver = driver.parse()?;
        }
        if let Some(binary) = get(ENV_DOCKER) {
            self.docker_binary = binary;
        }
        Ok(self)
    }

    /// Default run timeout
    #[must_use]
    pub fn exec_timeout(&self) -> Option<Duration> {
        self.exec_timeout_secs
            .filter(|s| *s > 0)
            .map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.driver, DriverKind::Docker);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.max_parallel, 4);
        assert_eq!(config.exec_timeout(), None);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "driver: simulated\nexec_timeout_secs: 90").unwrap();
        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.driver, DriverKind::Simulated);
        assert_eq!(config.exec_timeout(), Some(Duration::from_secs(90)));
        assert_eq!(config.docker_binary, "docker");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_LOG_LEVEL, "debug"),
            (ENV_DRIVER, "Simulated"),
            (ENV_DOCKER, ""),
        ]);
        let config = Config::default()
            .with_overrides(|name| env.get(name).map(ToString::to_string))
            .unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.driver, DriverKind::Simulated);
        assert_eq!(config.docker_binary, "docker");

        let err = Config::default()
            .with_overrides(|name| (name == ENV_DRIVER).then(|| "podman".to_string()))
            .unwrap_err();
        assert_eq!(err.kind(), crate::engine::ErrorKind::InvalidConfig);
    }

    #[test]
    fn test_invalid_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_parallel: many").unwrap();
        assert!(Config::from_file(file.path()).is_err());
    }
}
