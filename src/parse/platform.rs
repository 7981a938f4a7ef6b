//! Platform triples (`os/arch[/variant]`)

use crate::engine::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Target platform of a build
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Platform {
    /// Operating system, e.g. `linux`
    pub os: String,
    /// CPU architecture, e.g. `amd64`
    pub arch: String,
    /// Optional architecture variant, e.g. `v7`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl Platform {
    /// Creates a platform without variant
    pub fn new(os: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            arch: arch.into(),
            variant: None,
        }
    }

    /// Sets the architecture variant
    #[must_use]
    pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = Some(variant.into());
        self
    }

    /// Variant or the empty string
    #[must_use]
    pub fn variant_str(&self) -> &str {
        self.variant.as_deref().unwrap_or("")
    }

    /// Go toolchain variables for this platform
    #[must_use]
    pub fn go_env(&self) -> Vec<(&'static str, String)> {
        let mut env = vec![("GOOS", self.os.clone()), ("GOARCH", self.arch.clone())];
        if let Some(variant) = &self.variant {
            env.push(("GOARM", variant.clone()));
        }
        env
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self::new("linux", "amd64")
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.arch)?;
        if let Some(variant) = &self.variant {
            write!(f, "/{variant}")?;
        }
        Ok(())
    }
}

fn valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
}

impl FromStr for Platform {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('/').collect();
        if !(2..=3).contains(&parts.len()) || !parts.iter().all(|p| valid_segment(p)) {
            return Err(EngineError::InvalidPlatform(s.to_string()));
        }
        let platform = Self::new(parts[0], parts[1]);
        Ok(match parts.get(2) {
            Some(variant) => platform.with_variant(*variant),
            None => platform,
        })
    }
}

/// Parses an optional platform string, defaulting to `linux/amd64`
///
/// # Errors
///
/// Returns [`EngineError::InvalidPlatform`] for any shape other than
/// `os/arch` or `os/arch/variant`.
pub fn parse_platform_or_default(input: Option<&str>) -> Result<Platform, EngineError> {
    match input.map(str::trim) {
        None | Some("") => Ok(Platform::default()),
        Some(value) => value.parse(),
    }
}
