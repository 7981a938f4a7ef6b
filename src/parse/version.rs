//! Version and tag strings

use crate::engine::errors::{EngineError, Result};
use std::cmp::Ordering;
use std::fmt;

/// Tag used when no version is supplied
pub const LATEST: &str = "latest";

/// A normalised version tag.
///
/// A leading `v` in front of a digit is dropped, so `v1.6.0` and `1.6.0`
/// compare equal. `latest` is recognised and sorts above every release.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionTag {
    tag: String,
    release: Option<(u64, u64, u64)>,
}

impl VersionTag {
    /// Parses a version string
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConfig`] for blank input or a tag that
    /// contains whitespace or `:`.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(EngineError::config("version must not be empty"));
        }
        if trimmed.contains(char::is_whitespace) || trimmed.contains(':') {
            return Err(EngineError::config(format!("invalid version '{trimmed}'")));
        }

        let tag = match trimmed.strip_prefix('v') {
            Some(rest) if rest.starts_with(|c: char| c.is_ascii_digit()) => rest,
            _ => trimmed,
        };

        Ok(Self {
            tag: tag.to_string(),
            release: parse_release(tag),
        })
    }

    /// The `latest` tag
    #[must_use]
    pub fn latest() -> Self {
        Self {
            tag: LATEST.to_string(),
            release: None,
        }
    }

    /// Normalised tag text, without `v` prefix
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.tag
    }

    /// Tag with a `v` prefix when it is a release number
    #[must_use]
    pub fn with_v_prefix(&self) -> String {
        if self.release.is_some() {
            format!("v{}", self.tag)
        } else {
            self.tag.clone()
        }
    }

    /// Returns true for `latest`
    #[must_use]
    pub fn is_latest(&self) -> bool {
        self.tag == LATEST
    }

    /// `(major, minor, patch)` when the tag starts with a release number
    #[must_use]
    pub fn release(&self) -> Option<(u64, u64, u64)> {
        self.release
    }

    /// Returns true when this version is `latest` or not older than the given release
    #[must_use]
    pub fn at_least(&self, major: u64, minor: u64, patch: u64) -> bool {
        if self.is_latest() {
            return true;
        }
        self.release
            .is_some_and(|r| r.cmp(&(major, minor, patch)) != Ordering::Less)
    }
}

impl fmt::Display for VersionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag)
    }
}

/// Reads `MAJOR[.MINOR[.PATCH]]` from the start of a tag, ignoring any suffix
/// such as `-alpine` or `-rc1`.
fn parse_release(tag: &str) -> Option<(u64, u64, u64)> {
    let core = tag.split(['-', '+']).next()?;
    let mut numbers = core.split('.').map(str::parse::<u64>);
    let major = numbers.next()?.ok()?;
    let minor = numbers.next().transpose().ok()?.unwrap_or(0);
    let patch = numbers.next().transpose().ok()?.unwrap_or(0);
    if numbers.next().is_some() {
        return None;
    }
    Some((major, minor, patch))
}
