//! Image references and the fallback-aware resolver

use crate::engine::errors::{EngineError, Result};
use crate::parse::version::LATEST;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// `[registry[:port]/]path(/path)*` followed by `:tag`
static IMAGE_REF_REGEX: Lazy<Regex> = Lazy::new(|| {
    let domain_component = r"(?:[a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9])";
    let domain = format!(r"{domain_component}(?:\.{domain_component})*(?::[0-9]+)?");
    let path_component = r"[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*";
    let name = format!(r"(?:{domain}/)?{path_component}(?:/{path_component})*");
    let tag = r"[\w][\w.-]{0,127}";
    Regex::new(&format!(r"^(?P<name>{name}):(?P<tag>{tag})$")).unwrap()
});

/// A resolved `image:tag` reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRef {
    /// Repository path, including any registry host
    pub image: String,
    /// Tag, never empty
    pub tag: String,
}

impl ImageRef {
    /// Builds and validates a reference from its parts
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidImageUrl`] when the composed reference
    /// does not match the image grammar.
    pub fn new(image: &str, tag: &str) -> Result<Self> {
        let url = compose(image, tag);
        validate(&url)?;
        let tag = tag.trim();
        Ok(Self {
            image: image.trim().to_string(),
            tag: if tag.is_empty() { LATEST } else { tag }.to_string(),
        })
    }

    /// Parses `image[:tag]`, defaulting the tag to `latest`
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidImageUrl`] for digests, blank input or
    /// anything that fails the grammar.
    pub fn parse(url: &str) -> Result<Self> {
        let url = url.trim();
        if url.is_empty() {
            return Err(invalid(url, "image must not be empty"));
        }
        if url.contains('@') {
            return Err(invalid(url, "digest references are not supported"));
        }
        let (image, tag) = split_tag(url);
        if tag == Some("") {
            return Err(invalid(url, "tag must not be empty"));
        }
        Self::new(image, tag.unwrap_or(LATEST))
    }

    /// Full `image:tag` string
    #[must_use]
    pub fn url(&self) -> String {
        compose(&self.image, &self.tag)
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.image, self.tag)
    }
}

impl std::str::FromStr for ImageRef {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn invalid(url: &str, reason: &str) -> EngineError {
    EngineError::InvalidImageUrl {
        url: url.to_string(),
        reason: reason.to_string(),
    }
}

/// Splits a trailing `:tag`, ignoring a colon that belongs to a registry port.
fn split_tag(url: &str) -> (&str, Option<&str>) {
    match url.rsplit_once(':') {
        Some((name, tag)) if !tag.contains('/') => (name, Some(tag)),
        _ => (url, None),
    }
}

/// Joins image and version into `image:version`, defaulting to `latest`
#[must_use]
pub fn compose(image: &str, version: &str) -> String {
    let version = version.trim();
    let version = if version.is_empty() { LATEST } else { version };
    format!("{}:{}", image.trim(), version)
}

/// Validates a full `image:tag` string
///
/// # Errors
///
/// Returns [`EngineError::InvalidImageUrl`] when the string does not match.
pub fn validate(url: &str) -> Result<()> {
    if IMAGE_REF_REGEX.is_match(url) {
        Ok(())
    } else {
        Err(invalid(url, "expected [registry/]name:tag"))
    }
}

/// Resolves user supplied image and version with configured fallbacks
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageResolver {
    fallback_image: Option<String>,
    fallback_version: Option<String>,
}

impl ImageResolver {
    /// Resolver without fallbacks
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the image used when the caller supplies none
    #[must_use]
    pub fn with_fallback_image(mut self, image: impl Into<String>) -> Self {
        self.fallback_image = Some(image.into());
        self
    }

    /// Sets the version used when the caller supplies none
    #[must_use]
    pub fn with_fallback_version(mut self, version: impl Into<String>) -> Self {
        self.fallback_version = Some(version.into());
        self
    }

    /// Fills gaps from the fallbacks and validates the result.
    ///
    /// An image that already carries a tag keeps it when no version is given.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidImageUrl`] when no image is available or
    /// the composed reference is malformed.
    pub fn resolve(&self, image: &str, version: &str) -> Result<ImageRef> {
        let image = non_blank(image)
            .or_else(|| self.fallback_image.as_deref().and_then(non_blank))
            .ok_or_else(|| invalid("", "no image supplied and no fallback configured"))?;

        let version = non_blank(version).or_else(|| self.fallback_version.as_deref().and_then(non_blank));

        match version {
            Some(version) => ImageRef::new(image, version),
            None => ImageRef::parse(image),
        }
    }

    /// Like [`ImageResolver::resolve`] but returns the `image:tag` string
    ///
    /// # Errors
    ///
    /// See [`ImageResolver::resolve`].
    pub fn resolve_url(&self, image: &str, version: &str) -> Result<String> {
        self.resolve(image, version).map(|r| r.url())
    }
}

fn non_blank(value: &str) -> Option<&str> {
    let value = value.trim();
    (!value.is_empty()).then_some(value)
}
