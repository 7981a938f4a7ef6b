//! Immutable container specifications
//!
//! A [`Spec`] is a base image plus an ordered, append-only list of
//! [`Operation`]s. Appending produces a new value; published specs never
//! change. Operations are shared between snapshots until one of them appends.

pub mod operation;

pub use operation::{FileChunk, FileSource, Operation, Protocol, SharingMode, redacted_contents};

use crate::engine::errors::{EngineError, Result};
use crate::image::ImageRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Informational metadata of a spec
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecMeta {
    /// Unique id of this snapshot
    pub id: Uuid,
    /// Module (façade) that built the spec
    pub module_name: String,
    /// Creation time of the first snapshot in the chain
    pub created_at: DateTime<Utc>,
}

/// Lifecycle of a container spec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpecState {
    /// No base image selected yet
    Unbased,
    /// Only the base image is set
    Based,
    /// At least one non-base operation was appended
    Configured,
    /// An exec was realised against a driver
    Executed,
    /// A run was cancelled before completion
    Canceled,
}

impl fmt::Display for SpecState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SpecState::Unbased => "unbased",
            SpecState::Based => "based",
            SpecState::Configured => "configured",
            SpecState::Executed => "executed",
            SpecState::Canceled => "canceled",
        };
        f.write_str(name)
    }
}

/// An immutable, ordered description of a container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spec {
    base: ImageRef,
    ops: Arc<Vec<Operation>>,
    meta: SpecMeta,
}

impl Spec {
    /// Creates a spec whose first operation selects `base`
    pub fn new(base: ImageRef, module_name: impl Into<String>) -> Self {
        Self {
            ops: Arc::new(vec![Operation::From { image: base.clone() }]),
            base,
            meta: SpecMeta {
                id: Uuid::new_v4(),
                module_name: module_name.into(),
                created_at: Utc::now(),
            },
        }
    }

    /// Returns a new spec with `op` appended
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InternalInvariant`] when `op` is a second `From`.
    pub fn append(&self, op: Operation) -> Result<Self> {
        if matches!(op, Operation::From { .. }) {
            return Err(EngineError::InternalInvariant(
                "base image can only be set once".to_string(),
            ));
        }
        let mut next = self.clone();
        Arc::make_mut(&mut next.ops).push(op);
        next.meta.id = Uuid::new_v4();
        Ok(next)
    }

    /// Base image reference
    #[must_use]
    pub fn base(&self) -> &ImageRef {
        &self.base
    }

    /// Operations in application order
    #[must_use]
    pub fn ops(&self) -> &[Operation] {
        &self.ops
    }

    /// Metadata
    #[must_use]
    pub fn meta(&self) -> &SpecMeta {
        &self.meta
    }

    /// Number of operations, base selection included
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Always false: the base selection is the first operation
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Static state derived from the operations
    #[must_use]
    pub fn state(&self) -> SpecState {
        if self.ops.len() > 1 {
            SpecState::Configured
        } else {
            SpecState::Based
        }
    }

    /// Returns a copy attributed to another module
    #[must_use]
    pub fn with_module_name(&self, module_name: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.meta.module_name = module_name.into();
        next
    }

    /// Last literal value set for `name`, ignoring secret bindings
    #[must_use]
    pub fn env_value(&self, name: &str) -> Option<&str> {
        self.ops
            .iter()
            .rev()
            .find_map(|op| match op {
                Operation::SetEnv { name: n, value, .. } if n == name => Some(Some(value.as_str())),
                Operation::BindSecret { name: n, .. } if n == name => Some(None),
                _ => None,
            })
            .flatten()
    }

    /// Current working directory after all operations
    #[must_use]
    pub fn workdir(&self) -> Option<&str> {
        self.ops.iter().rev().find_map(|op| match op {
            Operation::SetWorkdir { path } => Some(path.as_str()),
            _ => None,
        })
    }

    /// Distinct secret names referenced, in order of first use
    #[must_use]
    pub fn secret_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for name in self.ops.iter().flat_map(Operation::secret_refs) {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }

    /// Distinct cache volume names referenced, in order of first use
    #[must_use]
    pub fn cache_volumes(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for op in self.ops.iter() {
            if let Operation::MountCacheVolume { volume, .. } = op {
                if !names.contains(&volume.as_str()) {
                    names.push(volume);
                }
            }
        }
        names
    }

    /// Human readable listing, one numbered operation per line.
    ///
    /// Secret values never appear: only their names are rendered.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = format!(
            "# spec {} ({}, {} ops)\n",
            self.meta.module_name,
            self.base,
            self.ops.len()
        );
        for (index, op) in self.ops.iter().enumerate() {
            out.push_str(&format!("{index:>3}  {op}\n"));
        }
        out
    }

    /// JSON document of the spec, secret-free like [`Spec::render`]
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InternalInvariant`] if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| EngineError::InternalInvariant(format!("spec serialization: {e}")))
    }
}

impl fmt::Display for Spec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn alpine() -> Spec {
        Spec::new(ImageRef::parse("alpine").unwrap(), "test")
    }

    #[test]
    fn test_new_spec_has_from() {
        let spec = alpine();
        assert_eq!(spec.len(), 1);
        assert_eq!(spec.state(), SpecState::Based);
        assert_eq!(spec.base().to_string(), "alpine:latest");
    }

    #[test]
    fn test_append_leaves_original_untouched() {
        let spec = alpine();
        let next = spec
            .append(Operation::SetUser {
                user: "me".to_string(),
            })
            .unwrap();
        assert_eq!(spec.len(), 1);
        assert_eq!(next.len(), 2);
        assert_eq!(next.state(), SpecState::Configured);
        assert_ne!(spec.meta().id, next.meta().id);
    }

    #[test]
    fn test_second_from_is_rejected() {
        let err = alpine()
            .append(Operation::From {
                image: ImageRef::parse("busybox").unwrap(),
            })
            .unwrap_err();
        assert!(matches!(err, EngineError::InternalInvariant(_)));
    }

    #[test]
    fn test_env_value_last_write_wins() {
        let spec = alpine()
            .append(Operation::SetEnv {
                name: "K".to_string(),
                value: "v1".to_string(),
                expand: false,
            })
            .unwrap()
            .append(Operation::SetEnv {
                name: "K".to_string(),
                value: "v2".to_string(),
                expand: false,
            })
            .unwrap();
        assert_eq!(spec.env_value("K"), Some("v2"));
        assert_eq!(spec.env_value("MISSING"), None);
    }

    #[test]
    fn test_render_is_numbered() {
        let spec = alpine()
            .append(Operation::SetWorkdir {
                path: "/mnt".to_string(),
            })
            .unwrap();
        let rendered = spec.render();
        assert!(rendered.contains("  0  FROM alpine:latest"));
        assert!(rendered.contains("  1  WORKDIR /mnt"));
        assert_eq!(spec.workdir(), Some("/mnt"));
    }

    #[test]
    fn test_json_round_trip() {
        let spec = alpine()
            .append(Operation::AddTag {
                key: "team".to_string(),
                value: "infra".to_string(),
            })
            .unwrap();
        let json = spec.to_json().unwrap();
        let back: Spec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, spec);
    }
}
