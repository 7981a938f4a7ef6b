//! Named secret registry
//!
//! Values live only here. Specs, logs and errors carry the name.

use crate::engine::errors::{EngineError, Result};
use crate::parse::validate_env_name;
use ahash::AHashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// A secret value that never prints itself
#[derive(Clone, PartialEq, Eq)]
pub struct SecretValue(Arc<str>);

impl SecretValue {
    /// Wraps a plaintext value
    pub fn new(value: impl Into<String>) -> Self {
        Self(Arc::from(value.into()))
    }

    /// Plaintext, for handing to a driver
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Returns true when the value is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretValue(***)")
    }
}

/// Handle returned by [`SecretRegistry::define`], referencing a secret by name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SecretHandle {
    name: String,
}

impl SecretHandle {
    /// Registered name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for SecretHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "secret:{}", self.name)
    }
}

/// Engine-scoped map from secret name to value
#[derive(Debug, Default)]
pub struct SecretRegistry {
    secrets: RwLock<AHashMap<String, SecretValue>>,
}

impl SecretRegistry {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a secret.
    ///
    /// # Errors
    ///
    /// - [`EngineError::InvalidConfig`] when the name is not `^[A-Za-z0-9_]+$`
    ///   (dashes and dots are also accepted).
    /// - [`EngineError::EmptySecret`] when the value is empty.
    /// - [`EngineError::DuplicateSecret`] when the name is taken.
    pub fn define(&self, name: &str, value: impl Into<String>) -> Result<SecretHandle> {
        let name = name.trim();
        let plain: String = name.chars().filter(|c| *c != '-' && *c != '.').collect();
        if validate_env_name(&plain).is_err() {
            return Err(EngineError::config(format!("invalid secret name '{name}'")));
        }

        let value = SecretValue::new(value);
        if value.is_empty() {
            return Err(EngineError::EmptySecret {
                name: name.to_string(),
            });
        }

        let mut secrets = self.secrets.write();
        if secrets.contains_key(name) {
            return Err(EngineError::DuplicateSecret {
                name: name.to_string(),
            });
        }
        secrets.insert(name.to_string(), value);
        tracing::debug!(secret = %name, "Secret registered");

        Ok(SecretHandle {
            name: name.to_string(),
        })
    }

    /// Handle for an already registered name
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownSecret`] if the name was never defined.
    pub fn handle(&self, name: &str) -> Result<SecretHandle> {
        if self.secrets.read().contains_key(name) {
            Ok(SecretHandle {
                name: name.to_string(),
            })
        } else {
            Err(EngineError::UnknownSecret {
                name: name.to_string(),
            })
        }
    }

    /// Returns true when `name` is registered
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.secrets.read().contains_key(name)
    }

    /// Resolves the value for execution.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownSecret`] or [`EngineError::EmptySecret`].
    pub fn resolve(&self, name: &str) -> Result<SecretValue> {
        let value = self
            .secrets
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownSecret {
                name: name.to_string(),
            })?;
        if value.is_empty() {
            return Err(EngineError::EmptySecret {
                name: name.to_string(),
            });
        }
        Ok(value)
    }

    /// Registered names, sorted
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.secrets.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Replaces every registered value found in `text` with `***`
    #[must_use]
    pub fn scrub(&self, text: &str) -> String {
        let mut out = text.to_string();
        for value in self.secrets.read().values() {
            if !value.is_empty() {
                out = out.replace(value.expose(), "***");
            }
        }
        out
    }
}
