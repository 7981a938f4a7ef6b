//! Environment variable list parsing
//!
//! Two dialects are accepted: a slice whose elements are either `K=V` or
//! `K=V,K=V`, and a single comma-joined string `K=V,K=V,K=V`.

use crate::engine::errors::{EngineError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static ENV_NAME_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]+$").unwrap());

/// An environment variable assignment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    /// Variable name
    pub name: String,
    /// Variable value
    pub value: String,
    /// Whether `$VAR` references in the value are interpolated at execution
    #[serde(default)]
    pub expand: bool,
}

impl EnvVar {
    /// Creates a non-expanding assignment
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            expand: false,
        }
    }

    /// Marks the value for interpolation
    #[must_use]
    pub fn expanded(mut self) -> Self {
        self.expand = true;
        self
    }
}

impl std::fmt::Display for EnvVar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

/// Checks a variable name against `^[A-Za-z0-9_]+$`
///
/// # Errors
///
/// Returns [`EngineError::MalformedEnv`] when the name is empty or contains
/// other characters.
pub fn validate_env_name(name: &str) -> Result<()> {
    if ENV_NAME_REGEX.is_match(name) {
        Ok(())
    } else {
        Err(EngineError::MalformedEnv {
            entry: name.to_string(),
            reason: "name must match ^[A-Za-z0-9_]+$".to_string(),
        })
    }
}

fn parse_pair(entry: &str) -> Result<EnvVar> {
    let Some((name, value)) = entry.split_once('=') else {
        return Err(EngineError::MalformedEnv {
            entry: entry.to_string(),
            reason: "expected KEY=VALUE".to_string(),
        });
    };
    let name = name.trim();
    validate_env_name(name).map_err(|_| EngineError::MalformedEnv {
        entry: entry.to_string(),
        reason: format!("invalid name '{name}'"),
    })?;
    Ok(EnvVar::new(name, value.trim()))
}

/// Parses a single `K=V,K=V` string.
///
/// Blank segments are skipped, so `"   "` and `"A=1,"` are accepted.
///
/// # Errors
///
/// Returns [`EngineError::MalformedEnv`] for the first segment without `=` or
/// with an invalid name.
pub fn parse_env_str(input: &str) -> Result<Vec<EnvVar>> {
    input
        .split(',')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(parse_pair)
        .collect()
}

/// Parses the slice dialect, each element holding one or more assignments
///
/// # Errors
///
/// Returns [`EngineError::MalformedEnv`] for the first malformed entry.
pub fn parse_env_slice<S: AsRef<str>>(entries: &[S]) -> Result<Vec<EnvVar>> {
    let mut vars = Vec::new();
    for entry in entries {
        vars.extend(parse_env_str(entry.as_ref())?);
    }
    Ok(vars)
}

/// Renders assignments back into the single-string dialect
#[must_use]
pub fn render_env(vars: &[EnvVar]) -> String {
    vars.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Collapses repeated names, keeping the last value at the first position
#[must_use]
pub fn effective_env(vars: &[EnvVar]) -> Vec<EnvVar> {
    let mut out: Vec<EnvVar> = Vec::with_capacity(vars.len());
    for var in vars {
        match out.iter_mut().find(|v| v.name == var.name) {
            Some(existing) => *existing = var.clone(),
            None => out.push(var.clone()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn test_parse_slice_mixed_elements() {
        let vars = parse_env_slice(&["HOST=localhost", "PORT=8080,USER=me"]).unwrap();
        assert_eq!(
            vars,
            vec![
                EnvVar::new("HOST", "localhost"),
                EnvVar::new("PORT", "8080"),
                EnvVar::new("USER", "me"),
            ]
        );
    }

    #[test]
    fn test_parse_string_trims_names() {
        let vars = parse_env_str(" A =1, B=two ").unwrap();
        assert_eq!(vars, vec![EnvVar::new("A", "1"), EnvVar::new("B", "two")]);
    }

    #[test]
    fn test_value_may_contain_equals() {
        let vars = parse_env_str("OPTS=a=b").unwrap();
        assert_eq!(vars[0].value, "a=b");
    }

    #[test]
    fn test_missing_equals_is_malformed() {
        let err = parse_env_str("A=1,NOPE").unwrap_err();
        assert!(matches!(err, EngineError::MalformedEnv { ref entry, .. } if entry == "NOPE"));
    }

    #[test]
    fn test_invalid_name_is_malformed() {
        assert!(parse_env_str("MY-VAR=1").is_err());
        assert!(parse_env_str("=1").is_err());
    }

    #[test]
    fn test_blank_input_yields_nothing() {
        assert!(parse_env_str("   ").unwrap().is_empty());
        assert!(parse_env_slice::<&str>(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_duplicates_retained_and_last_wins() {
        let vars = parse_env_str("K=1,J=x,K=2").unwrap();
        assert_eq!(vars.len(), 3);
        let effective = effective_env(&vars);
        assert_eq!(effective, vec![EnvVar::new("K", "2"), EnvVar::new("J", "x")]);
    }

    proptest! {
        #[test]
        fn prop_parse_render_parse_is_stable(
            pairs in proptest::collection::vec(("[A-Za-z_][A-Za-z0-9_]{0,8}", "[a-z0-9./:-]{0,12}"), 0..6)
        ) {
            let input = pairs
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(",");
            let first = parse_env_str(&input).unwrap();
            let second = parse_env_str(&render_env(&first)).unwrap();
            prop_assert_eq!(first, second);
        }
    }
}
