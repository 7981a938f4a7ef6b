//! Loading, validation and queries over an [`InspectorConfig`]

use super::config::{
    DEFAULT_BATCH_SIZE, EMAIL_FREQUENCIES, InspectorConfig, NotificationConfig, TagCriteria,
    TagValidation,
};
use crate::engine::errors::{EngineError, Result, ResultExt};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;

const AWS_TAGS_MODULE: &str = "aws_tags";

static EMAIL_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}$").unwrap());

/// A validated configuration with its regular expressions compiled
#[derive(Debug, Clone)]
struct Loaded {
    config: InspectorConfig,
    exclusions: BTreeMap<String, Vec<(Regex, String)>>,
    pattern_rules: BTreeMap<String, Regex>,
}

/// Loads an inspector configuration and answers questions about it.
///
/// Before a successful load every query answers as if nothing were
/// configured.
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    loaded: Option<Loaded>,
}

impl ConfigLoader {
    /// An empty loader
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads and loads a YAML file
    ///
    /// # Errors
    ///
    /// IO, YAML or validation failures, tagged with `aws_tags`.
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<&InspectorConfig> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).with_context(AWS_TAGS_MODULE, || {
            format!("failed to read config file {}", path.display())
        })?;
        self.load_str(&text)
    }

    /// Loads a YAML document
    ///
    /// # Errors
    ///
    /// [`EngineError::Yaml`] for a malformed document,
    /// [`EngineError::InvalidConfig`] when validation fails and
    /// [`EngineError::Regex`] for a pattern that does not compile.
    pub fn load_str(&mut self, text: &str) -> Result<&InspectorConfig> {
        let mut config: InspectorConfig = serde_yaml::from_str(text)
            .context(AWS_TAGS_MODULE, "failed to parse configuration")?;
        validate(&mut config).context(AWS_TAGS_MODULE, "invalid configuration")?;
        let loaded = compile(config).context(AWS_TAGS_MODULE, "failed to compile patterns")?;

        tracing::info!(
            version = %loaded.config.version,
            resources = loaded.config.resources.len(),
            "AWS tag inspector configuration loaded"
        );
        Ok(&self.loaded.insert(loaded).config)
    }

    /// The loaded configuration
    #[must_use]
    pub fn config(&self) -> Option<&InspectorConfig> {
        self.loaded.as_ref().map(|l| &l.config)
    }

    /// Global criteria merged with the enabled criteria of `resource_type`
    #[must_use]
    pub fn tag_criteria(&self, resource_type: &str) -> TagCriteria {
        let Some(loaded) = &self.loaded else {
            return TagCriteria::default();
        };
        let global = &loaded.config.global;
        let mut criteria = TagCriteria {
            minimum_required_tags: usize::try_from(global.minimum_required_tags).unwrap_or(0),
            required_tags: global.required_tags.clone(),
            forbidden_tags: global.forbidden_tags.clone(),
            specific_tags: global.specific_tags.clone(),
            compliance_level: global.compliance_level.clone(),
        };

        if let Some(resource) = loaded
            .config
            .resources
            .get(resource_type)
            .filter(|r| r.enabled)
        {
            criteria.required_tags.extend(resource.required_tags.iter().cloned());
            criteria.forbidden_tags.extend(resource.forbidden_tags.iter().cloned());
            criteria.specific_tags.extend(
                resource
                    .specific_tags
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone())),
            );
            if resource.minimum_required_tags > 0 {
                criteria.minimum_required_tags =
                    usize::try_from(resource.minimum_required_tags).unwrap_or(0);
            }
            if resource.compliance_level.is_some() {
                criteria.compliance_level.clone_from(&resource.compliance_level);
            }
        }
        criteria
    }

    /// Reason of the first exclusion pattern of `resource_type` matching
    /// `resource_id`
    #[must_use]
    pub fn exclusion(&self, resource_type: &str, resource_id: &str) -> Option<&str> {
        let loaded = self.loaded.as_ref()?;
        let reason = loaded
            .exclusions
            .get(resource_type)?
            .iter()
            .find(|(pattern, _)| pattern.is_match(resource_id))
            .map(|(_, reason)| reason.as_str());
        if let Some(reason) = reason {
            tracing::debug!(resource_type, resource_id, reason, "Resource excluded");
        }
        reason
    }

    /// `(true, reason)` when `resource_id` is excluded, `(false, "")`
    /// otherwise
    #[must_use]
    pub fn is_resource_excluded(&self, resource_type: &str, resource_id: &str) -> (bool, String) {
        match self.exclusion(resource_type, resource_id) {
            Some(reason) => (true, reason.to_string()),
            None => (false, String::new()),
        }
    }

    /// Effective batch size of `resource_type`
    #[must_use]
    pub fn batch_size(&self, resource_type: &str) -> i64 {
        let Some(loaded) = &self.loaded else {
            return DEFAULT_BATCH_SIZE;
        };
        loaded
            .config
            .resources
            .get(resource_type)
            .and_then(|r| r.batch_size)
            .unwrap_or(loaded.config.global.batch_size)
    }

    /// Checks `value` against the pattern rule and allowed values of `key`
    ///
    /// # Errors
    ///
    /// [`EngineError::Domain`] naming the rule `value` breaks.
    pub fn validate_tag_value(&self, key: &str, value: &str) -> Result<()> {
        let Some(loaded) = &self.loaded else {
            return Ok(());
        };
        if let Some(pattern) = loaded.pattern_rules.get(key) {
            if !pattern.is_match(value) {
                return Err(EngineError::domain(
                    AWS_TAGS_MODULE,
                    format!(
                        "value '{value}' of tag {key} does not match the pattern {}",
                        pattern.as_str()
                    ),
                ));
            }
        }
        if let Some(allowed) = loaded.config.tag_validation.allowed_values.get(key) {
            if !allowed.iter().any(|a| a == value) {
                return Err(EngineError::domain(
                    AWS_TAGS_MODULE,
                    format!(
                        "value '{value}' of tag {key} is not one of: {}",
                        allowed.join(", ")
                    ),
                ));
            }
        }
        Ok(())
    }

    /// A compliance level by name
    #[must_use]
    pub fn compliance_level(&self, name: &str) -> Option<&super::ComplianceLevel> {
        self.config()?.compliance_levels.get(name)
    }
}

fn validate(config: &mut InspectorConfig) -> Result<()> {
    if config.version.trim().is_empty() {
        return Err(EngineError::config("config version is required"));
    }

    if config.global.batch_size <= 0 {
        config.global.batch_size = DEFAULT_BATCH_SIZE;
    }
    let global = &config.global;
    validate_criteria(
        global.minimum_required_tags,
        &global.required_tags,
        &global.forbidden_tags,
        &global.specific_tags,
    )
    .context(AWS_TAGS_MODULE, "global tag criteria")?;

    for (resource_type, resource) in &config.resources {
        if resource.batch_size.is_some_and(|b| b <= 0) {
            return Err(EngineError::config(format!(
                "invalid batch size for resource type {resource_type}"
            )));
        }
        validate_criteria(
            resource.minimum_required_tags,
            &resource.required_tags,
            &resource.forbidden_tags,
            &resource.specific_tags,
        )
        .with_context(AWS_TAGS_MODULE, || {
            format!("tag criteria of resource type {resource_type}")
        })?;
    }

    for (name, level) in &config.compliance_levels {
        if name.trim().is_empty() {
            return Err(EngineError::config("compliance level name cannot be empty"));
        }
        if level.required_tags.iter().any(|t| t.trim().is_empty()) {
            return Err(EngineError::config(format!(
                "empty required tag in compliance level '{name}'"
            )));
        }
        if level
            .specific_tags
            .iter()
            .any(|(k, v)| k.trim().is_empty() || v.trim().is_empty())
        {
            return Err(EngineError::config(format!(
                "empty key or value in specific tags of compliance level '{name}'"
            )));
        }
    }

    validate_tag_validation(&config.tag_validation)?;
    validate_notifications(&config.notifications)
}

fn validate_criteria(
    minimum: i64,
    required: &[String],
    forbidden: &[String],
    specific: &BTreeMap<String, String>,
) -> Result<()> {
    if minimum < 0 {
        return Err(EngineError::config("minimum required tags cannot be negative"));
    }
    if usize::try_from(minimum).unwrap_or(usize::MAX) > required.len() {
        return Err(EngineError::config(format!(
            "minimum required tags ({minimum}) cannot be greater than the number of required tags ({})",
            required.len()
        )));
    }
    if required.iter().any(|t| t.trim().is_empty()) {
        return Err(EngineError::config("empty required tag found"));
    }
    if forbidden.iter().any(|t| t.trim().is_empty()) {
        return Err(EngineError::config("empty forbidden tag found"));
    }
    for (key, value) in specific {
        if key.trim().is_empty() {
            return Err(EngineError::config("empty specific tag key found"));
        }
        if value.trim().is_empty() {
            return Err(EngineError::config(format!(
                "empty specific tag value found for key: {key}"
            )));
        }
    }
    Ok(())
}

fn validate_tag_validation(rules: &TagValidation) -> Result<()> {
    for (tag, values) in &rules.allowed_values {
        if values.is_empty() {
            return Err(EngineError::config(format!(
                "no allowed values specified for tag {tag}"
            )));
        }
        if values.iter().any(String::is_empty) {
            return Err(EngineError::config(format!(
                "empty value found in allowed values for tag {tag}"
            )));
        }
    }
    for (tag, pattern) in &rules.pattern_rules {
        if pattern.is_empty() {
            return Err(EngineError::config(format!("empty pattern rule for tag {tag}")));
        }
    }
    Ok(())
}

fn validate_notifications(notifications: &NotificationConfig) -> Result<()> {
    let slack = &notifications.slack;
    if slack.enabled {
        if slack.channels.is_empty() {
            return Err(EngineError::config(
                "Slack notifications enabled but no channels specified",
            ));
        }
        if slack.channels.values().any(|c| c.trim().is_empty()) {
            return Err(EngineError::config("empty Slack channel name found"));
        }
    }

    let email = &notifications.email;
    if email.enabled {
        if email.recipients.is_empty() {
            return Err(EngineError::config(
                "email notifications enabled but no recipients specified",
            ));
        }
        if let Some(bad) = email.recipients.iter().find(|r| !EMAIL_REGEX.is_match(r)) {
            return Err(EngineError::config(format!("invalid email format: {bad}")));
        }
        if let Some(frequency) = email.frequency.as_deref().filter(|f| !f.is_empty()) {
            if !EMAIL_FREQUENCIES.contains(&frequency) {
                return Err(EngineError::config(format!(
                    "invalid email notification frequency: {frequency}"
                )));
            }
        }
    }
    Ok(())
}

fn compile(config: InspectorConfig) -> Result<Loaded> {
    let mut exclusions = BTreeMap::new();
    for (resource_type, resource) in &config.resources {
        let mut compiled = Vec::with_capacity(resource.excluded_resources.len());
        for excluded in &resource.excluded_resources {
            let pattern = Regex::new(&excluded.pattern).with_context(AWS_TAGS_MODULE, || {
                format!(
                    "invalid exclusion pattern {} for resource type {resource_type}",
                    excluded.pattern
                )
            })?;
            compiled.push((pattern, excluded.reason.clone()));
        }
        // disabled resources are validated but never exclude
        if resource.enabled {
            exclusions.insert(resource_type.clone(), compiled);
        }
    }

    let mut pattern_rules = BTreeMap::new();
    for (tag, pattern) in &config.tag_validation.pattern_rules {
        let compiled = Regex::new(pattern)
            .with_context(AWS_TAGS_MODULE, || format!("invalid pattern for tag {tag}"))?;
        pattern_rules.insert(tag.clone(), compiled);
    }

    Ok(Loaded {
        config,
        exclusions,
        pattern_rules,
    })
}
