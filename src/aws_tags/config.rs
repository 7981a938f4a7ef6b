//! Configuration document of the AWS tag inspector

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Batch size used when the global one is missing or not positive
pub const DEFAULT_BATCH_SIZE: i64 = 10;

/// Accepted email notification frequencies
pub const EMAIL_FREQUENCIES: [&str; 3] = ["daily", "hourly", "weekly"];

/// Root of the YAML document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InspectorConfig {
    /// Schema version, required
    pub version: String,
    /// Rules applied to every resource type
    pub global: GlobalConfig,
    /// Per resource type rules, keyed by type (`ec2`, `s3`, ...)
    pub resources: BTreeMap<String, ResourceConfig>,
    /// Named sets of tag requirements
    pub compliance_levels: BTreeMap<String, ComplianceLevel>,
    /// Value rules for individual tags
    pub tag_validation: TagValidation,
    /// Where reports go
    pub notifications: NotificationConfig,
}

/// Global rules
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Resources fetched per call
    pub batch_size: i64,
    /// Tags every resource must carry
    pub required_tags: Vec<String>,
    /// Tags no resource may carry
    pub forbidden_tags: Vec<String>,
    /// Exact key/value pairs
    pub specific_tags: BTreeMap<String, String>,
    /// How many of the required tags must be present
    pub minimum_required_tags: i64,
    /// Compliance level applied to every resource
    pub compliance_level: Option<String>,
}

/// Rules for one resource type
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    /// A disabled resource contributes no criteria and excludes nothing
    pub enabled: bool,
    /// Overrides the global batch size, must be positive
    pub batch_size: Option<i64>,
    /// Appended to the global required tags
    pub required_tags: Vec<String>,
    /// Appended to the global forbidden tags
    pub forbidden_tags: Vec<String>,
    /// Overrides global values for the same keys
    pub specific_tags: BTreeMap<String, String>,
    /// Overrides the global minimum when positive
    pub minimum_required_tags: i64,
    /// Overrides the global compliance level
    pub compliance_level: Option<String>,
    /// Resource IDs skipped by the inspector
    pub excluded_resources: Vec<ExcludedResource>,
}

/// An exclusion rule
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExcludedResource {
    /// Regular expression matched against resource IDs
    pub pattern: String,
    /// Reported when the pattern matches
    pub reason: String,
}

/// Tag requirements of a compliance level
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComplianceLevel {
    /// Required tag keys
    pub required_tags: Vec<String>,
    /// Exact key/value pairs
    pub specific_tags: BTreeMap<String, String>,
}

/// Value rules
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TagValidation {
    /// Closed value sets per tag
    pub allowed_values: BTreeMap<String, Vec<String>>,
    /// Regular expressions per tag
    pub pattern_rules: BTreeMap<String, String>,
}

/// Notification channels
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Slack delivery
    pub slack: SlackConfig,
    /// Email delivery
    pub email: EmailConfig,
    /// Report frequency for every channel
    pub frequency: Option<String>,
}

/// Slack delivery
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlackConfig {
    /// Turns delivery on
    pub enabled: bool,
    /// Channel per purpose
    pub channels: BTreeMap<String, String>,
}

/// Email delivery
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    /// Turns delivery on
    pub enabled: bool,
    /// Lowercase email addresses
    pub recipients: Vec<String>,
    /// One of [`EMAIL_FREQUENCIES`]
    pub frequency: Option<String>,
}

/// Merged requirements for one resource type
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagCriteria {
    /// How many of the required tags must be present
    pub minimum_required_tags: usize,
    /// Global then resource required tags, duplicates kept
    pub required_tags: Vec<String>,
    /// Global then resource forbidden tags
    pub forbidden_tags: Vec<String>,
    /// Exact key/value pairs, resource values winning
    pub specific_tags: BTreeMap<String, String>,
    /// Compliance level to check against
    pub compliance_level: Option<String>,
}
