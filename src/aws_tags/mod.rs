//! AWS tag inspector configuration
//!
//! The inspector itself runs inside a container; this module owns the YAML
//! document that drives it. [`ConfigLoader`] validates the document, compiles
//! its regular expressions once and answers the merge and exclusion queries
//! the inspector makes per resource.

pub mod config;
pub mod loader;


pub use config::{
    ComplianceLevel, EmailConfig, ExcludedResource, GlobalConfig, InspectorConfig,
    NotificationConfig, ResourceConfig, SlackConfig, TagCriteria, TagValidation,
};
pub use loader::ConfigLoader;
