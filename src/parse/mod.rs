//! String dialect parsers
//!
//! One parser per dialect: env-var lists, argument strings, platform triples,
//! version tags and variable interpolation.

pub mod args;
pub mod env;
pub mod expand;
pub mod platform;
pub mod version;

pub use args::{join_args, parse_args};
pub use env::{
    EnvVar, effective_env, parse_env_slice, parse_env_str, render_env, validate_env_name,
};
pub use expand::expand;
pub use platform::{Platform, parse_platform_or_default};
pub use version::{LATEST, VersionTag};
