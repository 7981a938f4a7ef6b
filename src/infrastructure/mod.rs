//! Infrastructure layer
//!
//! Application configuration and logging setup.

mod config;
mod logging;

pub use config::{Config, DriverKind, ENV_DOCKER, ENV_DRIVER, ENV_LOG_LEVEL};
pub use logging::init_logging;
