//! # ctrforge - container build pipelines in Rust
//!
//! ctrforge composes immutable container specifications (base image, env
//! vars, mounts, cache volumes, secrets, execs) through a fluent builder and
//! executes them against a pluggable container driver.
//!
//! ## Quick Start
//!
//! ```no_run
//! use ctrforge::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn demo() -> ctrforge::engine::Result<()> {
//! let engine = Engine::new();
//! let token = engine.define_secret("gh-token", "s3cr3t")?;
//! let spec = engine
//!     .container("demo")
//!     .from_url("alpine:3.20")?
//!     .with_secret_variable("GITHUB_TOKEN", &token)?
//!     .with_exec(["uname", "-a"])?
//!     .spec()?;
//!
//! let executor = Executor::new(Arc::new(SimulatedDriver::new()), engine.clone());
//! let output = executor.run(&spec, &RunOptions::new()).await?;
//! println!("{}", output.stdout);
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **Immutable specs**: every builder call returns a new value, published
//!   specs never change
//! - **Secrets by reference**: values live in a registry and are resolved
//!   only at execution time; rendering shows `${secret:<name>}`
//! - **Cache volumes**: shared, private or locked sharing per named volume
//! - **Drivers**: the `docker` CLI or an in-memory simulated driver
//! - **Façades**: toolbox, terraform and go test modules
//! - **AWS tag inspector configuration** loading and queries

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod aws_tags;
pub mod driver;
pub mod engine;
pub mod facade;
pub mod image;
pub mod infrastructure;
pub mod parse;
pub mod spec;

// Prelude module for common imports
pub mod prelude;

// Re-export commonly used types
pub use driver::{Driver, DockerDriver, Executor, RunOptions, RunOutput, SimulatedDriver};
pub use engine::{
    CancelToken, ContainerBuilder, Engine, EngineError, ErrorKind, ParallelRunner, SecretHandle,
};
pub use image::{ImageRef, ImageResolver};
pub use infrastructure::{Config, init_logging};
pub use spec::{Operation, SharingMode, Spec, SpecState};

/// Version of the ctrforge crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
