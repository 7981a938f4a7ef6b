//! Prelude module for common imports

// Builder and registries
pub use crate::engine::errors::{EngineError, ErrorKind, Result, ResultExt};
pub use crate::engine::{
    CancelToken, ContainerBuilder, Distro, Engine, ExecOptions, GoCacheOptions, MountOptions,
    NetrcPassword, ParallelRunner, PoolResult, SecretHandle, Vcs,
};

// Spec model
pub use crate::image::{ImageRef, ImageResolver};
pub use crate::spec::{FileChunk, FileSource, Operation, Protocol, SharingMode, Spec, SpecState};

// Execution
pub use crate::driver::{
    DockerDriver, Driver, ExecResponse, Executor, OutputChunk, OutputStream, RunOptions,
    RunOutput, SimulatedDriver,
};

// Façades
pub use crate::facade::{
    Facade, FacadeOptions, GoTest, GoTestOptions, Terraform, TerraformCommand, Toolbox,
};

pub use crate::aws_tags::{ConfigLoader, TagCriteria};
pub use crate::parse::{EnvVar, parse_args, parse_env_str};
