//! Error types for the container engine
//!
//! Every failure surfaced by the crate is an [`EngineError`]. Errors carry a
//! module tag, can be wrapped with additional context, and expose their cause
//! chain through [`std::error::Error::source`].

use crate::spec::SharingMode;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Module tag used when an error is raised by the engine itself.
pub const ENGINE_MODULE: &str = "engine";

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, EngineError>;

/// Semantic class of an [`EngineError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// User input failed validation
    InvalidConfig,
    /// Image URL is syntactically invalid
    InvalidImageUrl,
    /// An operation references a secret that was never defined
    UnknownSecret,
    /// Conflicting sharing modes for a named cache volume
    CacheVolumeConflict,
    /// The driver cannot be reached or could not complete a call
    DriverUnavailable,
    /// A container exec returned non-zero
    ExecFailed,
    /// A deadline elapsed
    Timeout,
    /// The run was cancelled
    Canceled,
    /// A façade reported a typed domain failure
    DomainError,
    /// An engine invariant was violated
    InternalInvariant,
}

impl ErrorKind {
    /// Process exit code associated with this kind of failure
    #[must_use]
    pub fn exit_code(self) -> u8 {
        match self {
            Self::DriverUnavailable | Self::ExecFailed => 2,
            Self::Timeout | Self::Canceled => 130,
            _ => 1,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InvalidConfig => "InvalidConfig",
            Self::InvalidImageUrl => "InvalidImageURL",
            Self::UnknownSecret => "UnknownSecret",
            Self::CacheVolumeConflict => "CacheVolumeConflict",
            Self::DriverUnavailable => "DriverUnavailable",
            Self::ExecFailed => "ExecFailed",
            Self::Timeout => "Timeout",
            Self::Canceled => "Canceled",
            Self::DomainError => "DomainError",
            Self::InternalInvariant => "InternalInvariant",
        };
        f.write_str(name)
    }
}

/// Errors produced by the engine, its drivers and the façades
#[derive(Error, Debug)]
pub enum EngineError {
    /// Generic validation failure
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// An environment variable entry could not be parsed
    #[error("malformed environment variable '{entry}': {reason}")]
    MalformedEnv {
        /// The offending entry, as given.
        entry: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A platform string is not `os/arch[/variant]`
    #[error("invalid platform '{0}': expected os/arch or os/arch/variant")]
    InvalidPlatform(String),

    /// Image reference failed validation
    #[error("invalid image URL '{url}': {reason}")]
    InvalidImageUrl {
        /// The composed or supplied reference.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Secret name not present in the registry
    #[error("unknown secret '{name}'")]
    UnknownSecret {
        /// Name that was looked up.
        name: String,
    },

    /// A secret with this name was already defined
    #[error("secret '{name}' is already defined")]
    DuplicateSecret {
        /// Name of the secret.
        name: String,
    },

    /// A secret resolved to an empty value
    #[error("secret '{name}' has an empty value")]
    EmptySecret {
        /// Name of the secret.
        name: String,
    },

    /// Cache volume mounted with a sharing mode different from the fixed one
    #[error("cache volume '{name}' is {existing}, cannot mount it as {requested}")]
    CacheVolumeConflict {
        /// Volume name.
        name: String,
        /// Sharing mode fixed by the first reference.
        existing: SharingMode,
        /// Sharing mode requested by the conflicting reference.
        requested: SharingMode,
    },

    /// Driver unreachable or failing
    #[error("driver unavailable: {0}")]
    DriverUnavailable(String),

    /// The driver does not implement a capability
    #[error("unsupported by driver: {0}")]
    Unsupported(String),

    /// A container exec exited non-zero
    #[error("operation #{op_index} exited with code {exit_code}: {output_tail}")]
    ExecFailed {
        /// Index of the failing operation in the spec.
        op_index: usize,
        /// Exit code reported by the driver.
        exit_code: i32,
        /// Last lines of the captured output.
        output_tail: String,
    },

    /// A deadline elapsed before the run finished
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The run was cancelled
    #[error("canceled")]
    Canceled,

    /// Façade-level failure
    #[error("{message}")]
    Domain {
        /// Module that raised the error.
        module: String,
        /// Human readable message.
        message: String,
    },

    /// Engine invariant violated
    #[error("internal invariant violated: {0}")]
    InternalInvariant(String),

    /// IO error while staging files or reading configuration
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML document could not be parsed
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A regular expression failed to compile
    #[error("invalid regular expression: {0}")]
    Regex(#[from] regex::Error),

    /// Context added on top of another error
    #[error("{message}")]
    Wrapped {
        /// Module that added the context.
        module: String,
        /// Context message.
        message: String,
        /// Underlying error.
        #[source]
        source: Box<EngineError>,
    },
}

impl EngineError {
    /// Shorthand for [`EngineError::InvalidConfig`] built from anything printable
    pub fn config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Shorthand for a façade failure tagged with `module`
    pub fn domain(module: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Domain {
            module: module.into(),
            message: message.into(),
        }
    }

    /// Wraps this error with a context message.
    ///
    /// Cancellation is returned unchanged so callers can still match on it.
    #[must_use]
    pub fn wrap(self, module: impl Into<String>, message: impl Into<String>) -> Self {
        if matches!(self, Self::Canceled) {
            return self;
        }
        Self::Wrapped {
            module: module.into(),
            message: message.into(),
            source: Box::new(self),
        }
    }

    /// Semantic class, looking through any wrappers
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidConfig(_)
            | Self::MalformedEnv { .. }
            | Self::InvalidPlatform(_)
            | Self::DuplicateSecret { .. }
            | Self::EmptySecret { .. }
            | Self::Io(_)
            | Self::Yaml(_)
            | Self::Regex(_) => ErrorKind::InvalidConfig,
            Self::InvalidImageUrl { .. } => ErrorKind::InvalidImageUrl,
            Self::UnknownSecret { .. } => ErrorKind::UnknownSecret,
            Self::CacheVolumeConflict { .. } => ErrorKind::CacheVolumeConflict,
            Self::DriverUnavailable(_) | Self::Unsupported(_) => ErrorKind::DriverUnavailable,
            Self::ExecFailed { .. } => ErrorKind::ExecFailed,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Canceled => ErrorKind::Canceled,
            Self::Domain { .. } => ErrorKind::DomainError,
            Self::InternalInvariant(_) => ErrorKind::InternalInvariant,
            Self::Wrapped { source, .. } => source.kind(),
        }
    }

    /// Module tag of the outermost layer
    #[must_use]
    pub fn module(&self) -> &str {
        match self {
            Self::Wrapped { module, .. } | Self::Domain { module, .. } => module,
            _ => ENGINE_MODULE,
        }
    }

    /// Innermost error in the chain
    #[must_use]
    pub fn root_cause(&self) -> &EngineError {
        match self {
            Self::Wrapped { source, .. } => source.root_cause(),
            _ => self,
        }
    }

    /// Exit code for the binary
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        self.kind().exit_code()
    }

    /// Returns true when the error is (or wraps) a cancellation
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.kind() == ErrorKind::Canceled
    }

    /// Iterates over this error and every cause below it
    pub fn chain(&self) -> impl Iterator<Item = &(dyn std::error::Error + 'static)> {
        let mut next: Option<&(dyn std::error::Error + 'static)> = Some(self);
        std::iter::from_fn(move || {
            let current = next?;
            next = current.source();
            Some(current)
        })
    }

    /// User-facing rendering.
    ///
    /// The summary is a single line prefixed with the module tag. With
    /// `verbose` every cause follows on its own line.
    #[must_use]
    pub fn render(&self, verbose: bool) -> String {
        let messages: Vec<String> = self.chain().map(ToString::to_string).collect();
        let mut out = format!("[{}] {}", self.module(), messages.join(": "));
        if verbose {
            for (depth, cause) in messages.iter().enumerate().skip(1) {
                out.push_str(&format!("\n  {depth}: {cause}"));
            }
            out.push_str(&format!("\n  kind: {}", self.kind()));
        }
        out
    }
}

/// Adds module-tagged context to fallible results
pub trait ResultExt<T> {
    /// Wraps the error with `message` under `module`
    #[allow(clippy::missing_errors_doc)]
    fn context(self, module: &str, message: impl Into<String>) -> Result<T>;

    /// Like [`ResultExt::context`], building the message lazily
    #[allow(clippy::missing_errors_doc)]
    fn with_context<F, M>(self, module: &str, message: F) -> Result<T>
    where
        F: FnOnce() -> M,
        M: Into<String>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<EngineError>,
{
    fn context(self, module: &str, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().wrap(module, message))
    }

    fn with_context<F, M>(self, module: &str, message: F) -> Result<T>
    where
        F: FnOnce() -> M,
        M: Into<String>,
    {
        self.map_err(|e| e.into().wrap(module, message()))
    }
}

/// Joins several errors into one, keeping the first as the cause
#[must_use]
pub fn join_errors(module: &str, errors: Vec<EngineError>) -> Option<EngineError> {
    let mut iter = errors.into_iter();
    let first = iter.next()?;
    let rest: Vec<String> = iter.map(|e| e.to_string()).collect();
    if rest.is_empty() {
        return Some(first);
    }
    Some(first.wrap(module, format!("{} more error(s): {}", rest.len(), rest.join("; "))))
}
