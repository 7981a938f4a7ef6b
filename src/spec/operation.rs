//! Container-shaping operations
//!
//! Each variant is one step applied to a container, in order. Secrets and
//! cache volumes are referenced by name only.

use super::Spec;
use crate::image::ImageRef;
use crate::parse::join_args;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Concurrent access policy of a cache volume
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SharingMode {
    /// Many concurrent readers and writers
    #[default]
    Shared,
    /// Exclusive to one run at a time
    Private,
    /// Serialised per exec
    Locked,
}

impl fmt::Display for SharingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SharingMode::Shared => write!(f, "shared"),
            SharingMode::Private => write!(f, "private"),
            SharingMode::Locked => write!(f, "locked"),
        }
    }
}

/// Network protocol of an exposed port
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// TCP
    #[default]
    Tcp,
    /// UDP
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

/// Where a mounted file comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileSource {
    /// A file on the host
    Host(PathBuf),
    /// A file fetched over HTTP(S)
    Url(String),
}

impl fmt::Display for FileSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileSource::Host(path) => write!(f, "{}", path.display()),
            FileSource::Url(url) => f.write_str(url),
        }
    }
}

/// Piece of a generated file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileChunk {
    /// Literal text
    Text(String),
    /// Value of a registered secret, resolved at execution
    Secret(String),
}

impl FileChunk {
    /// Literal chunk
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    /// Secret reference chunk
    pub fn secret(name: impl Into<String>) -> Self {
        Self::Secret(name.into())
    }
}

/// Renders contents with secrets replaced by `${secret:<name>}`
#[must_use]
pub fn redacted_contents(contents: &[FileChunk]) -> String {
    contents
        .iter()
        .map(|chunk| match chunk {
            FileChunk::Text(text) => text.clone(),
            FileChunk::Secret(name) => format!("${{secret:{name}}}"),
        })
        .collect()
}

/// A single container-shaping step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    /// Select the base image
    From {
        /// Resolved reference
        image: ImageRef,
    },
    /// Set an environment variable
    SetEnv {
        /// Variable name
        name: String,
        /// Variable value
        value: String,
        /// Interpolate `$VAR` references at execution
        expand: bool,
    },
    /// Expose a secret as an environment variable
    BindSecret {
        /// Variable name inside the container
        name: String,
        /// Registered secret name
        secret: String,
    },
    /// Mount a host directory
    MountDir {
        /// Directory on the host
        host_dir: PathBuf,
        /// Absolute path inside the container
        mount_path: String,
        /// Owner applied to the mount (`user[:group]`)
        owner: Option<String>,
        /// Octal permission mode applied to the mount
        mode: Option<String>,
    },
    /// Mount a single file
    MountFile {
        /// Host path or URL
        source: FileSource,
        /// Absolute path inside the container
        mount_path: String,
        /// Owner applied to the file
        owner: Option<String>,
    },
    /// Attach a named cache volume
    MountCacheVolume {
        /// Volume name
        volume: String,
        /// Absolute path inside the container
        mount_path: String,
        /// Sharing mode fixed for the volume
        sharing: SharingMode,
        /// Host directory used to seed the volume
        source_dir: Option<PathBuf>,
    },
    /// Write a file whose contents may include secrets
    NewFile {
        /// Absolute path inside the container
        path: String,
        /// Literal and secret chunks
        contents: Vec<FileChunk>,
        /// Octal permission mode
        permissions: Option<String>,
    },
    /// Change the working directory
    SetWorkdir {
        /// Absolute path
        path: String,
    },
    /// Execute a command
    Exec {
        /// Command and arguments
        argv: Vec<String>,
        /// Grant root capabilities
        privileged: bool,
        /// Allow nested engine access
        experimental_nesting: bool,
    },
    /// Execute shell text, bypassing the entrypoint
    ShellExec {
        /// Script passed to `sh -c`
        script: String,
    },
    /// Replace or clear the entrypoint
    SetEntrypoint {
        /// New entrypoint, `None` clears it
        argv: Option<Vec<String>>,
    },
    /// Declare an exposed port
    ExposePort {
        /// Port number
        port: u16,
        /// Protocol
        protocol: Protocol,
    },
    /// Run subsequent operations as `user`
    SetUser {
        /// User name or uid
        user: String,
    },
    /// Change ownership of paths
    Chown {
        /// Owner
        user: String,
        /// Optional group
        group: Option<String>,
        /// Affected paths
        paths: Vec<String>,
        /// Escalate to root for the change, then return to `user`
        as_root: bool,
    },
    /// Change permissions of paths
    Chmod {
        /// Octal mode
        mode: String,
        /// Affected paths
        paths: Vec<String>,
        /// Escalate to root for the change
        as_root: bool,
        /// User to return to after escalation
        user: Option<String>,
    },
    /// Attach a metadata label
    AddTag {
        /// Label key
        key: String,
        /// Label value
        value: String,
    },
    /// Bind another spec as a network service under `alias`
    BindService {
        /// Hostname the service is reachable at
        alias: String,
        /// Spec of the service container
        service: Box<Spec>,
    },
}

impl Operation {
    /// Short name of the variant
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Operation::From { .. } => "From",
            Operation::SetEnv { .. } => "SetEnv",
            Operation::BindSecret { .. } => "BindSecret",
            Operation::MountDir { .. } => "MountDir",
            Operation::MountFile { .. } => "MountFile",
            Operation::MountCacheVolume { .. } => "MountCacheVolume",
            Operation::NewFile { .. } => "NewFile",
            Operation::SetWorkdir { .. } => "SetWorkdir",
            Operation::Exec { .. } => "Exec",
            Operation::ShellExec { .. } => "ShellExec",
            Operation::SetEntrypoint { .. } => "SetEntrypoint",
            Operation::ExposePort { .. } => "ExposePort",
            Operation::SetUser { .. } => "SetUser",
            Operation::Chown { .. } => "Chown",
            Operation::Chmod { .. } => "Chmod",
            Operation::AddTag { .. } => "AddTag",
            Operation::BindService { .. } => "BindService",
        }
    }

    /// Returns true for operations that run a process in the container
    #[must_use]
    pub fn is_exec(&self) -> bool {
        matches!(
            self,
            Operation::Exec { .. }
                | Operation::ShellExec { .. }
                | Operation::Chown { .. }
                | Operation::Chmod { .. }
        )
    }

    /// Secret names referenced by this operation
    #[must_use]
    pub fn secret_refs(&self) -> Vec<&str> {
        match self {
            Operation::BindSecret { secret, .. } => vec![secret.as_str()],
            Operation::NewFile { contents, .. } => contents
                .iter()
                .filter_map(|chunk| match chunk {
                    FileChunk::Secret(name) => Some(name.as_str()),
                    FileChunk::Text(_) => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

fn owner_suffix(owner: Option<&String>) -> String {
    owner.map(|o| format!(" owner={o}")).unwrap_or_default()
}

/// One-line, secret-free rendering used by `Spec::render`
impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::From { image } => write!(f, "FROM {image}"),
            Operation::SetEnv { name, value, expand } => {
                write!(f, "ENV {name}={value}")?;
                if *expand {
                    write!(f, " (expand)")?;
                }
                Ok(())
            }
            Operation::BindSecret { name, secret } => {
                write!(f, "SECRET {name}=${{secret:{secret}}}")
            }
            Operation::MountDir {
                host_dir,
                mount_path,
                owner,
                mode,
            } => {
                write!(
                    f,
                    "MOUNT DIR {} -> {mount_path}{}",
                    host_dir.display(),
                    owner_suffix(owner.as_ref())
                )?;
                if let Some(mode) = mode {
                    write!(f, " mode={mode}")?;
                }
                Ok(())
            }
            Operation::MountFile {
                source,
                mount_path,
                owner,
            } => write!(
                f,
                "MOUNT FILE {source} -> {mount_path}{}",
                owner_suffix(owner.as_ref())
            ),
            Operation::MountCacheVolume {
                volume,
                mount_path,
                sharing,
                source_dir,
            } => {
                write!(f, "CACHE {volume} -> {mount_path} ({sharing})")?;
                if let Some(dir) = source_dir {
                    write!(f, " from {}", dir.display())?;
                }
                Ok(())
            }
            Operation::NewFile {
                path,
                contents,
                permissions,
            } => {
                write!(f, "FILE {path} {:?}", redacted_contents(contents))?;
                if let Some(mode) = permissions {
                    write!(f, " mode={mode}")?;
                }
                Ok(())
            }
            Operation::SetWorkdir { path } => write!(f, "WORKDIR {path}"),
            Operation::Exec {
                argv,
                privileged,
                experimental_nesting,
            } => {
                write!(f, "EXEC {}", join_args(argv))?;
                if *privileged {
                    write!(f, " (privileged)")?;
                }
                if *experimental_nesting {
                    write!(f, " (nesting)")?;
                }
                Ok(())
            }
            Operation::ShellExec { script } => write!(f, "SHELL {script}"),
            Operation::SetEntrypoint { argv: Some(argv) } => {
                write!(f, "ENTRYPOINT {}", join_args(argv))
            }
            Operation::SetEntrypoint { argv: None } => write!(f, "ENTRYPOINT <none>"),
            Operation::ExposePort { port, protocol } => write!(f, "EXPOSE {port}/{protocol}"),
            Operation::SetUser { user } => write!(f, "USER {user}"),
            Operation::Chown {
                user,
                group,
                paths,
                as_root,
            } => {
                let owner = group
                    .as_ref()
                    .map_or_else(|| user.clone(), |g| format!("{user}:{g}"));
                write!(f, "CHOWN {owner} {}", paths.join(" "))?;
                if *as_root {
                    write!(f, " (as root)")?;
                }
                Ok(())
            }
            Operation::Chmod {
                mode,
                paths,
                as_root,
                ..
            } => {
                write!(f, "CHMOD {mode} {}", paths.join(" "))?;
                if *as_root {
                    write!(f, " (as root)")?;
                }
                Ok(())
            }
            Operation::AddTag { key, value } => write!(f, "LABEL {key}={value}"),
            Operation::BindService { alias, service } => {
                write!(f, "SERVICE {alias} <- {}", service.base())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sharing_mode_serialize() {
        let json = serde_json::to_string(&SharingMode::Locked).unwrap();
        assert_eq!(json, r#""locked""#);
        let mode: SharingMode = serde_json::from_str(r#""private""#).unwrap();
        assert_eq!(mode, SharingMode::Private);
    }

    #[test]
    fn test_secret_chunks_are_redacted() {
        let contents = vec![FileChunk::text("password "), FileChunk::secret("token")];
        assert_eq!(redacted_contents(&contents), "password ${secret:token}");
    }

    #[test]
    fn test_display_bind_secret_shows_only_name() {
        let op = Operation::BindSecret {
            name: "GITHUB_TOKEN".to_string(),
            secret: "gh".to_string(),
        };
        assert_eq!(op.to_string(), "SECRET GITHUB_TOKEN=${secret:gh}");
        assert_eq!(op.secret_refs(), vec!["gh"]);
    }

    #[test]
    fn test_is_exec() {
        let exec = Operation::Exec {
            argv: vec!["uname".to_string()],
            privileged: false,
            experimental_nesting: false,
        };
        assert!(exec.is_exec());
        assert!(!Operation::SetUser { user: "me".to_string() }.is_exec());
        assert_eq!(exec.to_string(), "EXEC uname");
    }

    #[test]
    fn test_operation_tagged_json() {
        let op = Operation::ExposePort {
            port: 2375,
            protocol: Protocol::Tcp,
        };
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["op"], "expose_port");
        assert_eq!(json["port"], 2375);
    }
}
