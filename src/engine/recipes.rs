//! Reusable operation compositions shared by the façades

use super::builder::{ContainerBuilder, ExecOptions, MountOptions};
use super::errors::{EngineError, Result};
use super::secrets::SecretHandle;
use super::Engine;
use crate::image::ImageRef;
use crate::parse::{VersionTag, parse_platform_or_default};
use crate::spec::{FileChunk, FileSource, Protocol, SharingMode, Spec};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Directory sources and downloaded files are placed under
pub const MNT_PREFIX: &str = "/mnt";

/// Where `.netrc` is written
pub const NETRC_PATH: &str = "/root/.netrc";

/// Default Docker-in-Docker version
pub const DOCKER_VERSION_DEFAULT: &str = "24.0";

/// Port `dockerd` listens on inside the sidecar
pub const DOCKER_PORT: u16 = 2375;

/// Alpine utility set installed by [`ContainerBuilder::with_utilities`]
const UTILITIES: [&str; 7] = ["curl", "wget", "bash", "jq", "vim", "unzip", "yq"];

/// Base distribution family, selecting the package manager
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Distro {
    /// `apk`
    #[default]
    Alpine,
    /// `apt-get`
    Ubuntu,
    /// `apt-get`
    Debian,
}

impl Distro {
    fn install_commands(self, packages: &[&str]) -> Vec<Vec<String>> {
        let owned = packages.iter().map(ToString::to_string);
        match self {
            Distro::Alpine => vec![
                vec!["apk".to_string(), "update".to_string()],
                ["apk", "add"].iter().map(ToString::to_string).chain(owned).collect(),
            ],
            Distro::Ubuntu | Distro::Debian => vec![
                vec!["apt-get".to_string(), "update".to_string(), "-y".to_string()],
                ["apt-get", "install", "-y"]
                    .iter()
                    .map(ToString::to_string)
                    .chain(owned)
                    .collect(),
            ],
        }
    }

    fn shell(self) -> &'static str {
        match self {
            Distro::Alpine => "sh",
            Distro::Ubuntu | Distro::Debian => "bash",
        }
    }
}

impl fmt::Display for Distro {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Distro::Alpine => write!(f, "alpine"),
            Distro::Ubuntu => write!(f, "ubuntu"),
            Distro::Debian => write!(f, "debian"),
        }
    }
}

impl FromStr for Distro {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "alpine" => Ok(Distro::Alpine),
            "ubuntu" => Ok(Distro::Ubuntu),
            "debian" => Ok(Distro::Debian),
            other => Err(EngineError::config(format!(
                "unsupported distribution '{other}', expected alpine, ubuntu or debian"
            ))),
        }
    }
}

/// Hosting service of a cloned repository, selecting how a token authenticates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vcs {
    /// Token sent as `x-access-token`
    #[default]
    GitHub,
    /// Token sent as `oauth2`
    GitLab,
}

impl Vcs {
    /// Env var the token is bound to during the clone
    #[must_use]
    pub fn token_env(self) -> &'static str {
        match self {
            Vcs::GitHub => "GITHUB_TOKEN",
            Vcs::GitLab => "GITLAB_TOKEN",
        }
    }

    fn token_user(self) -> &'static str {
        match self {
            Vcs::GitHub => "x-access-token",
            Vcs::GitLab => "oauth2",
        }
    }

    /// Git credential helper answering with the token from [`Vcs::token_env`]
    fn credential_helper(self) -> String {
        format!(
            "credential.helper=!f() {{ echo username={}; echo \"password=${{{}}}\"; }}; f",
            self.token_user(),
            self.token_env()
        )
    }
}

impl fmt::Display for Vcs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Vcs::GitHub => write!(f, "github"),
            Vcs::GitLab => write!(f, "gitlab"),
        }
    }
}

impl FromStr for Vcs {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "github" => Ok(Vcs::GitHub),
            "gitlab" => Ok(Vcs::GitLab),
            other => Err(EngineError::config(format!(
                "unsupported vcs '{other}', expected github or gitlab"
            ))),
        }
    }
}

/// Password source for [`ContainerBuilder::with_netrc`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetrcPassword {
    /// Plain text, rendered in the spec
    Literal(String),
    /// A registered secret, resolved at execution
    Secret(SecretHandle),
}

/// Overrides for the Go cache recipes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GoCacheOptions {
    /// Mount path inside the container
    pub path: Option<String>,
    /// Volume name
    pub volume: Option<String>,
    /// Sharing mode of the volume
    pub sharing: Option<SharingMode>,
}

struct GoCache {
    env: &'static str,
    path: &'static str,
    volume: &'static str,
}

const GO_BUILD_CACHE: GoCache = GoCache {
    env: "GOCACHE",
    path: "/root/.cache/go-build",
    volume: "gobuildcache",
};

const GO_MOD_CACHE: GoCache = GoCache {
    env: "GOMODCACHE",
    path: "/go/pkg/mod",
    volume: "gomodcache",
};

const GO_TEST_CACHE: GoCache = GoCache {
    env: "GOTESTCACHE",
    path: "/root/.cache/go-test",
    volume: "gotestcache",
};

/// `machine <host>\nlogin <user>\npassword <pass>\n`
fn netrc_chunks(host: &str, user: &str, password: &NetrcPassword) -> Vec<FileChunk> {
    let password = match password {
        NetrcPassword::Literal(value) => FileChunk::text(value.clone()),
        NetrcPassword::Secret(handle) => FileChunk::secret(handle.name()),
    };
    vec![
        FileChunk::text(format!("machine {host}\nlogin {user}\npassword ")),
        password,
        FileChunk::text("\n"),
    ]
}

fn dagger_install_command(version: &str) -> String {
    format!(
        "cd / && DAGGER_VERSION=\"{version}\" curl -L https://dl.dagger.io/dagger/install.sh | DAGGER_VERSION=\"{version}\" sh"
    )
}

/// `<module>@<version>`, `latest` when no version is given
fn go_package_at(module: &str, version: Option<&str>) -> Result<String> {
    let tag = match version.map(str::trim).filter(|v| !v.is_empty()) {
        Some(version) => VersionTag::parse(version)?,
        None => VersionTag::latest(),
    };
    Ok(format!("{module}@{}", tag.with_v_prefix()))
}

/// Basename of the URL path, used as default download name
fn url_basename(raw: &str) -> Result<String> {
    let parsed =
        url::Url::parse(raw).map_err(|e| EngineError::config(format!("invalid URL '{raw}': {e}")))?;
    parsed
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .ok_or_else(|| EngineError::config(format!("cannot derive a file name from '{raw}'")))
}

impl ContainerBuilder {
    /// Mounts `dir` at `/mnt` and works in `/mnt[/workdir]`
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConfig`] when no base image is set.
    pub fn with_source(&self, dir: impl Into<PathBuf>, workdir: Option<&str>) -> Result<Self> {
        let workdir = match workdir.map(|w| w.trim().trim_matches('/')) {
            Some(sub) if !sub.is_empty() => format!("{MNT_PREFIX}/{sub}"),
            _ => MNT_PREFIX.to_string(),
        };
        self.with_mounted_directory(MNT_PREFIX, dir, MountOptions::default())?
            .with_workdir(&workdir)
    }

    /// Installs `packages` with the distribution's package manager
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConfig`] when no base image is set.
    pub fn with_packages(&self, distro: Distro, packages: &[&str]) -> Result<Self> {
        distro
            .install_commands(packages)
            .into_iter()
            .try_fold(self.clone(), |builder, argv| builder.with_exec(argv))
    }

    /// Installs curl, wget, bash, jq, vim, unzip and yq
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConfig`] when no base image is set.
    pub fn with_utilities(&self, distro: Distro) -> Result<Self> {
        self.with_packages(distro, &UTILITIES)
    }

    /// Installs git
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConfig`] when no base image is set.
    pub fn with_git(&self, distro: Distro) -> Result<Self> {
        match distro {
            Distro::Alpine => self.with_exec(["apk", "add", "git"]),
            Distro::Ubuntu | Distro::Debian => self.with_packages(distro, &["git"]),
        }
    }

    /// Installs the AWS CLI
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConfig`] when no base image is set.
    pub fn with_aws_cli(&self, distro: Distro) -> Result<Self> {
        match distro {
            Distro::Alpine => self.with_exec(["apk", "add", "--no-cache", "aws-cli"]),
            Distro::Ubuntu | Distro::Debian => self
                .with_exec(["apt-get", "update"])?
                .with_exec(["apt-get", "install", "-y", "awscli"]),
        }
    }

    /// Installs gcc and the C library headers
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConfig`] when no base image is set.
    pub fn with_gcc_compiler(&self, distro: Distro) -> Result<Self> {
        match distro {
            Distro::Alpine => self.with_exec(["apk", "add", "--no-cache", "gcc", "musl-dev"]),
            Distro::Ubuntu | Distro::Debian => self.with_packages(distro, &["gcc", "libc6-dev"]),
        }
    }

    /// Writes a `.netrc` entry for `host` into `/root/.netrc`
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidConfig`] for blank host or user,
    /// [`EngineError::UnknownSecret`] for an undefined secret.
    pub fn with_netrc(&self, host: &str, user: &str, password: &NetrcPassword) -> Result<Self> {
        if host.trim().is_empty() || user.trim().is_empty() {
            return Err(EngineError::config("netrc host and login must not be empty"));
        }
        self.with_new_file(
            NETRC_PATH,
            netrc_chunks(host.trim(), user.trim(), password),
            Some("0600"),
        )
    }

    /// Sets GOOS, GOARCH and GOARM; defaults to `linux/amd64`
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidPlatform`] for a malformed platform.
    pub fn with_go_platform(&self, platform: Option<&str>) -> Result<Self> {
        let platform = parse_platform_or_default(platform)?;
        platform
            .go_env()
            .into_iter()
            .try_fold(self.clone(), |builder, (name, value)| {
                builder.with_env_variable(name, value, false)
            })
    }

    fn with_go_cache(&self, cache: &GoCache, options: &GoCacheOptions) -> Result<Self> {
        let path = options.path.as_deref().unwrap_or(cache.path);
        let volume = options.volume.as_deref().unwrap_or(cache.volume);
        self.with_mounted_cache(path, volume, options.sharing, None)?
            .with_env_variable(cache.env, path, false)
    }

    /// Mounts the Go build cache and sets GOCACHE
    ///
    /// # Errors
    ///
    /// See [`ContainerBuilder::with_mounted_cache`].
    pub fn with_go_build_cache(&self, options: &GoCacheOptions) -> Result<Self> {
        self.with_go_cache(&GO_BUILD_CACHE, options)
    }

    /// Mounts the Go module cache and sets GOMODCACHE
    ///
    /// # Errors
    ///
    /// See [`ContainerBuilder::with_mounted_cache`].
    pub fn with_go_mod_cache(&self, options: &GoCacheOptions) -> Result<Self> {
        self.with_go_cache(&GO_MOD_CACHE, options)
    }

    /// Mounts the Go test cache and sets GOTESTCACHE
    ///
    /// # Errors
    ///
    /// See [`ContainerBuilder::with_mounted_cache`].
    pub fn with_go_test_cache(&self, options: &GoCacheOptions) -> Result<Self> {
        self.with_go_cache(&GO_TEST_CACHE, options)
    }

    /// Sets `CGO_ENABLED=1`
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConfig`] when no base image is set.
    pub fn with_cgo_enabled(&self) -> Result<Self> {
        self.with_env_variable("CGO_ENABLED", "1", false)
    }

    /// Sets `CGO_ENABLED=0`
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConfig`] when no base image is set.
    pub fn with_cgo_disabled(&self) -> Result<Self> {
        self.with_env_variable("CGO_ENABLED", "0", false)
    }

    /// Sets GOPRIVATE
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConfig`] for a blank host.
    pub fn with_go_private(&self, host: &str) -> Result<Self> {
        if host.trim().is_empty() {
            return Err(EngineError::config("GOPRIVATE host must not be empty"));
        }
        self.with_env_variable("GOPRIVATE", host.trim(), false)
    }

    /// Sets GOPROXY
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConfig`] for a blank proxy.
    pub fn with_go_proxy(&self, proxy: &str) -> Result<Self> {
        if proxy.trim().is_empty() {
            return Err(EngineError::config("GOPROXY must not be empty"));
        }
        self.with_env_variable("GOPROXY", proxy.trim(), false)
    }

    /// Sets CACHE_BUSTER to the current time so later execs are not reused
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConfig`] when no base image is set.
    pub fn with_cache_buster(&self) -> Result<Self> {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true);
        self.with_env_variable("CACHE_BUSTER", now, false)
    }

    /// Runs `go install <pkg>` for each package
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConfig`] for a blank package.
    pub fn with_go_install<S: AsRef<str>>(&self, packages: &[S]) -> Result<Self> {
        packages.iter().try_fold(self.clone(), |builder, pkg| {
            let pkg = pkg.as_ref().trim();
            if pkg.is_empty() {
                return Err(EngineError::config("go install package must not be empty"));
            }
            builder.with_exec(["go", "install", pkg])
        })
    }

    /// Installs gotestsum and, unless skipped, tparse
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConfig`] for a malformed version.
    pub fn with_go_test_sum(
        &self,
        gotestsum_version: Option<&str>,
        tparse_version: Option<&str>,
        skip_tparse: bool,
    ) -> Result<Self> {
        let mut packages = vec![go_package_at("gotest.tools/gotestsum", gotestsum_version)?];
        if !skip_tparse {
            packages.push(go_package_at("github.com/mfridman/tparse", tparse_version)?);
        }
        self.with_go_install(&packages)
    }

    /// Runs `go <args>` for `platform` (default `linux/amd64`)
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidPlatform`] or [`EngineError::InvalidConfig`] for
    /// empty arguments.
    pub fn with_go_exec<S: AsRef<str>>(&self, args: &[S], platform: Option<&str>) -> Result<Self> {
        if args.is_empty() {
            return Err(EngineError::config("go exec requires arguments"));
        }
        let argv: Vec<String> = std::iter::once("go".to_string())
            .chain(args.iter().map(|a| a.as_ref().to_string()))
            .collect();
        self.with_go_platform(platform)?.with_exec(argv)
    }

    /// Installs the Dagger CLI and sets DAGGER_VERSION
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConfig`] for versions older than 0.12.0.
    pub fn with_dagger_cli(&self, distro: Distro, version: &str) -> Result<Self> {
        let tag = VersionTag::parse(version)?;
        if !tag.at_least(0, 12, 0) {
            return Err(EngineError::config(format!(
                "dagger CLI version must be at least v0.12.0, got '{version}'"
            )));
        }
        let version = tag.with_v_prefix();
        let shell = distro.shell();
        let installer = match distro {
            Distro::Alpine => self.with_exec(["apk", "add", "--no-cache", "curl"])?,
            Distro::Ubuntu | Distro::Debian => self
                .with_exec(["apt-get", "update"])?
                .with_exec(["apt-get", "install", "-y", "curl"])?,
        };
        installer
            .with_exec([shell.to_string(), "-c".to_string(), dagger_install_command(&version)])?
            .with_env_variable("DAGGER_VERSION", version, false)
    }

    /// Binds a secret as an environment variable
    ///
    /// # Errors
    ///
    /// See [`ContainerBuilder::with_secret_variable`].
    pub fn with_secret_as_env(&self, name: &str, secret: &SecretHandle) -> Result<Self> {
        self.with_secret_variable(name, secret)
    }

    /// Makes `user` (and optionally `group`) owner of `dirs`
    ///
    /// # Errors
    ///
    /// See [`ContainerBuilder::with_chown`].
    pub fn with_user_as_owner_of_dirs<S: AsRef<str>>(
        &self,
        user: &str,
        group: Option<&str>,
        dirs: &[S],
        as_root: bool,
    ) -> Result<Self> {
        self.with_chown(user, group, dirs, as_root)
    }

    /// Applies `mode` to `dirs`, returning to `user` when escalated
    ///
    /// # Errors
    ///
    /// See [`ContainerBuilder::with_chmod`].
    pub fn with_user_with_permissions_on_dirs<S: AsRef<str>>(
        &self,
        user: &str,
        mode: &str,
        dirs: &[S],
        as_root: bool,
    ) -> Result<Self> {
        self.with_chmod(mode, dirs, as_root, Some(user))
    }

    /// Fetches `url` into `/mnt/<dest_name>` (or the URL basename)
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConfig`] for an unparsable URL or one
    /// without a file name.
    pub fn with_downloaded_file(&self, url: &str, dest_name: Option<&str>) -> Result<Self> {
        let name = match dest_name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(name) => name.trim_start_matches('/').to_string(),
            None => url_basename(url)?,
        };
        self.with_mounted_file(
            &format!("{MNT_PREFIX}/{name}"),
            FileSource::Url(url.to_string()),
            None,
        )
    }

    /// Clones `repo_url` into `/mnt` and works there
    ///
    /// Needs git in the image, see [`ContainerBuilder::with_git`]. A token is
    /// bound as [`Vcs::token_env`] and handed to git by a credential helper,
    /// so its value stays out of argv and the rendered spec.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidConfig`] for a URL that is not http(s) or embeds
    /// credentials, [`EngineError::UnknownSecret`] for an undefined token.
    pub fn with_cloned_git_repo(
        &self,
        repo_url: &str,
        token: Option<&SecretHandle>,
        vcs: Vcs,
    ) -> Result<Self> {
        let url = url::Url::parse(repo_url.trim())
            .map_err(|e| EngineError::config(format!("invalid repository URL '{repo_url}': {e}")))?;
        if !matches!(url.scheme(), "https" | "http") {
            return Err(EngineError::config(format!(
                "repository URL must use http or https, got '{}'",
                url.scheme()
            )));
        }
        if !url.username().is_empty() || url.password().is_some() {
            return Err(EngineError::config(
                "repository URL must not embed credentials, pass a token instead",
            ));
        }

        let mut argv = vec!["git".to_string()];
        let builder = match token {
            Some(token) => {
                argv.push("-c".to_string());
                argv.push(vcs.credential_helper());
                self.with_secret_variable(vcs.token_env(), token)?
            }
            None => self.clone(),
        };
        argv.extend(
            ["clone", "--depth", "1", url.as_str(), MNT_PREFIX]
                .iter()
                .map(ToString::to_string),
        );
        builder.with_exec(argv)?.with_workdir(MNT_PREFIX)
    }

    /// Binds a Docker-in-Docker sidecar as `docker` and points DOCKER_HOST at it
    ///
    /// # Errors
    ///
    /// See [`docker_service`].
    pub fn with_docker_service(&self, version: Option<&str>) -> Result<Self> {
        let service = docker_service(self.engine(), version)?;
        self.with_service_binding("docker", &service)?
            .with_env_variable("DOCKER_HOST", format!("tcp://docker:{DOCKER_PORT}"), false)
    }
}

/// Spec of a `dockerd` sidecar listening on port 2375
///
/// # Errors
///
/// [`EngineError::InvalidImageUrl`] for a malformed version,
/// [`EngineError::CacheVolumeConflict`] when the lib volume was fixed to
/// another mode.
pub fn docker_service(engine: &Engine, version: Option<&str>) -> Result<Spec> {
    let version = version
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(DOCKER_VERSION_DEFAULT);
    let image = ImageRef::new("docker", &format!("{version}-dind"))?;

    engine
        .from_image("docker-service", image)
        .with_mounted_cache(
            "/var/lib/docker",
            &format!("{version}-docker-lib"),
            Some(SharingMode::Private),
            None,
        )?
        .with_exposed_port(DOCKER_PORT, Protocol::Tcp)?
        .with_exec_opts(
            [
                "dockerd",
                "--host=tcp://0.0.0.0:2375",
                "--host=unix:///var/run/docker.sock",
                "--tls=false",
            ],
            ExecOptions {
                privileged: true,
                experimental_nesting: false,
            },
        )?
        .spec()
}
