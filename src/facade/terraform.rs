//! Terraform façade
//!
//! Every command mounts the source tree at `/mnt`, works in
//! `/mnt/<module>` and runs `terraform init` first, except `fmt`.

use super::{Facade, FacadeDefaults, FacadeOptions, base_container};
use crate::engine::errors::{EngineError, Result};
use crate::engine::recipes::MNT_PREFIX;
use crate::engine::{ContainerBuilder, Distro, Engine, MountOptions};
use crate::parse::parse_args;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

const TERRAFORM_MODULE: &str = "terraform";

/// Defaults of the terraform façade
pub const TERRAFORM_DEFAULTS: FacadeDefaults = FacadeDefaults {
    module: TERRAFORM_MODULE,
    image: "hashicorp/terraform",
    version: "latest",
    distro: Distro::Alpine,
};

/// Shared plugin cache
const CACHE_VOLUME: &str = ".terraform";
const CACHE_PATH: &str = "/.terraform";

/// Terraform subcommands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerraformCommand {
    /// `terraform init`
    Init,
    /// `terraform plan`
    Plan,
    /// `terraform apply`
    Apply,
    /// `terraform destroy`
    Destroy,
    /// `terraform validate`
    Validate,
    /// `terraform fmt`
    Fmt,
}

impl TerraformCommand {
    /// Name passed to the terraform binary
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TerraformCommand::Init => "init",
            TerraformCommand::Plan => "plan",
            TerraformCommand::Apply => "apply",
            TerraformCommand::Destroy => "destroy",
            TerraformCommand::Validate => "validate",
            TerraformCommand::Fmt => "fmt",
        }
    }

    /// Returns true when `init` must run first
    #[must_use]
    pub fn needs_init(self) -> bool {
        !matches!(self, TerraformCommand::Init | TerraformCommand::Fmt)
    }
}

impl fmt::Display for TerraformCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TerraformCommand {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "init" => Ok(TerraformCommand::Init),
            "plan" => Ok(TerraformCommand::Plan),
            "apply" => Ok(TerraformCommand::Apply),
            "destroy" => Ok(TerraformCommand::Destroy),
            "validate" => Ok(TerraformCommand::Validate),
            "fmt" => Ok(TerraformCommand::Fmt),
            other => Err(EngineError::config(format!(
                "unknown terraform command '{other}'"
            ))),
        }
    }
}

/// Terraform runner over a source tree
#[derive(Debug, Clone)]
pub struct Terraform {
    container: ContainerBuilder,
    src: PathBuf,
}

impl Terraform {
    /// Prepares the container; the plugin cache is added unless an existing
    /// spec is adopted.
    ///
    /// # Errors
    ///
    /// See [`base_container`].
    pub fn new(engine: &Engine, opts: &FacadeOptions, src: impl Into<PathBuf>) -> Result<Self> {
        let mut container = base_container(engine, &TERRAFORM_DEFAULTS, opts)?;
        if opts.existing.is_none() {
            container = container.with_mounted_cache(CACHE_PATH, CACHE_VOLUME, None, None)?;
        }
        let src = src.into();
        tracing::info!(src = %src.display(), "Terraform source directory");
        Ok(Self { container, src })
    }

    /// Source tree mounted at `/mnt`
    #[must_use]
    pub fn src(&self) -> &Path {
        &self.src
    }

    /// Appends `terraform <command>` for `module`, preceded by `init` when
    /// the command needs it.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidConfig`] for a module path escaping the source
    /// tree, [`EngineError::Domain`] when the module holds no `.tf` file.
    pub fn command(
        &self,
        command: TerraformCommand,
        module: &str,
        args: &str,
        init_args: &str,
    ) -> Result<Self> {
        let workdir = self.module_workdir(module)?;
        tracing::info!(command = %command, workdir = %workdir, "Terraform command");

        let mut container = self
            .container
            .with_mounted_directory(MNT_PREFIX, self.src.clone(), MountOptions::default())?
            .with_workdir(&workdir)?;
        if command.needs_init() {
            container = container.with_exec(terraform_argv(TerraformCommand::Init, init_args))?;
        }
        container = container.with_exec(terraform_argv(command, args))?;
        Ok(self.with_container(container))
    }

    /// `terraform init`
    ///
    /// # Errors
    ///
    /// See [`Terraform::command`].
    pub fn init(&self, module: &str, args: &str) -> Result<Self> {
        self.command(TerraformCommand::Init, module, args, "")
    }

    /// `terraform init` then `terraform plan`
    ///
    /// # Errors
    ///
    /// See [`Terraform::command`].
    pub fn plan(&self, module: &str, args: &str, init_args: &str) -> Result<Self> {
        self.command(TerraformCommand::Plan, module, args, init_args)
    }

    /// `terraform init` then `terraform apply`
    ///
    /// # Errors
    ///
    /// See [`Terraform::command`].
    pub fn apply(&self, module: &str, args: &str, init_args: &str) -> Result<Self> {
        self.command(TerraformCommand::Apply, module, args, init_args)
    }

    /// `terraform init` then `terraform destroy`
    ///
    /// # Errors
    ///
    /// See [`Terraform::command`].
    pub fn destroy(&self, module: &str, args: &str, init_args: &str) -> Result<Self> {
        self.command(TerraformCommand::Destroy, module, args, init_args)
    }

    /// `terraform init` then `terraform validate`
    ///
    /// # Errors
    ///
    /// See [`Terraform::command`].
    pub fn validate(&self, module: &str, args: &str, init_args: &str) -> Result<Self> {
        self.command(TerraformCommand::Validate, module, args, init_args)
    }

    /// `terraform fmt`
    ///
    /// # Errors
    ///
    /// See [`Terraform::command`].
    pub fn fmt(&self, module: &str, args: &str) -> Result<Self> {
        self.command(TerraformCommand::Fmt, module, args, "")
    }

    fn module_workdir(&self, module: &str) -> Result<String> {
        let module = module.trim().trim_matches('/');
        let relative = Path::new(module);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(EngineError::config(format!(
                "terraform module '{module}' must be a path inside the source directory"
            )));
        }

        let dir = self.src.join(relative);
        let has_tf = std::fs::read_dir(&dir)
            .map(|entries| {
                entries
                    .filter_map(std::result::Result::ok)
                    .any(|e| e.path().extension().is_some_and(|ext| ext == "tf"))
            })
            .unwrap_or(false);
        if !has_tf {
            return Err(EngineError::domain(
                TERRAFORM_MODULE,
                format!("no .tf files found in {}", dir.display()),
            ));
        }

        Ok(if module.is_empty() || module == "." {
            MNT_PREFIX.to_string()
        } else {
            format!("{MNT_PREFIX}/{module}")
        })
    }
}

fn terraform_argv(command: TerraformCommand, args: &str) -> Vec<String> {
    ["terraform".to_string(), command.as_str().to_string()]
        .into_iter()
        .chain(parse_args(args))
        .collect()
}

#[async_trait]
impl Facade for Terraform {
    fn container(&self) -> &ContainerBuilder {
        &self.container
    }

    fn with_container(&self, container: ContainerBuilder) -> Self {
        Self {
            container,
            src: self.src.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::Operation;
    use pretty_assertions::assert_eq;

    fn workspace() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("network")).unwrap();
        std::fs::write(dir.path().join("network/main.tf"), "terraform {}\n").unwrap();
        dir
    }

    fn execs(tf: &Terraform) -> Vec<Vec<String>> {
        tf.spec()
            .unwrap()
            .ops()
            .iter()
            .filter_map(|op| match op {
                Operation::Exec { argv, .. } => Some(argv.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_plan_runs_init_first() {
        let dir = workspace();
        let tf = Terraform::new(&Engine::new(), &FacadeOptions::new(), dir.path()).unwrap();
        let planned = tf
            .plan("network", "-var region=eu-west-1, -out=plan.tfplan", "-upgrade")
            .unwrap();
        assert_eq!(
            execs(&planned),
            vec![
                vec!["terraform", "init", "-upgrade"],
                vec!["terraform", "plan", "-var", "region=eu-west-1", "-out=plan.tfplan"],
            ]
        );
        assert_eq!(planned.spec().unwrap().workdir(), Some("/mnt/network"));
    }

    #[test]
    fn test_fmt_skips_init() {
        let dir = workspace();
        let tf = Terraform::new(&Engine::new(), &FacadeOptions::new(), dir.path()).unwrap();
        let formatted = tf.fmt("network", "-check").unwrap();
        assert_eq!(execs(&formatted), vec![vec!["terraform", "fmt", "-check"]]);
    }

    #[test]
    fn test_default_image_and_cache() {
        let dir = workspace();
        let tf = Terraform::new(&Engine::new(), &FacadeOptions::new(), dir.path()).unwrap();
        let spec = tf.spec().unwrap();
        assert_eq!(spec.base().url(), "hashicorp/terraform:latest");
        assert_eq!(spec.cache_volumes(), vec![".terraform"]);
    }

    #[test]
    fn test_module_without_tf_files_is_a_domain_error() {
        let dir = workspace();
        std::fs::create_dir_all(dir.path().join("empty")).unwrap();
        let tf = Terraform::new(&Engine::new(), &FacadeOptions::new(), dir.path()).unwrap();
        let err = tf.validate("empty", "", "").unwrap_err();
        assert_eq!(err.kind(), crate::engine::ErrorKind::DomainError);
        assert_eq!(err.module(), "terraform");
    }

    #[test]
    fn test_module_must_stay_inside_source() {
        let dir = workspace();
        let tf = Terraform::new(&Engine::new(), &FacadeOptions::new(), dir.path()).unwrap();
        assert!(tf.init("../outside", "").is_err());
    }

    #[test]
    fn test_command_from_str() {
        assert_eq!("apply".parse::<TerraformCommand>().unwrap(), TerraformCommand::Apply);
        assert!(!TerraformCommand::Fmt.needs_init());
        assert!(TerraformCommand::Destroy.needs_init());
        assert!("import".parse::<TerraformCommand>().is_err());
    }
}
