//! Command line surface of ctrforge
//!
//! - `version`: print the crate version
//! - `render`: print the spec a façade would run
//! - `run-shell`, `print-env`, `inspect-env`, `terminal`: toolbox commands
//! - `terraform`: run a terraform command over a source tree
//! - `go-test`: run `go test` over a source tree
//! - `aws-config`: validate and query an AWS tag inspector configuration
//! - `completions`: generate shell completions

pub mod completions;

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, CommandFactory, Parser, Subcommand, ValueEnum};
use ctrforge::aws_tags::ConfigLoader;
use ctrforge::driver::{
    DockerDriver, Driver, Executor, OutputChunk, OutputStream, RunOptions, SimulatedDriver,
};
use ctrforge::engine::{CancelToken, Engine, EngineError};
use ctrforge::facade::{
    Facade, FacadeOptions, GoTest, GoTestOptions, Terraform, TerraformCommand, Toolbox,
};
use ctrforge::infrastructure::{Config, DriverKind, init_logging};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// CLI arguments for ctrforge
#[derive(Parser, Debug)]
#[command(name = "ctrforge")]
#[command(author, about, long_about = None, disable_version_flag = true)]
pub struct Args {
    /// YAML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Driver executing the specs
    #[arg(long, global = true, value_enum)]
    driver: Option<DriverArg>,

    /// Log level, `RUST_LOG` takes precedence
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Print the full error chain on failure
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Run timeout in seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    #[command(flatten)]
    facade: FacadeArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(ClapArgs, Debug)]
struct FacadeArgs {
    /// Full image URL, overrides the façade image and version
    #[arg(long, global = true)]
    image: Option<String>,

    /// Image tag of the façade
    #[arg(long, global = true)]
    version: Option<String>,

    /// `KEY=VALUE` forwarded into the container, repeatable
    #[arg(long = "env", global = true)]
    env: Vec<String>,

    /// Extra package installed in the container, repeatable
    #[arg(long = "package", global = true)]
    packages: Vec<String>,
}

impl FacadeArgs {
    fn options(&self) -> FacadeOptions {
        let mut opts = FacadeOptions::new()
            .env_vars(self.env.iter().cloned())
            .packages(self.packages.iter().cloned());
        if let Some(version) = &self.version {
            opts = opts.version(version.clone());
        }
        if let Some(image) = &self.image {
            opts = opts.image_url(image.clone());
        }
        opts
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the version
    Version,

    /// Print the toolbox spec, optionally with a shell command appended
    Render {
        /// Shell command to append
        script: Option<String>,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Run shell text in the toolbox container and print its output
    RunShell {
        /// Shell text, run with `sh -c`
        script: String,
    },

    /// Print the toolbox container environment
    PrintEnv,

    /// Print one environment variable of the toolbox container
    InspectEnv {
        /// Variable name
        key: String,
    },

    /// Open a shell in the toolbox container
    Terminal,

    /// Run a terraform command
    Terraform {
        /// Terraform command
        #[arg(value_enum)]
        command: TerraformArg,
        /// Source directory mounted at /mnt
        #[arg(long, default_value = ".")]
        src: PathBuf,
        /// Module directory relative to the source
        #[arg(long, default_value = ".")]
        module: String,
        /// Arguments of the command
        #[arg(long, default_value = "", allow_hyphen_values = true)]
        args: String,
        /// Arguments of the preceding `terraform init`
        #[arg(long, default_value = "", allow_hyphen_values = true)]
        init_args: String,
    },

    /// Run go test
    GoTest {
        /// Packages to test, `./...` when empty
        packages: Vec<String>,
        /// Source directory mounted at /mnt
        #[arg(long, default_value = ".")]
        src: PathBuf,
        /// Enable the race detector
        #[arg(long)]
        race: bool,
        /// Verbose test output
        #[arg(long)]
        test_verbose: bool,
        /// Skip long tests
        #[arg(long)]
        short: bool,
        /// Only run tests matching this regex
        #[arg(long)]
        run: Option<String>,
        /// Test binary timeout, e.g. `10m`
        #[arg(long)]
        test_timeout: Option<String>,
        /// Run each test n times
        #[arg(long)]
        count: Option<u32>,
        /// Stop after the first failure
        #[arg(long)]
        failfast: bool,
        /// JSON test output
        #[arg(long)]
        json: bool,
        /// Extra go test flag, repeatable
        #[arg(long = "flag", allow_hyphen_values = true)]
        flags: Vec<String>,
    },

    /// AWS tag inspector configuration
    AwsConfig {
        #[command(subcommand)]
        command: AwsCommand,
    },

    /// Generate shell completions
    Completions {
        /// Shell type
        #[arg(value_enum)]
        shell: ShellArg,
        /// Output file (stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum AwsCommand {
    /// Validate a configuration file
    Check {
        /// Configuration file
        file: PathBuf,
    },
    /// Print the merged criteria of a resource type as JSON
    Criteria {
        /// Configuration file
        file: PathBuf,
        /// Resource type, e.g. `ec2`
        resource_type: String,
    },
    /// Tell whether a resource is excluded
    Excluded {
        /// Configuration file
        file: PathBuf,
        /// Resource type, e.g. `s3`
        resource_type: String,
        /// Resource identifier
        resource_id: String,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum DriverArg {
    Simulated,
    Docker,
}

impl From<DriverArg> for DriverKind {
    fn from(arg: DriverArg) -> Self {
        match arg {
            DriverArg::Simulated => DriverKind::Simulated,
            DriverArg::Docker => DriverKind::Docker,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum TerraformArg {
    Init,
    Plan,
    Apply,
    Destroy,
    Validate,
    Fmt,
}

impl From<TerraformArg> for TerraformCommand {
    fn from(arg: TerraformArg) -> Self {
        match arg {
            TerraformArg::Init => TerraformCommand::Init,
            TerraformArg::Plan => TerraformCommand::Plan,
            TerraformArg::Apply => TerraformCommand::Apply,
            TerraformArg::Destroy => TerraformCommand::Destroy,
            TerraformArg::Validate => TerraformCommand::Validate,
            TerraformArg::Fmt => TerraformCommand::Fmt,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum ShellArg {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

impl From<ShellArg> for clap_complete::Shell {
    fn from(arg: ShellArg) -> Self {
        match arg {
            ShellArg::Bash => clap_complete::Shell::Bash,
            ShellArg::Zsh => clap_complete::Shell::Zsh,
            ShellArg::Fish => clap_complete::Shell::Fish,
            ShellArg::PowerShell => clap_complete::Shell::PowerShell,
            ShellArg::Elvish => clap_complete::Shell::Elvish,
        }
    }
}

/// Build the CLI command for completion generation
pub fn build_cli() -> clap::Command {
    Args::command()
}

/// Process exit code for an error returned by [`run`]
pub fn exit_code(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<EngineError>()
        .map_or(1, EngineError::exit_code)
}

/// Error text printed by the binary
pub fn describe(err: &anyhow::Error, verbose: bool) -> String {
    match err.downcast_ref::<EngineError>() {
        Some(engine_err) => engine_err.render(verbose),
        None if verbose => format!("{err:?}"),
        None => err.to_string(),
    }
}

/// Execute parsed CLI arguments, returning the process exit code
pub fn run(args: Args) -> Result<u8> {
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(level) = &args.log_level {
        config.log_level.clone_from(level);
    }
    if let Some(driver) = args.driver {
        config.driver = driver.into();
    }
    if let Some(secs) = args.timeout {
        config.exec_timeout_secs = Some(secs);
    }
    init_logging(&config.log_level);

    match args.command {
        Command::Version => {
            println!("ctrforge {}", ctrforge::VERSION);
            Ok(0)
        }
        Command::Completions { shell, output } => {
            let text = completions::generate_completions(shell.into())?;
            match output {
                Some(path) => completions::save_completions(&text, &path)?,
                None => print!("{text}"),
            }
            Ok(0)
        }
        Command::Render { script, json } => {
            let engine = Engine::new();
            let mut toolbox = Toolbox::new(&engine, &args.facade.options())?;
            if let Some(script) = script {
                toolbox = toolbox.map(|c| c.with_shell_exec(&script))?;
            }
            let spec = toolbox.spec()?;
            if json {
                println!("{}", spec.to_json()?);
            } else {
                print!("{}", spec.render());
            }
            Ok(0)
        }
        Command::AwsConfig { command } => aws_config(command),
        command => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("failed to start the async runtime")?;
            runtime.block_on(run_facade(command, &args.facade, &config))
        }
    }
}

fn aws_config(command: AwsCommand) -> Result<u8> {
    let mut loader = ConfigLoader::new();
    match command {
        AwsCommand::Check { file } => {
            let config = loader.load_file(&file)?;
            println!(
                "{}: version {}, {} resource type(s)",
                file.display(),
                config.version,
                config.resources.len()
            );
        }
        AwsCommand::Criteria {
            file,
            resource_type,
        } => {
            loader.load_file(&file)?;
            let criteria = loader.tag_criteria(&resource_type);
            println!("{}", serde_json::to_string_pretty(&criteria)?);
        }
        AwsCommand::Excluded {
            file,
            resource_type,
            resource_id,
        } => {
            loader.load_file(&file)?;
            match loader.exclusion(&resource_type, &resource_id) {
                Some(reason) => println!("excluded: {reason}"),
                None => {
                    println!("not excluded");
                    return Ok(1);
                }
            }
        }
    }
    Ok(0)
}

fn executor(config: &Config, engine: &Engine) -> Result<Executor> {
    let driver: Arc<dyn Driver> = match config.driver {
        DriverKind::Simulated => Arc::new(SimulatedDriver::new()),
        DriverKind::Docker => Arc::new(DockerDriver::new(
            config.docker_binary.clone(),
            config.layer_repository.clone(),
        )?),
    };
    tracing::debug!(driver = %config.driver, "Driver selected");
    Ok(Executor::new(driver, engine.clone()).with_default_timeout(config.exec_timeout()))
}

async fn run_facade(command: Command, facade: &FacadeArgs, config: &Config) -> Result<u8> {
    let engine = Engine::new();
    let executor = executor(config, &engine)?;
    let opts = RunOptions::new().with_cancel(CancelToken::on_ctrl_c());
    let facade_opts = facade.options();

    match command {
        Command::RunShell { script } => {
            let toolbox = Toolbox::new(&engine, &facade_opts)?;
            print!("{}", toolbox.run_shell(&executor, &script, &opts).await?);
        }
        Command::PrintEnv => {
            let toolbox = Toolbox::new(&engine, &facade_opts)?;
            print!("{}", toolbox.print_env(&executor, &opts).await?);
        }
        Command::InspectEnv { key } => {
            let toolbox = Toolbox::new(&engine, &facade_opts)?;
            println!("{}", toolbox.inspect_env(&executor, &key, &opts).await?);
        }
        Command::Terminal => {
            let toolbox = Toolbox::new(&engine, &facade_opts)?;
            let code = toolbox.terminal(&executor, &opts).await?;
            return Ok(u8::try_from(code).unwrap_or(1));
        }
        Command::Terraform {
            command,
            src,
            module,
            args,
            init_args,
        } => {
            let terraform = Terraform::new(&engine, &facade_opts, src)?.command(
                command.into(),
                &module,
                &args,
                &init_args,
            )?;
            stream(&terraform, &executor, opts).await?;
        }
        Command::GoTest {
            packages,
            src,
            race,
            test_verbose,
            short,
            run,
            test_timeout,
            count,
            failfast,
            json,
            flags,
        } => {
            let test_opts = GoTestOptions {
                race,
                verbose: test_verbose,
                short,
                run,
                timeout: test_timeout,
                count,
                failfast,
                json,
                flags,
            };
            let gotest = GoTest::new(&engine, &facade_opts)?
                .with_source(src, None)?
                .test(packages.as_slice(), &test_opts)?;
            stream(&gotest, &executor, opts).await?;
        }
        other => anyhow::bail!("{other:?} does not run a container"),
    }
    Ok(0)
}

/// Runs a façade, printing exec output as it arrives
async fn stream<F: Facade>(facade: &F, executor: &Executor, opts: RunOptions) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputChunk>();
    let printer = tokio::spawn(async move {
        while let Some(chunk) = rx.recv().await {
            match chunk.stream {
                OutputStream::Stdout => {
                    print!("{}", chunk.text);
                    let _ = std::io::stdout().flush();
                }
                OutputStream::Stderr => eprint!("{}", chunk.text),
            }
        }
    });

    let result = facade.run(executor, &opts.with_output(tx)).await;
    // the sender was dropped with the options, so the printer drains and ends
    let _ = tokio::time::timeout(Duration::from_secs(1), printer).await;
    result?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_terraform_plan() {
        let args = Args::try_parse_from([
            "ctrforge",
            "--driver",
            "simulated",
            "terraform",
            "plan",
            "--module",
            "network",
            "--args",
            "-var region=eu-west-1",
        ])
        .unwrap();
        assert_eq!(args.driver, Some(DriverArg::Simulated));
        match args.command {
            Command::Terraform {
                command,
                module,
                args,
                ..
            } => {
                assert_eq!(TerraformCommand::from(command), TerraformCommand::Plan);
                assert_eq!(module, "network");
                assert_eq!(args, "-var region=eu-west-1");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_facade_flags_are_global() {
        let args = Args::try_parse_from([
            "ctrforge",
            "print-env",
            "--env",
            "A=1",
            "--env",
            "B=2",
            "--version",
            "3.20",
        ])
        .unwrap();
        let opts = args.facade.options();
        assert_eq!(opts.env_vars_from_host, vec!["A=1", "B=2"]);
        assert_eq!(opts.version.as_deref(), Some("3.20"));
    }

    #[test]
    fn test_exit_code_from_engine_error() {
        let err = anyhow::Error::from(EngineError::Canceled);
        assert_eq!(exit_code(&err), 130);
        let err = anyhow::anyhow!("plain failure");
        assert_eq!(exit_code(&err), 1);
        assert_eq!(describe(&err, false), "plain failure");
    }

    #[test]
    fn test_unknown_terraform_command_is_rejected() {
        assert!(Args::try_parse_from(["ctrforge", "terraform", "import"]).is_err());
    }
}
