//! ctrforge - container build pipelines from the command line
//!
//! Builds container specs through the ctrforge façades and runs them with
//! the docker CLI or the in-memory simulated driver.
//!
//! ## Commands
//!
//! - `ctrforge render` - Print the spec a command would run
//! - `ctrforge run-shell` - Run shell text in a toolbox container
//! - `ctrforge print-env` / `inspect-env` - Inspect the container environment
//! - `ctrforge terraform <command>` - Run terraform over a source tree
//! - `ctrforge go-test` - Run go test over a source tree
//! - `ctrforge aws-config` - Validate and query AWS tag inspector configs
//! - `ctrforge completions` - Generate shell completions
//!
//! ## Quick Start
//!
//! ```bash
//! # Dry run against the simulated driver
//! ctrforge --driver simulated print-env --env STAGE=dev
//!
//! # Plan a terraform module
//! ctrforge terraform plan --src ./infra --module network --init-args "-upgrade"
//!
//! # Test every Go package with the race detector
//! ctrforge go-test --src . --race
//! ```
//!
//! Exit codes: 0 on success, 1 for invalid input, 2 when the driver or an
//! exec fails, 130 on Ctrl-C or timeout.

use clap::Parser;
use std::process::ExitCode;

mod cli;

fn main() -> ExitCode {
    let args = cli::Args::parse();
    let verbose = args.verbose;

    match cli::run(args) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {}", cli::describe(&e, verbose));
            ExitCode::from(cli::exit_code(&e))
        }
    }
}
