//! CLI argument parsing with clap derive

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::app::{AppContext, AppFlags, OutputFlags};
use crate::commands;
use crate::domain::error::{ConfigError, EngineError};
use crate::output::OutputContext;

/// Reserve devices and run multi-role tests against them
#[derive(Parser)]
#[command(
    name = "testbay",
    version,
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    /// Config file (default: $TESTBAY_CONFIG, then ~/.testbay/config.yaml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run one or more named tests
    Run(commands::run::RunArgs),

    /// Delete expired staged builds and crash dumps from every device
    Clean(commands::clean::CleanArgs),

    /// List the devices in the pool
    Devices(commands::devices::DevicesArgs),

    /// Show version
    Version,
}

impl Cli {
    /// Execute the CLI command and return the process exit code.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be loaded or the command fails
    /// before producing a result.
    pub async fn run(self) -> Result<i32> {
        let Cli {
            json,
            quiet,
            no_color,
            config,
            command,
        } = self;
        if let Command::Version = command {
            return commands::version::run(&OutputContext::new(no_color, quiet), json);
        }

        let app = AppContext::new(&AppFlags {
            output: OutputFlags {
                no_color,
                quiet,
                json,
            },
            config,
        })?;
        match command {
            Command::Run(args) => commands::run::run(&app, &args).await,
            Command::Clean(args) => commands::clean::run(&app, &args).await,
            Command::Devices(args) => commands::devices::run(&app, &args).await,
            Command::Version => Ok(0),
        }
    }
}

/// Rewrite single-dash long options (`-testname=smoke`) to their double-dash
/// form. Short flags (`-q`) and values are left alone.
#[must_use]
pub fn normalize_legacy_args(args: impl IntoIterator<Item = String>) -> Vec<String> {
    args.into_iter()
        .enumerate()
        .map(|(i, arg)| {
            let is_legacy = i > 0
                && arg.len() > 2
                && arg.starts_with('-')
                && !arg.starts_with("--")
                && arg[1..].starts_with(|c: char| c.is_ascii_alphabetic())
                && arg[1..]
                    .split('=')
                    .next()
                    .is_some_and(|name| name.len() > 1);
            if is_legacy { format!("-{arg}") } else { arg }
        })
        .collect()
}

/// Process exit code for an error that stopped a command.
#[must_use]
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<ConfigError>().is_some() {
        return 2;
    }
    if let Some(engine) = err.downcast_ref::<EngineError>() {
        return engine.outcome().exit_code();
    }
    1
}

/// Machine-readable error code for the JSON error object.
#[must_use]
pub fn error_code_for(err: &anyhow::Error) -> &'static str {
    match exit_code_for(err) {
        2 => "configuration_invalid",
        3 => "insufficient_resources",
        _ => "error",
    }
}
