//! stratus-cli: the command line for stratus projects.
//!
//! A project binary hands its [`Project`] to [`run`], which parses the
//! command line, synthesizes the project and drives the engine:
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use async_trait::async_trait;
//! # use stratus_lib::{Project, Store, TaskError};
//! struct Site;
//!
//! #[async_trait]
//! impl Project for Site {
//!   fn name(&self) -> &str {
//!     "site"
//!   }
//!
//!   async fn declare(&self, _store: Arc<Store>) -> Result<(), TaskError> {
//!     Ok(())
//!   }
//! }
//!
//! fn main() -> std::process::ExitCode {
//!   stratus_cli::run(Site)
//! }
//! ```

pub mod cmd;
pub mod output;

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::builder::RangedU64ValueParser;
use clap::{Parser, Subcommand};
use stratus_lib::{DeployError, Project, SynthConfig, SynthError};
use tracing_subscriber::EnvFilter;

use crate::output::{OutputFormat, print_error};

/// Synthesize and deploy infrastructure declared in Rust
#[derive(Debug, Parser)]
#[command(name = "stratus")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
  /// Stage to synthesize and deploy (overrides STRATUS_STAGE)
  #[arg(short, long, global = true)]
  pub stage: Option<String>,

  /// Maximum number of builds to run at once (overrides STRATUS_PARALLELISM)
  #[arg(short = 'j', long, global = true, value_parser = RangedU64ValueParser::<usize>::new().range(1..))]
  pub parallelism: Option<usize>,

  /// Enable verbose output
  #[arg(short, long, global = true)]
  pub verbose: bool,

  /// Output format
  #[arg(long, value_enum, default_value_t, global = true)]
  pub format: OutputFormat,

  #[command(subcommand)]
  pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
  /// Run builds and write the engine program without deploying
  Synth,

  /// Show what the engine would change
  Preview,

  /// Apply the program, run invokes and record outputs
  Deploy,

  /// Destroy every resource in the stage
  Remove,

  /// Show outputs from the last successful deploy
  Outputs,
}

impl Cli {
  /// Environment configuration with command-line overrides applied.
  pub fn config(&self) -> SynthConfig {
    let mut config = SynthConfig::from_env();
    if let Some(stage) = &self.stage {
      config.stage = stage.clone();
    }
    if let Some(parallelism) = self.parallelism {
      config.parallelism = parallelism;
    }
    config
  }
}

/// Parse the command line and run it against `project`.
pub fn run<P: Project>(project: P) -> ExitCode {
  let cli = Cli::parse();
  init_tracing(cli.verbose);

  match execute(&cli, &project) {
    Ok(()) => ExitCode::SUCCESS,
    Err(err) => {
      print_error(&describe(&err));
      ExitCode::from(exit_code(&err))
    }
  }
}

fn init_tracing(verbose: bool) {
  let filter = if verbose {
    EnvFilter::new("debug")
  } else {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
  };

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();
}

fn execute<P: Project>(cli: &Cli, project: &P) -> Result<()> {
  let config = cli.config();
  let format = cli.format;
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;

  rt.block_on(async {
    match cli.command {
      Commands::Synth => cmd::cmd_synth(project, config, format).await,
      Commands::Preview => cmd::cmd_preview(project, config, format).await,
      Commands::Deploy => cmd::cmd_deploy(project, config, format).await,
      Commands::Remove => cmd::cmd_remove(project, config, format).await,
      Commands::Outputs => cmd::cmd_outputs(project, config, format).await,
    }
  })
}

/// Library errors already carry their causes in their message.
fn describe(err: &anyhow::Error) -> String {
  if let Some(e) = err.downcast_ref::<DeployError>() {
    e.to_string()
  } else if let Some(e) = err.downcast_ref::<SynthError>() {
    e.to_string()
  } else {
    format!("{err:#}")
  }
}

/// Exit status for a failed command: the failure category, or 1.
pub fn exit_code(err: &anyhow::Error) -> u8 {
  if let Some(e) = err.downcast_ref::<DeployError>() {
    e.category().exit_code()
  } else if let Some(e) = err.downcast_ref::<SynthError>() {
    e.category().exit_code()
  } else {
    1
  }
}
