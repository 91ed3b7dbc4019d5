//! Provisioning engine boundary.
//!
//! An [`Engine`] takes a synthesized [`Program`] and previews, applies or
//! destroys it for the context's stack. [`PulumiEngine`] drives the `pulumi`
//! CLI from the stage work directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

use crate::context::Context;
use crate::home::HomeError;
use crate::program::{Program, ProgramError};

/// Stack outputs reported by the engine after apply.
pub type EngineOutputs = BTreeMap<String, Value>;

#[derive(Debug, Error)]
pub enum EngineError {
  #[error("command failed: {cmd} (exit code: {code:?}): {stderr}")]
  CommandFailed {
    cmd: String,
    code: Option<i32>,
    stderr: String,
  },

  #[error("failed to spawn {cmd}: {source}")]
  Spawn {
    cmd: String,
    #[source]
    source: std::io::Error,
  },

  #[error("engine returned invalid outputs: {0}")]
  InvalidOutput(#[source] serde_json::Error),

  #[error(transparent)]
  Program(#[from] ProgramError),

  #[error("cannot derive state passphrase: {0}")]
  Passphrase(#[from] HomeError),

  #[error("engine rejected the program: {0}")]
  Rejected(String),
}

#[async_trait]
pub trait Engine: Send + Sync {
  fn name(&self) -> &'static str;

  /// Describe the changes apply would make.
  async fn preview(&self, program: &Program, context: &Context) -> Result<String, EngineError>;

  /// Converge infrastructure to `program` and return the stack outputs.
  async fn apply(&self, program: &Program, context: &Context) -> Result<EngineOutputs, EngineError>;

  /// Tear down everything the stack owns.
  async fn destroy(&self, program: &Program, context: &Context) -> Result<(), EngineError>;
}

/// Engine backed by the `pulumi` CLI and its YAML runtime.
#[derive(Debug, Clone)]
pub struct PulumiEngine {
  binary: PathBuf,
  base_args: Vec<String>,
  backend_url: String,
}

impl PulumiEngine {
  pub fn new(backend_url: impl Into<String>) -> Self {
    Self {
      binary: PathBuf::from("pulumi"),
      base_args: Vec::new(),
      backend_url: backend_url.into(),
    }
  }

  /// Launch the CLI through another program, e.g. `npx pulumi`.
  pub fn with_command(mut self, binary: impl Into<PathBuf>, base_args: impl IntoIterator<Item = impl Into<String>>) -> Self {
    self.binary = binary.into();
    self.base_args = base_args.into_iter().map(Into::into).collect();
    self
  }

  pub fn backend_url(&self) -> &str {
    &self.backend_url
  }

  async fn run(&self, args: &[&str], dir: &Path, passphrase: &str) -> Result<String, EngineError> {
    let cmd = std::iter::once(self.binary.display().to_string())
      .chain(self.base_args.iter().cloned())
      .chain(args.iter().map(|arg| arg.to_string()))
      .collect::<Vec<_>>()
      .join(" ");
    info!(cmd = %cmd, "running engine command");

    let output = Command::new(&self.binary)
      .args(&self.base_args)
      .args(args)
      .current_dir(dir)
      .env("PULUMI_CONFIG_PASSPHRASE", passphrase)
      .env("PULUMI_BACKEND_URL", &self.backend_url)
      .env("PULUMI_SKIP_UPDATE_CHECK", "true")
      .output()
      .await
      .map_err(|source| EngineError::Spawn {
        cmd: cmd.clone(),
        source,
      })?;

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

    if !output.status.success() {
      if !stdout.is_empty() {
        debug!(stdout = %stdout, "command stdout");
      }
      return Err(EngineError::CommandFailed {
        cmd,
        code: output.status.code(),
        stderr,
      });
    }

    if !stderr.is_empty() {
      debug!(stderr = %stderr, "command stderr");
    }
    Ok(stdout)
  }

  /// Write the program and select (or create) the stage's stack.
  async fn prepare(&self, program: &Program, context: &Context) -> Result<String, EngineError> {
    program.write_to(context.work_dir()).await?;
    let passphrase = context.home().passphrase(context).await?;
    self
      .run(&["stack", "select", "--create", context.stage()], context.work_dir(), &passphrase)
      .await?;
    Ok(passphrase)
  }
}

#[async_trait]
impl Engine for PulumiEngine {
  fn name(&self) -> &'static str {
    "pulumi"
  }

  async fn preview(&self, program: &Program, context: &Context) -> Result<String, EngineError> {
    let passphrase = self.prepare(program, context).await?;
    self
      .run(
        &["preview", "--non-interactive", "--diff", "--stack", context.stage()],
        context.work_dir(),
        &passphrase,
      )
      .await
  }

  async fn apply(&self, program: &Program, context: &Context) -> Result<EngineOutputs, EngineError> {
    let passphrase = self.prepare(program, context).await?;
    self
      .run(
        &["up", "--yes", "--non-interactive", "--skip-preview", "--stack", context.stage()],
        context.work_dir(),
        &passphrase,
      )
      .await?;

    let raw = self
      .run(
        &["stack", "output", "--json", "--show-secrets", "--stack", context.stage()],
        context.work_dir(),
        &passphrase,
      )
      .await?;
    if raw.is_empty() {
      return Ok(EngineOutputs::new());
    }
    serde_json::from_str(&raw).map_err(EngineError::InvalidOutput)
  }

  async fn destroy(&self, program: &Program, context: &Context) -> Result<(), EngineError> {
    let passphrase = self.prepare(program, context).await?;
    self
      .run(
        &["destroy", "--yes", "--non-interactive", "--skip-preview", "--stack", context.stage()],
        context.work_dir(),
        &passphrase,
      )
      .await?;
    Ok(())
  }
}
