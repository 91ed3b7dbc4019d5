//! Implementation of the `stratus preview` command.

use anyhow::Result;
use serde_json::json;
use stratus_lib::{Project, SynthConfig, Synthesizer};

use super::engine;
use crate::output::{OutputFormat, print_json, print_success};

/// Synthesize, then ask the engine for the changes it would make.
pub async fn cmd_preview<P: Project + ?Sized>(project: &P, config: SynthConfig, format: OutputFormat) -> Result<()> {
  let engine = engine(&config);
  let synth = Synthesizer::for_project(project, config);
  let synthesis = synth.run(project).await?;
  let diff = synthesis.preview(&engine).await?;

  if format.is_json() {
    print_json(&json!({
      "stack": synth.stack().to_string(),
      "hash": synthesis.hash,
      "preview": diff,
    }))?;
  } else {
    println!("{}", diff.trim_end());
    print_success(&format!("Preview of {} complete", synth.stack()));
  }
  Ok(())
}
