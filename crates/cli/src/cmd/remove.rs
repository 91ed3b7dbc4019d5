//! Implementation of the `stratus remove` command.

use anyhow::Result;
use serde_json::json;
use stratus_lib::{Project, SynthConfig, Synthesizer};

use super::engine;
use crate::output::{OutputFormat, print_json, print_success};

/// Destroy every resource the engine tracks for the stage.
///
/// The program is still synthesized first: the engine needs it to select the
/// stack, so a failing build also blocks removal.
pub async fn cmd_remove<P: Project + ?Sized>(project: &P, config: SynthConfig, format: OutputFormat) -> Result<()> {
  let engine = engine(&config);
  let synth = Synthesizer::for_project(project, config);
  let synthesis = synth.run(project).await?;
  synthesis.destroy(&engine).await?;

  if format.is_json() {
    print_json(&json!({ "stack": synth.stack().to_string(), "removed": true }))?;
  } else {
    print_success(&format!("Removed {}", synth.stack()));
  }
  Ok(())
}
