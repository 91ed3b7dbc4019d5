//! Implementation of the `stratus synth` command.
//!
//! Runs declaration and builds, then writes the engine program to the stage
//! work directory. No engine is started and the home is not touched.

use std::time::Instant;

use anyhow::{Context, Result};
use serde_json::json;
use stratus_lib::{Project, SynthConfig, Synthesizer};

use crate::output::{OutputFormat, format_duration, print_json, print_stat, print_success, truncate_hash};

pub async fn cmd_synth<P: Project + ?Sized>(project: &P, config: SynthConfig, format: OutputFormat) -> Result<()> {
  let started = Instant::now();
  let synth = Synthesizer::for_project(project, config);
  let synthesis = synth.run(project).await?;
  let path = synthesis
    .write_program()
    .await
    .context("Failed to write engine program")?;

  if format.is_json() {
    print_json(&json!({
      "stack": synth.stack().to_string(),
      "program": path,
      "hash": synthesis.hash,
      "resources": synthesis.program.resources.len(),
      "builds": synthesis.builds.completed,
      "dependencies": synthesis.graph.edges(),
      "waves": synthesis.graph.waves(),
    }))?;
    return Ok(());
  }

  print_success(&format!(
    "Synthesized {} ({} resources)",
    synth.stack(),
    synthesis.program.resources.len()
  ));
  print_stat("Program", &path.display().to_string());
  print_stat("Hash", truncate_hash(&synthesis.hash.0));
  if !synthesis.builds.completed.is_empty() {
    print_stat("Builds", &synthesis.builds.completed.join(", "));
  }
  print_stat(
    "Graph",
    &format!(
      "{} references in {} waves",
      synthesis.graph.edge_count(),
      synthesis.graph.waves().len()
    ),
  );
  print_stat("Duration", &format_duration(started.elapsed()));
  Ok(())
}
