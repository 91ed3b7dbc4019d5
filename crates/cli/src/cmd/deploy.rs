//! Implementation of the `stratus deploy` command.
//!
//! Synthesizes the project, applies the program, runs invokes and prints the
//! recorded outputs.

use std::time::Instant;

use anyhow::Result;
use serde_json::json;
use stratus_lib::{Project, SynthConfig, Synthesizer};
use tracing::info;

use super::engine;
use crate::output::{
  OutputFormat, format_duration, format_timestamp, print_json, print_outputs, print_stat, print_success, truncate_hash,
};

pub async fn cmd_deploy<P: Project + ?Sized>(project: &P, config: SynthConfig, format: OutputFormat) -> Result<()> {
  let started = Instant::now();
  let engine = engine(&config);
  let synth = Synthesizer::for_project(project, config);
  let synthesis = synth.run(project).await?;
  info!(builds = synthesis.builds.completed.len(), "synthesis finished");

  let record = synthesis.deploy(&engine).await?;

  if format.is_json() {
    print_json(&json!({
      "stack": synth.stack().to_string(),
      "hash": record.program_hash,
      "deployed_at": format_timestamp(record.deployed_at()),
      "outputs": record.public_outputs(),
    }))?;
    return Ok(());
  }

  print_success(&format!(
    "Deployed {} in {}",
    synth.stack(),
    format_duration(started.elapsed())
  ));
  print_stat("Hash", truncate_hash(&record.program_hash.0));
  println!();
  print_outputs(&record.outputs);
  Ok(())
}
