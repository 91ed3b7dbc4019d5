//! Implementation of the `stratus outputs` command.

use anyhow::Result;
use serde_json::json;
use stratus_lib::{Project, SynthConfig, Synthesizer};

use crate::output::{
  OutputFormat, format_timestamp, print_info, print_json, print_outputs, print_stat, truncate_hash,
};

/// Print the outputs stored by the last successful deploy.
pub async fn cmd_outputs<P: Project + ?Sized>(project: &P, config: SynthConfig, format: OutputFormat) -> Result<()> {
  let synth = Synthesizer::for_project(project, config);
  let record = synth.last_deployment().await?;

  if format.is_json() {
    let body = match &record {
      Some(record) => json!({
        "stack": synth.stack().to_string(),
        "hash": record.program_hash,
        "deployed_at": format_timestamp(record.deployed_at()),
        "outputs": record.public_outputs(),
      }),
      None => json!({ "stack": synth.stack().to_string(), "outputs": {} }),
    };
    return print_json(&body);
  }

  let Some(record) = record else {
    print_info(&format!("No outputs for {}. Run 'stratus deploy' first.", synth.stack()));
    return Ok(());
  };

  print_stat("Stack", &synth.stack().to_string());
  print_stat("Deployed", &format_timestamp(record.deployed_at()));
  print_stat("Hash", truncate_hash(&record.program_hash.0));
  println!();
  print_outputs(&record.outputs);
  Ok(())
}
