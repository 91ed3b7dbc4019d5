//! CLI output formatting utilities.
//!
//! Colored status lines, stack outputs, hashes, durations and timestamps.

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};

use anyhow::Context;
use clap::ValueEnum;
use owo_colors::{OwoColorize, Stream};
use serde_json::Value;
use stratus_lib::outputs::public_outputs;

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
  #[default]
  Text,
  Json,
}

impl OutputFormat {
  pub fn is_json(self) -> bool {
    matches!(self, OutputFormat::Json)
  }
}

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const WARNING: &str = "⚠";
  pub const INFO: &str = "•";
  pub const ARROW: &str = "→";
}

pub fn truncate_hash(hash: &str) -> &str {
  let len = hash.len().min(12);
  &hash[..len]
}

pub fn format_duration(duration: Duration) -> String {
  let secs = duration.as_secs();
  let millis = duration.subsec_millis();

  if secs >= 60 {
    let mins = secs / 60;
    let remaining_secs = secs % 60;
    format!("{}m {}s", mins, remaining_secs)
  } else if secs > 0 {
    format!("{}.{:02}s", secs, millis / 10)
  } else {
    format!("{}ms", millis)
  }
}

pub fn format_timestamp(time: SystemTime) -> String {
  humantime::format_rfc3339_seconds(time).to_string()
}

/// Strings print bare; everything else as compact JSON.
pub fn format_value(value: &Value) -> String {
  match value {
    Value::String(text) => text.clone(),
    other => other.to_string(),
  }
}

pub fn print_success(message: &str) {
  println!(
    "{} {}",
    symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
    message
  );
}

pub fn print_error(message: &str) {
  eprintln!(
    "{} {}",
    symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red()),
    message.if_supports_color(Stream::Stderr, |s| s.red())
  );
}

pub fn print_warning(message: &str) {
  eprintln!(
    "{} {}",
    symbols::WARNING.if_supports_color(Stream::Stderr, |s| s.yellow()),
    message.if_supports_color(Stream::Stderr, |s| s.yellow())
  );
}

pub fn print_info(message: &str) {
  println!(
    "{} {}",
    symbols::INFO.if_supports_color(Stream::Stdout, |s| s.blue()),
    message
  );
}

pub fn print_stat(label: &str, value: &str) {
  println!(
    "  {}: {}",
    label.if_supports_color(Stream::Stdout, |s| s.dimmed()),
    value
  );
}

/// Print stack outputs sorted by name, without internal keys.
pub fn print_outputs(outputs: &BTreeMap<String, Value>) {
  let visible = public_outputs(outputs);
  if visible.is_empty() {
    print_info("No outputs");
    return;
  }

  println!("Outputs:");
  let width = visible.keys().map(String::len).max().unwrap_or(0);
  for (name, value) in &visible {
    println!(
      "  {:<width$} {} {}",
      name.if_supports_color(Stream::Stdout, |s| s.bold()),
      symbols::ARROW.if_supports_color(Stream::Stdout, |s| s.dimmed()),
      format_value(value),
      width = width
    );
  }
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{}", json);
  Ok(())
}
