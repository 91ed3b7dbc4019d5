//! Shared helpers for stratus-lib integration tests.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use stratus_lib::placeholder::{self, Placeholder, PlaceholderError, Resolver};
use stratus_lib::{
  Context, Engine, EngineError, EngineOutputs, HomeProvider, LocalHome, Program, SynthConfig, Synthesizer,
};
use tempfile::TempDir;

/// Ordered log shared between the engine and test operations.
#[derive(Debug, Clone, Default)]
pub struct Events(Arc<Mutex<Vec<String>>>);

impl Events {
  pub fn push(&self, event: impl Into<String>) {
    self.0.lock().unwrap().push(event.into());
  }

  pub fn snapshot(&self) -> Vec<String> {
    self.0.lock().unwrap().clone()
  }
}

/// Provisioned attributes are `fake://<resource>/<path>`.
struct FakeAttributes;

impl Resolver for FakeAttributes {
  fn resolve(&self, placeholder: &Placeholder) -> Result<String, PlaceholderError> {
    Ok(format!("fake://{}/{}", placeholder.resource, placeholder.path))
  }
}

/// Engine that records what it was asked to do and fakes resource attributes.
pub struct RecordingEngine {
  pub events: Events,
  pub programs: Mutex<Vec<Program>>,
  pub fail_apply: bool,
}

impl RecordingEngine {
  pub fn new(events: Events) -> Self {
    Self {
      events,
      programs: Mutex::new(Vec::new()),
      fail_apply: false,
    }
  }

  pub fn failing(events: Events) -> Self {
    Self {
      fail_apply: true,
      ..Self::new(events)
    }
  }

  pub fn applied(&self) -> usize {
    self.programs.lock().unwrap().len()
  }
}

#[async_trait]
impl Engine for RecordingEngine {
  fn name(&self) -> &'static str {
    "recording"
  }

  async fn preview(&self, program: &Program, _context: &Context) -> Result<String, EngineError> {
    self.events.push("preview");
    Ok(format!("{} resources", program.resources.len()))
  }

  async fn apply(&self, program: &Program, _context: &Context) -> Result<EngineOutputs, EngineError> {
    self.events.push("apply");
    if self.fail_apply {
      return Err(EngineError::CommandFailed {
        cmd: "pulumi up".to_string(),
        code: Some(255),
        stderr: "error: quota exceeded".to_string(),
      });
    }
    self.programs.lock().unwrap().push(program.clone());

    let mut outputs = EngineOutputs::new();
    for (key, value) in &program.outputs {
      let value = match value {
        Value::String(text) => Value::String(placeholder::substitute(text, &FakeAttributes).unwrap()),
        other => other.clone(),
      };
      outputs.insert(key.clone(), value);
    }
    Ok(outputs)
  }

  async fn destroy(&self, _program: &Program, _context: &Context) -> Result<(), EngineError> {
    self.events.push("destroy");
    Ok(())
  }
}

pub fn test_config(temp: &TempDir) -> SynthConfig {
  SynthConfig {
    parallelism: 4,
    stage: "test".to_string(),
    work_root: temp.path().join("work"),
    backend_url: "file:///state".to_string(),
  }
}

pub fn local_home(temp: &TempDir) -> Arc<dyn HomeProvider> {
  Arc::new(LocalHome::new(temp.path().join("home")))
}

/// A synthesizer for project `shop`, stage `test`, with a local home.
pub fn synthesizer(temp: &TempDir) -> Synthesizer {
  Synthesizer::new("shop", local_home(temp), test_config(temp))
}

pub fn string_map(entries: &[(&str, &str)]) -> BTreeMap<String, Value> {
  entries
    .iter()
    .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
    .collect()
}
