//! Execution context shared by deferred operations.
//!
//! A [`Context`] is created once per synthesis, after the store is sealed,
//! and handed to every build and invoke task. It carries the stack identity,
//! the home provider, the sealed resources, and the write-once artifact slots
//! that builds fill for resources to read.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::home::HomeProvider;
use crate::output::{OutputError, OutputResolver};
use crate::placeholder::Placeholder;
use crate::resource::Resource;

/// The identity of one deployment target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stack {
  pub project: String,
  pub stage: String,
}

impl Stack {
  pub fn new(project: impl Into<String>, stage: impl Into<String>) -> Self {
    Self {
      project: project.into(),
      stage: stage.into(),
    }
  }
}

impl fmt::Display for Stack {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}", self.project, self.stage)
  }
}

#[derive(Debug, Error)]
pub enum ContextError {
  #[error("artifact '{0}' has already been set")]
  ArtifactAlreadySet(String),

  #[error("cannot encode artifact '{key}': {source}")]
  Encode {
    key: String,
    #[source]
    source: serde_json::Error,
  },

  #[error("cannot decode artifact '{key}': {source}")]
  Decode {
    key: String,
    #[source]
    source: serde_json::Error,
  },
}

/// Environment threaded through build and invoke tasks.
pub struct Context {
  stack: Stack,
  home: Arc<dyn HomeProvider>,
  work_dir: PathBuf,
  resources: Vec<Resource>,
  artifacts: Mutex<BTreeMap<String, Value>>,
}

impl fmt::Debug for Context {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Context")
      .field("stack", &self.stack)
      .field("home", &self.home.name())
      .field("work_dir", &self.work_dir)
      .field("resources", &self.resources.len())
      .finish_non_exhaustive()
  }
}

impl Context {
  pub fn new(stack: Stack, home: Arc<dyn HomeProvider>, work_dir: impl Into<PathBuf>) -> Self {
    Self {
      stack,
      home,
      work_dir: work_dir.into(),
      resources: Vec::new(),
      artifacts: Mutex::new(BTreeMap::new()),
    }
  }

  pub(crate) fn with_resources(mut self, resources: Vec<Resource>) -> Self {
    self.resources = resources;
    self
  }

  pub fn stack(&self) -> &Stack {
    &self.stack
  }

  pub fn project(&self) -> &str {
    &self.stack.project
  }

  pub fn stage(&self) -> &str {
    &self.stack.stage
  }

  pub fn home(&self) -> &Arc<dyn HomeProvider> {
    &self.home
  }

  /// Directory for files written by builds and the engine.
  pub fn work_dir(&self) -> &Path {
    &self.work_dir
  }

  /// Resources of the sealed store, in registration order.
  pub fn resources(&self) -> &[Resource] {
    &self.resources
  }

  pub fn resource(&self, name: &str) -> Option<&Resource> {
    self.resources.iter().find(|r| r.name() == name)
  }

  fn slots(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Value>> {
    self.artifacts.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Fill the artifact slot `key`. Each slot can be written once.
  pub fn set_artifact<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), ContextError> {
    let value = serde_json::to_value(value).map_err(|source| ContextError::Encode {
      key: key.to_string(),
      source,
    })?;

    let mut slots = self.slots();
    if slots.contains_key(key) {
      return Err(ContextError::ArtifactAlreadySet(key.to_string()));
    }
    debug!(artifact = %key, "artifact set");
    slots.insert(key.to_string(), value);
    Ok(())
  }

  pub fn artifact(&self, key: &str) -> Option<Value> {
    self.slots().get(key).cloned()
  }

  pub fn artifact_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ContextError> {
    self
      .artifact(key)
      .map(|value| {
        serde_json::from_value(value).map_err(|source| ContextError::Decode {
          key: key.to_string(),
          source,
        })
      })
      .transpose()
  }

  pub fn has_artifact(&self, key: &str) -> bool {
    self.slots().contains_key(key)
  }

  /// Snapshot of every filled slot.
  pub fn artifacts(&self) -> BTreeMap<String, Value> {
    self.slots().clone()
  }
}

/// Before apply only artifacts are known.
impl OutputResolver for Context {
  fn reference(&self, placeholder: &Placeholder) -> Result<Value, OutputError> {
    Err(OutputError::UnresolvedReference {
      resource: placeholder.resource.clone(),
      path: placeholder.path.clone(),
    })
  }

  fn artifact(&self, key: &str) -> Result<Value, OutputError> {
    Context::artifact(self, key).ok_or_else(|| OutputError::UnresolvedArtifact(key.to_string()))
  }
}
