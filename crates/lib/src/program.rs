//! The program handed to the provisioning engine.
//!
//! Serializes to the engine's YAML layout:
//!
//! ```yaml
//! name: shop
//! runtime: yaml
//! resources:
//!   api-bucket:
//!     type: aws:s3:Bucket
//!   api:
//!     type: aws:lambda:Function
//!     properties:
//!       role: ${api-bucket.arn}
//! outputs:
//!   __stratus.api-bucket.arn: ${api-bucket.arn}
//! ```
//!
//! Resources keep registration order; properties and outputs are sorted.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::consts::PROGRAM_FILE;
use crate::output::{OutputError, OutputResolver};
use crate::outputs::internal_key;
use crate::resource::Resource;
use crate::util::hash::Hashable;
use crate::variable::Variable;

#[derive(Debug, Error)]
pub enum ProgramError {
  #[error("cannot serialize program as YAML: {0}")]
  Yaml(#[from] serde_yaml::Error),

  #[error("cannot serialize program as JSON: {0}")]
  Json(#[from] serde_json::Error),

  #[error("cannot write program to {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgramResource {
  #[serde(skip)]
  pub name: String,
  #[serde(rename = "type")]
  pub kind: String,
  #[serde(skip_serializing_if = "BTreeMap::is_empty")]
  pub properties: BTreeMap<String, Value>,
}

fn serialize_resources<S: Serializer>(resources: &[ProgramResource], serializer: S) -> Result<S::Ok, S::Error> {
  let mut map = serializer.serialize_map(Some(resources.len()))?;
  for resource in resources {
    map.serialize_entry(&resource.name, resource)?;
  }
  map.end()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Program {
  pub name: String,
  pub runtime: String,
  #[serde(serialize_with = "serialize_resources")]
  pub resources: Vec<ProgramResource>,
  #[serde(skip_serializing_if = "BTreeMap::is_empty")]
  pub outputs: BTreeMap<String, Value>,
}

impl Hashable for Program {}

impl Program {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      runtime: "yaml".to_string(),
      resources: Vec::new(),
      outputs: BTreeMap::new(),
    }
  }

  /// Render declarations into a program.
  ///
  /// Every reference reachable from a variable is exported under its
  /// internal key. A variable is also exported under its own name when its
  /// output renders without running a transform on a reference.
  ///
  /// # Errors
  ///
  /// Fails if a property cannot be rendered (see [`crate::output::Output::render`]).
  pub fn render(
    name: &str,
    resources: &[Resource],
    variables: &[Variable],
    artifacts: &dyn OutputResolver,
  ) -> Result<Self, OutputError> {
    let mut program = Self::new(name);

    for resource in resources {
      program.resources.push(ProgramResource {
        name: resource.name().to_string(),
        kind: resource.kind().to_string(),
        properties: resource.render_properties(artifacts)?,
      });
    }

    for variable in variables {
      for placeholder in variable.output().references() {
        let value = Value::String(placeholder.to_string());
        program.outputs.insert(internal_key(&placeholder), value);
      }
      match variable.output().render(artifacts) {
        Ok(value) => {
          program.outputs.insert(variable.name().to_string(), value);
        }
        Err(OutputError::DeferredTransform { resources }) => {
          debug!(variable = variable.name(), ?resources, "variable resolved after apply");
        }
        Err(e) => return Err(e),
      }
    }

    Ok(program)
  }

  pub fn resource(&self, name: &str) -> Option<&ProgramResource> {
    self.resources.iter().find(|r| r.name == name)
  }

  pub fn to_yaml(&self) -> Result<String, ProgramError> {
    Ok(serde_yaml::to_string(self)?)
  }

  pub fn to_json(&self) -> Result<String, ProgramError> {
    Ok(serde_json::to_string_pretty(self)?)
  }

  /// Write the YAML program file into `dir`, creating it if needed.
  pub async fn write_to(&self, dir: &Path) -> Result<PathBuf, ProgramError> {
    let path = dir.join(PROGRAM_FILE);
    let io_err = |source| ProgramError::Io {
      path: path.clone(),
      source,
    };
    tokio::fs::create_dir_all(dir).await.map_err(io_err)?;
    tokio::fs::write(&path, self.to_yaml()?).await.map_err(io_err)?;
    debug!(path = %path.display(), "program written");
    Ok(path)
  }
}
