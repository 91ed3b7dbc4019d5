//! Program outputs and the deployment record.
//!
//! The engine only knows resource attributes, so every reference reachable
//! from a variable is exported under an internal key
//! `__stratus.<resource>.<key path>`. After apply those keys feed a
//! [`ValueResolver`] that resolves each variable locally. Internal keys never
//! reach the operator.

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::consts::INTERNAL_KEY_PREFIX;
use crate::output::ValueResolver;
use crate::placeholder::Placeholder;
use crate::util::hash::ObjectHash;

/// The output key exporting `placeholder`.
pub fn internal_key(placeholder: &Placeholder) -> String {
  format!("{INTERNAL_KEY_PREFIX}.{}.{}", placeholder.resource, placeholder.path)
}

/// Inverse of [`internal_key`].
pub fn parse_internal_key(key: &str) -> Option<Placeholder> {
  let rest = key.strip_prefix(INTERNAL_KEY_PREFIX)?.strip_prefix('.')?;
  let (resource, path) = rest.split_once('.')?;
  if resource.is_empty() || path.is_empty() {
    return None;
  }
  Some(Placeholder::new(resource, path))
}

pub fn is_internal_key(key: &str) -> bool {
  key.starts_with(INTERNAL_KEY_PREFIX)
}

/// Drop internal keys.
pub fn public_outputs(outputs: &BTreeMap<String, Value>) -> BTreeMap<String, Value> {
  outputs
    .iter()
    .filter(|(key, _)| !is_internal_key(key))
    .map(|(key, value)| (key.clone(), value.clone()))
    .collect()
}

/// Resolver over engine outputs (internal keys only) and build artifacts.
pub fn resolver_for(engine_outputs: &BTreeMap<String, Value>, artifacts: BTreeMap<String, Value>) -> ValueResolver {
  let mut resolver = ValueResolver::new();
  for (key, value) in engine_outputs {
    if let Some(placeholder) = parse_internal_key(key) {
      resolver.insert_reference(placeholder, value.clone());
    }
  }
  for (key, value) in artifacts {
    resolver.insert_artifact(key, value);
  }
  resolver
}

/// Stored after a successful deploy so `outputs` works without the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRecord {
  pub program_hash: ObjectHash,
  pub outputs: BTreeMap<String, Value>,
  /// Seconds since the Unix epoch.
  pub deployed_at: u64,
}

impl DeploymentRecord {
  pub fn new(program_hash: ObjectHash, outputs: BTreeMap<String, Value>) -> Self {
    let deployed_at = SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .map(|d| d.as_secs())
      .unwrap_or_default();
    Self {
      program_hash,
      outputs,
      deployed_at,
    }
  }

  pub fn deployed_at(&self) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(self.deployed_at)
  }

  pub fn public_outputs(&self) -> BTreeMap<String, Value> {
    public_outputs(&self.outputs)
  }
}
