//! Variables: named top-level exports of a program.

use std::sync::Arc;

use serde_json::Value;

use crate::output::Output;
use crate::store::{Site, Store, StoreError};

#[derive(Debug)]
struct VariableData {
  name: String,
  output: Output<Value>,
  site: Site,
}

/// A named export whose value is resolved after apply.
#[derive(Debug, Clone)]
pub struct Variable {
  inner: Arc<VariableData>,
}

impl Variable {
  /// Create a variable and register it with `store`.
  #[track_caller]
  pub fn new<T>(store: &Store, name: impl Into<String>, output: &Output<T>) -> Result<Self, StoreError> {
    let variable = Self {
      inner: Arc::new(VariableData {
        name: name.into(),
        output: output.untyped(),
        site: Site::caller(),
      }),
    };
    store.track(variable.clone())?;
    Ok(variable)
  }

  pub fn name(&self) -> &str {
    &self.inner.name
  }

  pub fn output(&self) -> &Output<Value> {
    &self.inner.output
  }

  pub fn site(&self) -> Site {
    self.inner.site
  }
}

#[cfg(test)]
mod tests {
  use std::collections::BTreeSet;

  use super::*;
  use crate::resource::Resource;

  #[test]
  fn variable_keeps_output_dependencies() {
    let store = Store::new();
    let site = Resource::builder("site", "aws:cloudfront:Distribution")
      .register(&store)
      .unwrap();
    let url = site.key_path::<String>("domainName").map(|d: String| format!("https://{d}"));
    let var = Variable::new(&store, "url", &url).unwrap();

    assert_eq!(var.name(), "url");
    assert_eq!(var.output().resources(), BTreeSet::from(["site".to_string()]));
    assert_eq!(store.len().variables, 1);
  }
}
