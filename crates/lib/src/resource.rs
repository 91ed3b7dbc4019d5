//! Resources: named, typed nodes of the infrastructure graph.
//!
//! A resource is registered into its [`Store`] the moment it is created and
//! is never mutated afterwards. Properties may embed [`Output`]s referencing
//! other resources; those references become the edges of the dependency
//! graph at synthesis time.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::{Number, Value};

use crate::output::{Output, OutputError, OutputResolver};
use crate::placeholder::Placeholder;
use crate::store::{Site, Store, StoreError};

/// A property value: a literal scalar, a literal composite, or a deferred
/// [`Output`].
#[derive(Debug, Clone)]
pub enum PropertyValue {
  Null,
  Bool(bool),
  Number(Number),
  String(String),
  List(Vec<PropertyValue>),
  Map(BTreeMap<String, PropertyValue>),
  Output(Output<Value>),
}

/// Properties ordered by name, so serialization is deterministic.
pub type Properties = BTreeMap<String, PropertyValue>;

impl PropertyValue {
  /// Parse a JSON document into a literal property (e.g. an inline policy).
  pub fn json(document: &str) -> Result<Self, serde_json::Error> {
    let value: Value = serde_json::from_str(document)?;
    Ok(value.into())
  }

  /// Visit every output embedded in this value.
  fn outputs<'a>(&'a self, found: &mut Vec<&'a Output<Value>>) {
    match self {
      PropertyValue::Output(output) => found.push(output),
      PropertyValue::List(items) => items.iter().for_each(|item| item.outputs(found)),
      PropertyValue::Map(map) => map.values().for_each(|item| item.outputs(found)),
      PropertyValue::Null | PropertyValue::Bool(_) | PropertyValue::Number(_) | PropertyValue::String(_) => {}
    }
  }

  /// Check that every embedded output can be rendered before apply.
  pub fn check_renderable(&self) -> Result<(), OutputError> {
    let mut outputs = Vec::new();
    self.outputs(&mut outputs);
    outputs.into_iter().try_for_each(Output::check_renderable)
  }

  /// Render into the engine's representation.
  pub fn render(&self, artifacts: &dyn OutputResolver) -> Result<Value, OutputError> {
    Ok(match self {
      PropertyValue::Null => Value::Null,
      PropertyValue::Bool(b) => Value::Bool(*b),
      PropertyValue::Number(n) => Value::Number(n.clone()),
      PropertyValue::String(s) => Value::String(crate::placeholder::escape(s)),
      PropertyValue::List(items) => Value::Array(
        items
          .iter()
          .map(|item| item.render(artifacts))
          .collect::<Result<_, _>>()?,
      ),
      PropertyValue::Map(map) => Value::Object(
        map
          .iter()
          .map(|(key, item)| Ok::<_, OutputError>((key.clone(), item.render(artifacts)?)))
          .collect::<Result<_, _>>()?,
      ),
      PropertyValue::Output(output) => output.render(artifacts)?,
    })
  }
}

impl From<Value> for PropertyValue {
  fn from(value: Value) -> Self {
    match value {
      Value::Null => PropertyValue::Null,
      Value::Bool(b) => PropertyValue::Bool(b),
      Value::Number(n) => PropertyValue::Number(n),
      Value::String(s) => PropertyValue::String(s),
      Value::Array(items) => PropertyValue::List(items.into_iter().map(Into::into).collect()),
      Value::Object(map) => PropertyValue::Map(map.into_iter().map(|(k, v)| (k, v.into())).collect()),
    }
  }
}

impl From<&str> for PropertyValue {
  fn from(value: &str) -> Self {
    PropertyValue::String(value.to_string())
  }
}

impl From<String> for PropertyValue {
  fn from(value: String) -> Self {
    PropertyValue::String(value)
  }
}

impl From<bool> for PropertyValue {
  fn from(value: bool) -> Self {
    PropertyValue::Bool(value)
  }
}

impl From<i64> for PropertyValue {
  fn from(value: i64) -> Self {
    PropertyValue::Number(value.into())
  }
}

impl From<u64> for PropertyValue {
  fn from(value: u64) -> Self {
    PropertyValue::Number(value.into())
  }
}

impl From<i32> for PropertyValue {
  fn from(value: i32) -> Self {
    PropertyValue::Number(value.into())
  }
}

impl From<f64> for PropertyValue {
  fn from(value: f64) -> Self {
    Number::from_f64(value).map_or(PropertyValue::Null, PropertyValue::Number)
  }
}

impl<T: Into<PropertyValue>> From<Vec<T>> for PropertyValue {
  fn from(items: Vec<T>) -> Self {
    PropertyValue::List(items.into_iter().map(Into::into).collect())
  }
}

impl<T: Into<PropertyValue>> From<BTreeMap<String, T>> for PropertyValue {
  fn from(map: BTreeMap<String, T>) -> Self {
    PropertyValue::Map(map.into_iter().map(|(k, v)| (k, v.into())).collect())
  }
}

impl<T> From<Output<T>> for PropertyValue {
  fn from(output: Output<T>) -> Self {
    PropertyValue::Output(output.untyped())
  }
}

impl<T> From<&Output<T>> for PropertyValue {
  fn from(output: &Output<T>) -> Self {
    PropertyValue::Output(output.untyped())
  }
}

#[derive(Debug)]
struct ResourceData {
  name: String,
  kind: String,
  properties: Properties,
  site: Site,
}

/// A named, typed infrastructure object.
///
/// Cloning is cheap; clones share the same immutable data.
#[derive(Debug, Clone)]
pub struct Resource {
  inner: Arc<ResourceData>,
}

impl Resource {
  /// Create a resource and register it with `store`.
  ///
  /// # Errors
  ///
  /// Returns [`StoreError::AppendAfterSeal`] if the store is already sealed.
  #[track_caller]
  pub fn new(
    store: &Store,
    name: impl Into<String>,
    kind: impl Into<String>,
    properties: Properties,
  ) -> Result<Self, StoreError> {
    let resource = Self {
      inner: Arc::new(ResourceData {
        name: name.into(),
        kind: kind.into(),
        properties,
        site: Site::caller(),
      }),
    };
    store.track(resource.clone())?;
    Ok(resource)
  }

  /// Start building a resource property by property.
  pub fn builder(name: impl Into<String>, kind: impl Into<String>) -> ResourceBuilder {
    ResourceBuilder {
      name: name.into(),
      kind: kind.into(),
      properties: Properties::new(),
    }
  }

  pub fn name(&self) -> &str {
    &self.inner.name
  }

  /// The provider resource type tag, e.g. `aws:s3:Bucket`.
  pub fn kind(&self) -> &str {
    &self.inner.kind
  }

  pub fn properties(&self) -> &Properties {
    &self.inner.properties
  }

  /// Where the resource was declared.
  pub fn site(&self) -> Site {
    self.inner.site
  }

  /// A deferred reference to `path` on this resource.
  pub fn key_path<T>(&self, path: &str) -> Output<T> {
    Output::reference(self.name(), path)
  }

  /// The provider-assigned identifier.
  pub fn id(&self) -> Output<String> {
    self.key_path("id")
  }

  /// Every `(property, reference)` pair embedded in the properties.
  pub fn references(&self) -> Vec<(&str, Placeholder)> {
    let mut refs = Vec::new();
    for (property, value) in self.properties() {
      let mut outputs = Vec::new();
      value.outputs(&mut outputs);
      for output in outputs {
        refs.extend(output.references().into_iter().map(|p| (property.as_str(), p)));
      }
    }
    refs
  }

  /// Names of the resources this one references.
  pub fn dependencies(&self) -> BTreeSet<String> {
    self.references().into_iter().map(|(_, p)| p.resource).collect()
  }

  /// Artifact keys referenced by the properties.
  pub fn artifacts(&self) -> BTreeSet<String> {
    let mut keys = BTreeSet::new();
    for value in self.properties().values() {
      let mut outputs = Vec::new();
      value.outputs(&mut outputs);
      for output in outputs {
        keys.extend(output.artifacts());
      }
    }
    keys
  }

  /// Render every property into the engine's representation.
  pub fn render_properties(&self, artifacts: &dyn OutputResolver) -> Result<BTreeMap<String, Value>, OutputError> {
    self
      .properties()
      .iter()
      .map(|(key, value)| Ok::<_, OutputError>((key.clone(), value.render(artifacts)?)))
      .collect()
  }
}

/// Incremental construction of a [`Resource`].
#[derive(Debug)]
pub struct ResourceBuilder {
  name: String,
  kind: String,
  properties: Properties,
}

impl ResourceBuilder {
  pub fn property(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
    self.properties.insert(key.into(), value.into());
    self
  }

  /// Register the resource with `store`.
  #[track_caller]
  pub fn register(self, store: &Store) -> Result<Resource, StoreError> {
    Resource::new(store, self.name, self.kind, self.properties)
  }
}
