//! Deferred values.
//!
//! An [`Output<T>`] is a value of type `T` that is either known now (a
//! literal), produced by a build operation (an artifact), or only known after
//! a referenced resource is provisioned (a reference). Outputs compose with
//! [`Output::map`], [`Output::zip`], [`Output::all`] and [`interpolate!`],
//! and every composition keeps the union of the resources it depends on.
//!
//! Values travel type-erased as JSON; `T` is a marker checked when a value is
//! decoded, so transforms never run at construction time. They run only when
//! an output is rendered or resolved, possibly zero times, and must be pure.
//!
//! [`interpolate!`]: crate::interpolate

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::placeholder::{self, Placeholder};

type Transform = Arc<dyn Fn(Value) -> Result<Value, OutputError> + Send + Sync>;
type Combiner = Arc<dyn Fn(Vec<Value>) -> Result<Value, OutputError> + Send + Sync>;

/// Errors raised while rendering or resolving outputs.
#[derive(Debug, Error)]
pub enum OutputError {
  #[error("cannot decode output value as {type_name}: {source}")]
  Decode {
    type_name: &'static str,
    #[source]
    source: serde_json::Error,
  },

  #[error("cannot encode output value: {0}")]
  Encode(#[source] serde_json::Error),

  #[error("transform failed: {0}")]
  Transform(String),

  #[error("unresolved reference {resource}.{path}")]
  UnresolvedReference { resource: String, path: String },

  #[error("unresolved artifact '{0}'")]
  UnresolvedArtifact(String),

  #[error(
    "a transformed output depends on [{}] and cannot be rendered before apply",
    .resources.join(", ")
  )]
  DeferredTransform { resources: Vec<String> },

  #[error("cannot interpolate a {kind} value into a string")]
  NotInterpolatable { kind: &'static str },
}

/// Supplies concrete values for references and artifacts.
pub trait OutputResolver {
  fn reference(&self, placeholder: &Placeholder) -> Result<Value, OutputError>;

  fn artifact(&self, key: &str) -> Result<Value, OutputError>;
}

/// An [`OutputResolver`] backed by in-memory tables.
#[derive(Debug, Clone, Default)]
pub struct ValueResolver {
  references: BTreeMap<Placeholder, Value>,
  artifacts: BTreeMap<String, Value>,
}

impl ValueResolver {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_reference(mut self, resource: &str, path: &str, value: impl Into<Value>) -> Self {
    self.insert_reference(Placeholder::new(resource, path), value.into());
    self
  }

  pub fn with_artifact(mut self, key: &str, value: impl Into<Value>) -> Self {
    self.insert_artifact(key.to_string(), value.into());
    self
  }

  pub fn insert_reference(&mut self, placeholder: Placeholder, value: Value) {
    self.references.insert(placeholder, value);
  }

  pub fn insert_artifact(&mut self, key: String, value: Value) {
    self.artifacts.insert(key, value);
  }
}

impl OutputResolver for ValueResolver {
  fn reference(&self, placeholder: &Placeholder) -> Result<Value, OutputError> {
    self
      .references
      .get(placeholder)
      .cloned()
      .ok_or_else(|| OutputError::UnresolvedReference {
        resource: placeholder.resource.clone(),
        path: placeholder.path.clone(),
      })
  }

  fn artifact(&self, key: &str) -> Result<Value, OutputError> {
    self
      .artifacts
      .get(key)
      .cloned()
      .ok_or_else(|| OutputError::UnresolvedArtifact(key.to_string()))
  }
}

/// The shape of an output's root node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
  Literal,
  Reference,
  Artifact,
  Mapped,
  Combined,
  Interpolated,
}

pub(crate) enum Node {
  Literal(Value),
  Reference(Placeholder),
  Artifact(String),
  Mapped { upstream: Arc<Node>, transform: Transform },
  Combined { upstreams: Vec<Arc<Node>>, combine: Combiner },
  Interpolated(Vec<Part>),
}

pub(crate) enum Part {
  Text(String),
  Value(Arc<Node>),
}

impl fmt::Debug for Node {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Node::Literal(value) => f.debug_tuple("Literal").field(value).finish(),
      Node::Reference(placeholder) => write!(f, "Reference({placeholder})"),
      Node::Artifact(key) => f.debug_tuple("Artifact").field(key).finish(),
      Node::Mapped { upstream, .. } => f.debug_struct("Mapped").field("upstream", upstream).finish_non_exhaustive(),
      Node::Combined { upstreams, .. } => f
        .debug_struct("Combined")
        .field("upstreams", upstreams)
        .finish_non_exhaustive(),
      Node::Interpolated(parts) => f.debug_tuple("Interpolated").field(&parts.len()).finish(),
    }
  }
}

impl Node {
  fn kind(&self) -> OutputKind {
    match self {
      Node::Literal(_) => OutputKind::Literal,
      Node::Reference(_) => OutputKind::Reference,
      Node::Artifact(_) => OutputKind::Artifact,
      Node::Mapped { .. } => OutputKind::Mapped,
      Node::Combined { .. } => OutputKind::Combined,
      Node::Interpolated(_) => OutputKind::Interpolated,
    }
  }

  fn visit<'a>(&'a self, f: &mut impl FnMut(&'a Node)) {
    f(self);
    match self {
      Node::Literal(_) | Node::Reference(_) | Node::Artifact(_) => {}
      Node::Mapped { upstream, .. } => upstream.visit(f),
      Node::Combined { upstreams, .. } => {
        for node in upstreams {
          node.visit(f);
        }
      }
      Node::Interpolated(parts) => {
        for part in parts {
          if let Part::Value(node) = part {
            node.visit(f);
          }
        }
      }
    }
  }

  fn references(&self) -> BTreeSet<Placeholder> {
    let mut refs = BTreeSet::new();
    self.visit(&mut |node| {
      if let Node::Reference(placeholder) = node {
        refs.insert(placeholder.clone());
      }
    });
    refs
  }

  /// Fails if a transform sits over a reference anywhere a placeholder
  /// would have to be rendered.
  fn check_renderable(&self) -> Result<(), OutputError> {
    match self {
      Node::Literal(_) | Node::Reference(_) | Node::Artifact(_) => Ok(()),
      Node::Mapped { .. } | Node::Combined { .. } => {
        let resources: BTreeSet<String> = self.references().into_iter().map(|p| p.resource).collect();
        if resources.is_empty() {
          Ok(())
        } else {
          Err(OutputError::DeferredTransform {
            resources: resources.into_iter().collect(),
          })
        }
      }
      Node::Interpolated(parts) => parts.iter().try_for_each(|part| match part {
        Part::Text(_) => Ok(()),
        Part::Value(node) => node.check_renderable(),
      }),
    }
  }

  fn evaluate(&self, resolver: &dyn OutputResolver) -> Result<Value, OutputError> {
    match self {
      Node::Literal(value) => Ok(value.clone()),
      Node::Reference(placeholder) => resolver.reference(placeholder),
      Node::Artifact(key) => resolver.artifact(key),
      Node::Mapped { upstream, transform } => transform(upstream.evaluate(resolver)?),
      Node::Combined { upstreams, combine } => {
        let values = upstreams
          .iter()
          .map(|node| node.evaluate(resolver))
          .collect::<Result<Vec<_>, _>>()?;
        combine(values)
      }
      Node::Interpolated(parts) => {
        let mut text = String::new();
        for part in parts {
          match part {
            Part::Text(literal) => text.push_str(literal),
            Part::Value(node) => push_scalar(&mut text, &node.evaluate(resolver)?)?,
          }
        }
        Ok(Value::String(text))
      }
    }
  }

  /// Render into the engine's representation: references become
  /// placeholders and literal text is escaped.
  fn render(&self, artifacts: &dyn OutputResolver) -> Result<Value, OutputError> {
    match self {
      Node::Literal(value) => Ok(escape_value(value)),
      Node::Reference(placeholder) => Ok(Value::String(placeholder.to_string())),
      Node::Artifact(key) => Ok(escape_value(&artifacts.artifact(key)?)),
      Node::Mapped { .. } | Node::Combined { .. } => {
        self.check_renderable()?;
        Ok(escape_value(&self.evaluate(artifacts)?))
      }
      Node::Interpolated(parts) => {
        let mut text = String::new();
        for part in parts {
          match part {
            Part::Text(literal) => text.push_str(&placeholder::escape(literal)),
            Part::Value(node) => push_scalar(&mut text, &node.render(artifacts)?)?,
          }
        }
        Ok(Value::String(text))
      }
    }
  }
}

fn push_scalar(text: &mut String, value: &Value) -> Result<(), OutputError> {
  match value {
    Value::String(s) => text.push_str(s),
    Value::Number(n) => text.push_str(&n.to_string()),
    Value::Bool(b) => text.push_str(if *b { "true" } else { "false" }),
    Value::Null => return Err(OutputError::NotInterpolatable { kind: "null" }),
    Value::Array(_) => return Err(OutputError::NotInterpolatable { kind: "list" }),
    Value::Object(_) => return Err(OutputError::NotInterpolatable { kind: "map" }),
  }
  Ok(())
}

fn escape_value(value: &Value) -> Value {
  match value {
    Value::String(s) => Value::String(placeholder::escape(s)),
    Value::Array(items) => Value::Array(items.iter().map(escape_value).collect()),
    Value::Object(map) => Value::Object(map.iter().map(|(k, v)| (k.clone(), escape_value(v))).collect()),
    other => other.clone(),
  }
}

/// A deferred value of type `T`.
///
/// Cloning is cheap and shares the immutable node tree.
pub struct Output<T> {
  node: Arc<Node>,
  _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Output<T> {
  fn clone(&self) -> Self {
    Self::from_node(self.node.clone())
  }
}

impl<T> fmt::Debug for Output<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_tuple("Output").field(&self.node).finish()
  }
}

impl<T> Output<T> {
  fn from_node(node: Arc<Node>) -> Self {
    Self {
      node,
      _marker: PhantomData,
    }
  }

  /// An output whose value is known now.
  pub fn literal(value: T) -> Self
  where
    T: Into<Value>,
  {
    Self::from_node(Arc::new(Node::Literal(value.into())))
  }

  /// An output from any serializable value.
  pub fn try_literal(value: &T) -> Result<Self, OutputError>
  where
    T: Serialize,
  {
    let value = serde_json::to_value(value).map_err(OutputError::Encode)?;
    Ok(Self::from_node(Arc::new(Node::Literal(value))))
  }

  /// A reference to `path` on the resource named `resource`.
  ///
  /// The resource does not need to exist yet; unknown targets are reported
  /// when the graph is synthesized.
  pub fn reference(resource: impl Into<String>, path: impl Into<String>) -> Self {
    Self::from_node(Arc::new(Node::Reference(Placeholder::new(resource, path))))
  }

  /// A value written to the context by the build that produces `key`.
  pub fn artifact(key: impl Into<String>) -> Self {
    Self::from_node(Arc::new(Node::Artifact(key.into())))
  }

  pub fn kind(&self) -> OutputKind {
    self.node.kind()
  }

  /// Apply a pure transform once the value is known.
  pub fn map<U, F>(&self, f: F) -> Output<U>
  where
    T: DeserializeOwned + 'static,
    U: Serialize + 'static,
    F: Fn(T) -> U + Send + Sync + 'static,
  {
    self.try_map(move |value| Ok::<_, std::convert::Infallible>(f(value)))
  }

  /// Like [`Output::map`], for transforms that can fail.
  pub fn try_map<U, E, F>(&self, f: F) -> Output<U>
  where
    T: DeserializeOwned + 'static,
    U: Serialize + 'static,
    E: fmt::Display + 'static,
    F: Fn(T) -> Result<U, E> + Send + Sync + 'static,
  {
    let transform: Transform = Arc::new(move |value| {
      let input = decode::<T>(value)?;
      let output = f(input).map_err(|e| OutputError::Transform(e.to_string()))?;
      serde_json::to_value(output).map_err(OutputError::Encode)
    });
    Output::from_node(Arc::new(Node::Mapped {
      upstream: self.node.clone(),
      transform,
    }))
  }

  /// Combine two outputs into a pair.
  pub fn zip<U>(&self, other: &Output<U>) -> Output<(T, U)> {
    Output::from_node(Arc::new(Node::Combined {
      upstreams: vec![self.node.clone(), other.node.clone()],
      combine: Arc::new(collect_list),
    }))
  }

  /// Combine any number of outputs into a list, preserving order.
  pub fn all(outputs: impl IntoIterator<Item = Output<T>>) -> Output<Vec<T>> {
    Output::from_node(Arc::new(Node::Combined {
      upstreams: outputs.into_iter().map(|output| output.node).collect(),
      combine: Arc::new(collect_list),
    }))
  }

  /// Forget the value type.
  pub fn untyped(&self) -> Output<Value> {
    Output::from_node(self.node.clone())
  }

  /// Every resource reference reachable from this output.
  pub fn references(&self) -> BTreeSet<Placeholder> {
    self.node.references()
  }

  /// Names of the resources this output depends on, transitively.
  pub fn resources(&self) -> BTreeSet<String> {
    self.references().into_iter().map(|p| p.resource).collect()
  }

  /// Artifact keys this output depends on, transitively.
  pub fn artifacts(&self) -> BTreeSet<String> {
    let mut keys = BTreeSet::new();
    self.node.visit(&mut |node| {
      if let Node::Artifact(key) = node {
        keys.insert(key.clone());
      }
    });
    keys
  }

  /// Resolve to a concrete value, running every transform on the way.
  pub fn resolve(&self, resolver: &dyn OutputResolver) -> Result<T, OutputError>
  where
    T: DeserializeOwned,
  {
    decode(self.node.evaluate(resolver)?)
  }

  /// Check, without running any transform, that [`Output::render`] cannot
  /// fail with [`OutputError::DeferredTransform`].
  pub fn check_renderable(&self) -> Result<(), OutputError> {
    self.node.check_renderable()
  }

  /// Render into the engine's representation.
  ///
  /// References become `${resource.path}` placeholders. Transforms over
  /// literals and artifacts are evaluated now; transforms over references
  /// fail with [`OutputError::DeferredTransform`].
  pub fn render(&self, artifacts: &dyn OutputResolver) -> Result<Value, OutputError> {
    self.node.render(artifacts)
  }
}

impl Output<String> {
  /// Concatenate text and scalar outputs into one string output.
  pub fn interpolate(parts: impl IntoIterator<Item = Fragment>) -> Self {
    let parts = parts.into_iter().map(|fragment| fragment.0).collect();
    Self::from_node(Arc::new(Node::Interpolated(parts)))
  }
}

impl From<&str> for Output<String> {
  fn from(value: &str) -> Self {
    Output::literal(value.to_string())
  }
}

impl From<String> for Output<String> {
  fn from(value: String) -> Self {
    Output::literal(value)
  }
}

fn collect_list(values: Vec<Value>) -> Result<Value, OutputError> {
  Ok(Value::Array(values))
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, OutputError> {
  serde_json::from_value(value).map_err(|source| OutputError::Decode {
    type_name: std::any::type_name::<T>(),
    source,
  })
}

/// One piece of an interpolated string.
pub struct Fragment(Part);

impl From<&str> for Fragment {
  fn from(text: &str) -> Self {
    Fragment(Part::Text(text.to_string()))
  }
}

impl From<String> for Fragment {
  fn from(text: String) -> Self {
    Fragment(Part::Text(text))
  }
}

impl<T> From<&Output<T>> for Fragment {
  fn from(output: &Output<T>) -> Self {
    Fragment(Part::Value(output.node.clone()))
  }
}

impl<T> From<Output<T>> for Fragment {
  fn from(output: Output<T>) -> Self {
    Fragment(Part::Value(output.node))
  }
}

/// Build an `Output<String>` from text and outputs.
///
/// ```
/// use stratus_lib::{interpolate, output::Output};
///
/// let arn: Output<String> = Output::reference("bucket", "arn");
/// let policy = interpolate!(&arn, "/*");
/// assert_eq!(policy.resources().len(), 1);
/// ```
#[macro_export]
macro_rules! interpolate {
  ($($part:expr),* $(,)?) => {
    $crate::output::Output::<String>::interpolate([$($crate::output::Fragment::from($part)),*])
  };
}
