//! Deferred side-effecting operations.
//!
//! Operations are tagged records registered during declaration and run by the
//! synthesizer later: *build* operations before the graph is serialized (they
//! produce artifacts such as image URIs), *invoke* operations after a
//! successful apply. Each carries the resource it belongs to, so failures can
//! be attributed, and the artifact keys it needs and produces.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;

use crate::context::Context;
use crate::store::Site;

/// Error type returned by user-supplied tasks.
pub type TaskError = Box<dyn std::error::Error + Send + Sync>;

/// The future a task returns.
pub type TaskFuture = BoxFuture<'static, Result<(), TaskError>>;

type Task = Box<dyn FnOnce(Arc<Context>) -> TaskFuture + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
  Build,
  Invoke,
}

impl OperationKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      OperationKind::Build => "build",
      OperationKind::Invoke => "invoke",
    }
  }
}

impl fmt::Display for OperationKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A deferred async task attributed to a resource.
pub struct Operation {
  kind: OperationKind,
  resource: String,
  needs: Vec<String>,
  produces: Vec<String>,
  site: Site,
  task: Task,
}

impl fmt::Debug for Operation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Operation")
      .field("kind", &self.kind)
      .field("resource", &self.resource)
      .field("needs", &self.needs)
      .field("produces", &self.produces)
      .field("site", &self.site)
      .finish_non_exhaustive()
  }
}

impl Operation {
  /// Wrap `task`; its kind is set when it is registered with a store.
  #[track_caller]
  pub fn new<F, Fut>(resource: impl Into<String>, task: F) -> Self
  where
    F: FnOnce(Arc<Context>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
  {
    Self {
      kind: OperationKind::Build,
      resource: resource.into(),
      needs: Vec::new(),
      produces: Vec::new(),
      site: Site::caller(),
      task: Box::new(move |context| task(context).boxed()),
    }
  }

  /// Declare an artifact this operation writes to the context.
  pub fn producing(mut self, key: impl Into<String>) -> Self {
    self.produces.push(key.into());
    self
  }

  /// Declare an artifact this operation reads from the context.
  pub fn needing(mut self, key: impl Into<String>) -> Self {
    self.needs.push(key.into());
    self
  }

  pub(crate) fn with_kind(mut self, kind: OperationKind) -> Self {
    self.kind = kind;
    self
  }

  pub fn kind(&self) -> OperationKind {
    self.kind
  }

  pub fn resource(&self) -> &str {
    &self.resource
  }

  pub fn needs(&self) -> &[String] {
    &self.needs
  }

  pub fn produces(&self) -> &[String] {
    &self.produces
  }

  pub fn site(&self) -> Site {
    self.site
  }

  /// Consume the operation and start its task.
  pub fn run(self, context: Arc<Context>) -> TaskFuture {
    (self.task)(context)
  }
}
