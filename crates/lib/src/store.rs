//! Concurrency-safe accumulator for declarations.
//!
//! User code registers resources, variables and deferred operations into a
//! [`Store`] while it runs, possibly from many tasks at once. The synthesizer
//! then seals the store and takes an order-preserving snapshot of everything
//! registered. Appends after sealing are rejected.
//!
//! Each collection has its own mutex so unrelated appends never contend; a
//! phase lock makes sealing atomic with respect to in-flight appends.

use std::panic::Location;
use std::sync::{Mutex, PoisonError, RwLock};

use thiserror::Error;
use tracing::debug;

use crate::operation::{Operation, OperationKind};
use crate::resource::Resource;
use crate::variable::Variable;

/// The source location where something was declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Site(&'static Location<'static>);

impl Site {
  /// The location of the (tracked) caller.
  #[track_caller]
  pub fn caller() -> Self {
    Site(Location::caller())
  }

  pub fn file(&self) -> &'static str {
    self.0.file()
  }

  pub fn line(&self) -> u32 {
    self.0.line()
  }
}

impl std::fmt::Display for Site {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}:{}:{}", self.0.file(), self.0.line(), self.0.column())
  }
}

/// Errors from registering into a store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
  #[error("cannot register {what} '{name}': the store is already sealed")]
  AppendAfterSeal { what: &'static str, name: String },

  #[error("the store has already been sealed")]
  AlreadySealed,
}

/// Something that can be tracked by a [`Store`].
pub trait Trackable: sealed::Sealed {
  #[doc(hidden)]
  fn append_to(self, store: &Store);

  #[doc(hidden)]
  fn describe(&self) -> (&'static str, String);
}

mod sealed {
  pub trait Sealed {}
  impl Sealed for crate::resource::Resource {}
  impl Sealed for crate::variable::Variable {}
}

impl Trackable for Resource {
  fn append_to(self, store: &Store) {
    lock(&store.resources).push(self);
  }

  fn describe(&self) -> (&'static str, String) {
    ("resource", self.name().to_string())
  }
}

impl Trackable for Variable {
  fn append_to(self, store: &Store) {
    lock(&store.variables).push(self);
  }

  fn describe(&self) -> (&'static str, String) {
    ("variable", self.name().to_string())
  }
}

/// Number of entries in each collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreLen {
  pub resources: usize,
  pub variables: usize,
  pub builds: usize,
  pub invokes: usize,
}

/// Order-preserving snapshot of a sealed store.
#[derive(Debug, Default)]
pub struct SealedStore {
  pub resources: Vec<Resource>,
  pub variables: Vec<Variable>,
  pub builds: Vec<Operation>,
  pub invokes: Vec<Operation>,
}

/// Append-only registry of declarations.
///
/// Create one per synthesis and share it by reference (or `Arc`).
#[derive(Debug, Default)]
pub struct Store {
  sealed: RwLock<bool>,
  resources: Mutex<Vec<Resource>>,
  variables: Mutex<Vec<Variable>>,
  builds: Mutex<Vec<Operation>>,
  invokes: Mutex<Vec<Operation>>,
}

// Appends cannot leave a collection half-written, so a poisoned lock still
// guards consistent data.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Store {
  pub fn new() -> Self {
    Self::default()
  }

  /// Track a resource or variable.
  ///
  /// # Errors
  ///
  /// Returns [`StoreError::AppendAfterSeal`] once the store is sealed.
  pub fn track(&self, item: impl Trackable) -> Result<(), StoreError> {
    let phase = self.sealed.read().unwrap_or_else(PoisonError::into_inner);
    let (what, name) = item.describe();
    if *phase {
      return Err(StoreError::AppendAfterSeal { what, name });
    }
    debug!(kind = what, name = %name, "tracked");
    item.append_to(self);
    Ok(())
  }

  /// Queue a build operation to run before the graph is serialized.
  pub fn register_build(&self, operation: Operation) -> Result<(), StoreError> {
    self.register(&self.builds, operation.with_kind(OperationKind::Build))
  }

  /// Queue an invoke operation to run after a successful apply.
  pub fn register_invoke(&self, operation: Operation) -> Result<(), StoreError> {
    self.register(&self.invokes, operation.with_kind(OperationKind::Invoke))
  }

  fn register(&self, queue: &Mutex<Vec<Operation>>, operation: Operation) -> Result<(), StoreError> {
    let phase = self.sealed.read().unwrap_or_else(PoisonError::into_inner);
    if *phase {
      return Err(StoreError::AppendAfterSeal {
        what: operation.kind().as_str(),
        name: operation.resource().to_string(),
      });
    }
    debug!(kind = operation.kind().as_str(), resource = %operation.resource(), "registered operation");
    lock(queue).push(operation);
    Ok(())
  }

  pub fn is_sealed(&self) -> bool {
    *self.sealed.read().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn len(&self) -> StoreLen {
    StoreLen {
      resources: lock(&self.resources).len(),
      variables: lock(&self.variables).len(),
      builds: lock(&self.builds).len(),
      invokes: lock(&self.invokes).len(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == StoreLen::default()
  }

  /// Seal the store and take everything registered, in registration order.
  ///
  /// # Errors
  ///
  /// Returns [`StoreError::AlreadySealed`] on a second call.
  pub fn seal(&self) -> Result<SealedStore, StoreError> {
    let mut phase = self.sealed.write().unwrap_or_else(PoisonError::into_inner);
    if *phase {
      return Err(StoreError::AlreadySealed);
    }
    *phase = true;

    let sealed = SealedStore {
      resources: std::mem::take(&mut *lock(&self.resources)),
      variables: std::mem::take(&mut *lock(&self.variables)),
      builds: std::mem::take(&mut *lock(&self.builds)),
      invokes: std::mem::take(&mut *lock(&self.invokes)),
    };
    debug!(
      resources = sealed.resources.len(),
      variables = sealed.variables.len(),
      builds = sealed.builds.len(),
      invokes = sealed.invokes.len(),
      "store sealed"
    );
    Ok(sealed)
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use super::*;
  use crate::output::Output;

  #[test]
  fn seal_preserves_registration_order() {
    let store = Store::new();
    for name in ["a", "b", "c"] {
      Resource::builder(name, "test:Thing").register(&store).unwrap();
    }
    let sealed = store.seal().unwrap();
    let names: Vec<&str> = sealed.resources.iter().map(|r| r.name()).collect();
    assert_eq!(names, vec!["a", "b", "c"]);
  }

  #[test]
  fn append_after_seal_fails() {
    let store = Store::new();
    store.seal().unwrap();

    let err = Resource::builder("late", "test:Thing").register(&store).unwrap_err();
    assert_eq!(
      err,
      StoreError::AppendAfterSeal {
        what: "resource",
        name: "late".to_string(),
      }
    );

    let err = Variable::new(&store, "url", &Output::literal("x".to_string())).unwrap_err();
    assert!(matches!(err, StoreError::AppendAfterSeal { what: "variable", .. }));

    let err = store
      .register_invoke(Operation::new("late", |_| async { Ok(()) }))
      .unwrap_err();
    assert!(matches!(err, StoreError::AppendAfterSeal { what: "invoke", .. }));
  }

  #[test]
  fn second_seal_fails() {
    let store = Store::new();
    store.seal().unwrap();
    assert!(store.is_sealed());
    assert_eq!(store.seal().unwrap_err(), StoreError::AlreadySealed);
  }

  #[test]
  fn operations_are_queued_by_kind() {
    let store = Store::new();
    store.register_build(Operation::new("image", |_| async { Ok(()) })).unwrap();
    store.register_invoke(Operation::new("fn", |_| async { Ok(()) })).unwrap();
    store.register_invoke(Operation::new("site", |_| async { Ok(()) })).unwrap();

    assert_eq!(
      store.len(),
      StoreLen {
        resources: 0,
        variables: 0,
        builds: 1,
        invokes: 2,
      }
    );

    let sealed = store.seal().unwrap();
    assert_eq!(sealed.builds[0].kind(), OperationKind::Build);
    let invokes: Vec<&str> = sealed.invokes.iter().map(|op| op.resource()).collect();
    assert_eq!(invokes, vec!["fn", "site"]);
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn concurrent_tracking_loses_nothing() {
    const TASKS: usize = 16;
    const PER_TASK: usize = 50;

    let store = Arc::new(Store::new());
    let mut handles = Vec::new();
    for task in 0..TASKS {
      let store = store.clone();
      handles.push(tokio::spawn(async move {
        for i in 0..PER_TASK {
          Resource::builder(format!("r-{task}-{i}"), "test:Thing")
            .register(&store)
            .unwrap();
          tokio::task::yield_now().await;
        }
      }));
    }
    for handle in handles {
      handle.await.unwrap();
    }

    let sealed = store.seal().unwrap();
    assert_eq!(sealed.resources.len(), TASKS * PER_TASK);

    let names: std::collections::BTreeSet<&str> = sealed.resources.iter().map(|r| r.name()).collect();
    assert_eq!(names.len(), TASKS * PER_TASK);

    for task in 0..TASKS {
      let prefix = format!("r-{task}-");
      let order: Vec<usize> = sealed
        .resources
        .iter()
        .filter_map(|r| r.name().strip_prefix(&prefix)?.parse().ok())
        .collect();
      assert_eq!(order, (0..PER_TASK).collect::<Vec<_>>());
    }
  }
}
