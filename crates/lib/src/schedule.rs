//! Wave-based build execution.
//!
//! Builds run in the waves computed by [`BuildGraph`], at most `parallelism`
//! at a time. A build whose needed artifacts come from a failed or skipped
//! build is skipped; everything else still runs, so one report covers every
//! independent failure.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::context::Context;
use crate::graph::BuildGraph;
use crate::operation::{Operation, TaskError};

#[derive(Debug, Error)]
pub enum BuildError {
  #[error("build task failed: {0}")]
  Task(#[source] TaskError),

  #[error("build finished without setting artifact '{0}'")]
  MissingArtifact(String),

  #[error("build task aborted: {0}")]
  Aborted(String),
}

#[derive(Debug)]
pub struct BuildFailure {
  pub resource: String,
  pub error: BuildError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedBuild {
  pub resource: String,
  /// Resource of the failed or skipped build this one was waiting on.
  pub blocked_by: String,
}

/// Outcome of running every registered build.
#[derive(Debug, Default)]
pub struct BuildReport {
  /// Resources of completed builds, in registration order.
  pub completed: Vec<String>,
  pub failed: Vec<BuildFailure>,
  pub skipped: Vec<SkippedBuild>,
  /// Artifacts declared by failed or skipped builds.
  pub missing: BTreeSet<String>,
}

impl BuildReport {
  pub fn is_success(&self) -> bool {
    self.failed.is_empty() && self.skipped.is_empty()
  }

  pub fn total(&self) -> usize {
    self.completed.len() + self.failed.len() + self.skipped.len()
  }
}

enum Outcome {
  Completed,
  Failed(BuildError),
  Skipped(String),
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(message) = payload.downcast_ref::<&str>() {
    (*message).to_string()
  } else if let Some(message) = payload.downcast_ref::<String>() {
    message.clone()
  } else {
    "panic".to_string()
  }
}

/// Run `builds` against `context`. `graph` must have been built from the same
/// operations in the same order.
pub async fn run_builds(
  builds: Vec<Operation>,
  graph: &BuildGraph,
  context: Arc<Context>,
  parallelism: usize,
) -> BuildReport {
  let waves = graph.waves();
  info!(builds = builds.len(), waves = waves.len(), parallelism, "running builds");

  let resources: Vec<String> = builds.iter().map(|op| op.resource().to_string()).collect();
  let produces: Vec<Vec<String>> = builds.iter().map(|op| op.produces().to_vec()).collect();
  let mut pending: Vec<Option<Operation>> = builds.into_iter().map(Some).collect();

  let semaphore = Arc::new(Semaphore::new(parallelism.max(1)));
  let mut outcomes: BTreeMap<usize, Outcome> = BTreeMap::new();
  let mut blocked: HashSet<usize> = HashSet::new();

  for (wave_idx, wave) in waves.into_iter().enumerate() {
    debug!(wave = wave_idx, builds = wave.len(), "executing wave");
    let mut join_set = JoinSet::new();

    for index in wave {
      let Some(operation) = pending.get_mut(index).and_then(Option::take) else {
        continue;
      };

      if let Some(dep) = graph.dependencies(index).into_iter().find(|dep| blocked.contains(dep)) {
        warn!(
          build = %resources[index],
          failed_dep = %resources[dep],
          "skipping build due to failed dependency"
        );
        blocked.insert(index);
        outcomes.insert(index, Outcome::Skipped(resources[dep].clone()));
        continue;
      }

      let semaphore = semaphore.clone();
      let context = context.clone();
      let declared = produces[index].clone();
      join_set.spawn(async move {
        let Ok(_permit) = semaphore.acquire().await else {
          return (index, Err(BuildError::Aborted("build pool closed".to_string())));
        };

        let result = match AssertUnwindSafe(operation.run(context.clone())).catch_unwind().await {
          Ok(Ok(())) => match declared.iter().find(|key| !context.has_artifact(key)) {
            Some(key) => Err(BuildError::MissingArtifact(key.clone())),
            None => Ok(()),
          },
          Ok(Err(e)) => Err(BuildError::Task(e)),
          Err(payload) => Err(BuildError::Aborted(panic_message(payload.as_ref()))),
        };
        (index, result)
      });
    }

    while let Some(joined) = join_set.join_next().await {
      match joined {
        Ok((index, Ok(()))) => {
          info!(build = %resources[index], "build succeeded");
          outcomes.insert(index, Outcome::Completed);
        }
        Ok((index, Err(e))) => {
          error!(build = %resources[index], error = %e, "build failed");
          blocked.insert(index);
          outcomes.insert(index, Outcome::Failed(e));
        }
        Err(e) => {
          error!(error = %e, "build task could not be joined");
        }
      }
    }
  }

  let mut report = BuildReport::default();
  for (index, outcome) in outcomes {
    let resource = resources[index].clone();
    match outcome {
      Outcome::Completed => report.completed.push(resource),
      Outcome::Failed(error) => {
        report.missing.extend(produces[index].iter().cloned());
        report.failed.push(BuildFailure { resource, error });
      }
      Outcome::Skipped(blocked_by) => {
        report.missing.extend(produces[index].iter().cloned());
        report.skipped.push(SkippedBuild { resource, blocked_by });
      }
    }
  }

  info!(
    completed = report.completed.len(),
    failed = report.failed.len(),
    skipped = report.skipped.len(),
    "build execution complete"
  );
  report
}
