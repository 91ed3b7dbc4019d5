//! The synthesis pipeline.
//!
//! Declaration fills a [`Store`]. [`Synthesizer::synthesize`] then seals it
//! and, in order:
//!
//! 1. validates names, key paths and renderable properties, and rejects
//!    duplicates
//! 2. builds the reference and build graphs and checks variable references
//! 3. checks every artifact consumer has a producer
//! 4. runs builds in waves
//! 5. renders the [`Program`]
//!
//! Nothing external is contacted before step 4, and a failing build stops
//! the pipeline before anything is serialized. [`Synthesis::deploy`] then
//! bootstraps the home, applies the program, runs invokes, resolves
//! variables and stores the deployment record.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::SynthConfig;
use crate::consts::{DEPLOYMENT_RECORD_FILE, INTERNAL_KEY_PREFIX};
use crate::context::{Context, Stack};
use crate::engine::{Engine, EngineError};
use crate::graph::{BuildGraph, GraphError, ReferenceGraph};
use crate::home::{HomeError, HomeProvider, HomeProviderExt};
use crate::operation::{Operation, TaskError};
use crate::output::OutputError;
use crate::outputs::{self, DeploymentRecord};
use crate::placeholder::{PlaceholderError, validate_key_path, validate_name};
use crate::program::{Program, ProgramError};
use crate::project::Project;
use crate::resource::Resource;
use crate::schedule::{BuildError, BuildFailure, BuildReport, run_builds};
use crate::store::{SealedStore, Site, Store, StoreError};
use crate::util::hash::{HashError, Hashable, ObjectHash};
use crate::variable::Variable;

/// Coarse failure classes, each with its own process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCategory {
  Configuration,
  Build,
  Home,
  Apply,
  PostApply,
}

impl FailureCategory {
  pub fn exit_code(self) -> u8 {
    match self {
      FailureCategory::Configuration => 2,
      FailureCategory::Build => 3,
      FailureCategory::Home => 4,
      FailureCategory::Apply => 5,
      FailureCategory::PostApply => 6,
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      FailureCategory::Configuration => "configuration",
      FailureCategory::Build => "build",
      FailureCategory::Home => "home",
      FailureCategory::Apply => "apply",
      FailureCategory::PostApply => "post-apply",
    }
  }
}

impl fmt::Display for FailureCategory {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

fn describe_blocked(skipped: &[String], blocked: &[String]) -> String {
  let mut text = String::new();
  if !skipped.is_empty() {
    text.push_str(&format!("; skipped builds: {}", skipped.join(", ")));
  }
  if !blocked.is_empty() {
    text.push_str(&format!("; blocked resources: {}", blocked.join(", ")));
  }
  text
}

#[derive(Debug, Error)]
pub enum SynthError {
  #[error("declaration failed: {0}")]
  Declaration(#[source] TaskError),

  #[error(transparent)]
  Store(#[from] StoreError),

  #[error("{what} declared at {site}: {source}")]
  InvalidName {
    what: &'static str,
    site: Site,
    #[source]
    source: PlaceholderError,
  },

  #[error("invalid stack '{stack}': {source}")]
  InvalidStack {
    stack: String,
    #[source]
    source: PlaceholderError,
  },

  #[error("resource '{resource}': {source}")]
  InvalidKeyPath {
    resource: String,
    #[source]
    source: PlaceholderError,
  },

  #[error("resource '{resource}' property '{property}': {source}")]
  InvalidProperty {
    resource: String,
    property: String,
    #[source]
    source: OutputError,
  },

  #[error("duplicate {what} name '{name}': declared at {first} and again at {second}")]
  DuplicateName {
    what: &'static str,
    name: String,
    first: Site,
    second: Site,
  },

  #[error(transparent)]
  Graph(#[from] GraphError),

  #[error("build for '{resource}' failed: {source}{}", describe_blocked(.skipped, .blocked))]
  BuildFailed {
    resource: String,
    #[source]
    source: BuildError,
    skipped: Vec<String>,
    blocked: Vec<String>,
  },

  #[error("cannot render program: {0}")]
  Render(#[source] OutputError),

  #[error("cannot hash program: {0}")]
  Hash(#[from] HashError),
}

impl SynthError {
  pub fn category(&self) -> FailureCategory {
    match self {
      SynthError::BuildFailed { .. } => FailureCategory::Build,
      _ => FailureCategory::Configuration,
    }
  }
}

#[derive(Debug, Error)]
pub enum DeployError {
  #[error(transparent)]
  Synth(#[from] SynthError),

  #[error("home backend failed: {0}")]
  Home(#[source] HomeError),

  #[error("{action} failed: {source}")]
  Engine {
    action: &'static str,
    #[source]
    source: EngineError,
  },

  #[error("infrastructure was applied, but the invoke for '{resource}' failed: {source}")]
  PostApply {
    resource: String,
    #[source]
    source: TaskError,
  },

  #[error("infrastructure was applied, but output '{variable}' could not be resolved: {source}")]
  Resolve {
    variable: String,
    #[source]
    source: OutputError,
  },

  #[error("infrastructure was applied, but the deployment record could not be stored: {0}")]
  Record(#[source] HomeError),
}

impl DeployError {
  pub fn category(&self) -> FailureCategory {
    match self {
      DeployError::Synth(e) => e.category(),
      DeployError::Home(_) => FailureCategory::Home,
      DeployError::Engine { .. } => FailureCategory::Apply,
      DeployError::PostApply { .. } | DeployError::Resolve { .. } | DeployError::Record(_) => {
        FailureCategory::PostApply
      }
    }
  }
}

/// Drives declaration and synthesis for one stack.
pub struct Synthesizer {
  stack: Stack,
  home: Arc<dyn HomeProvider>,
  config: SynthConfig,
}

impl fmt::Debug for Synthesizer {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Synthesizer")
      .field("stack", &self.stack)
      .field("home", &self.home.name())
      .field("config", &self.config)
      .finish()
  }
}

impl Synthesizer {
  pub fn new(project: impl Into<String>, home: Arc<dyn HomeProvider>, config: SynthConfig) -> Self {
    let stack = Stack::new(project, config.stage.clone());
    Self { stack, home, config }
  }

  /// A synthesizer for `project` using its home.
  pub fn for_project<P: Project + ?Sized>(project: &P, config: SynthConfig) -> Self {
    Self::new(project.name(), project.home(), config)
  }

  pub fn stack(&self) -> &Stack {
    &self.stack
  }

  pub fn config(&self) -> &SynthConfig {
    &self.config
  }

  pub fn work_dir(&self) -> PathBuf {
    self.config.work_dir(&self.stack.project)
  }

  fn context(&self) -> Context {
    Context::new(self.stack.clone(), self.home.clone(), self.work_dir())
  }

  /// Run the project's declaration code against a fresh store.
  pub async fn declare<P: Project + ?Sized>(&self, project: &P) -> Result<Arc<Store>, SynthError> {
    let store = Arc::new(Store::new());
    project.declare(store.clone()).await.map_err(SynthError::Declaration)?;
    let len = store.len();
    info!(
      project = project.name(),
      resources = len.resources,
      variables = len.variables,
      builds = len.builds,
      invokes = len.invokes,
      "declaration complete"
    );
    Ok(store)
  }

  /// Declare and synthesize `project`.
  pub async fn run<P: Project + ?Sized>(&self, project: &P) -> Result<Synthesis, SynthError> {
    let store = self.declare(project).await?;
    self.synthesize(&store).await
  }

  /// Project and stage become path segments and home keys.
  fn check_stack(&self) -> Result<(), SynthError> {
    validate_name(&self.stack.project)
      .and_then(|()| validate_name(&self.stack.stage))
      .map_err(|source| SynthError::InvalidStack {
        stack: self.stack.to_string(),
        source,
      })
  }

  /// Seal `store`, run builds and render the program.
  pub async fn synthesize(&self, store: &Store) -> Result<Synthesis, SynthError> {
    self.check_stack()?;
    let sealed = store.seal()?;
    info!(stack = %self.stack, "synthesizing");

    check_declarations(&sealed)?;
    let graph = ReferenceGraph::from_resources(&sealed.resources)?;
    graph.check_variables(&sealed.variables)?;
    let build_graph = BuildGraph::from_operations(&sealed.builds)?;
    check_artifacts(&sealed, &build_graph)?;

    let SealedStore {
      resources,
      variables,
      builds,
      invokes,
    } = sealed;

    let context = Arc::new(self.context().with_resources(resources.clone()));
    let mut report = run_builds(builds, &build_graph, context.clone(), self.config.parallelism).await;
    if !report.failed.is_empty() {
      let failure = report.failed.remove(0);
      return Err(build_failure(failure, &report, &resources, &variables));
    }

    let program =
      Program::render(&self.stack.project, &resources, &variables, context.as_ref()).map_err(SynthError::Render)?;
    let hash = program.compute_hash()?;
    info!(hash = %hash, resources = program.resources.len(), "program rendered");

    Ok(Synthesis {
      program,
      hash,
      graph,
      builds: report,
      context,
      variables,
      invokes,
    })
  }

  /// The record of the last successful deploy of this stack, if any.
  pub async fn last_deployment(&self) -> Result<Option<DeploymentRecord>, DeployError> {
    self.check_stack()?;
    let context = self.context();
    let result: Result<DeploymentRecord, HomeError> = self.home.get_item(DEPLOYMENT_RECORD_FILE, &context).await;
    match result {
      Ok(record) => Ok(Some(record)),
      Err(e) if e.is_not_found() => Ok(None),
      Err(e) => Err(DeployError::Home(e)),
    }
  }
}

fn check_declarations(sealed: &SealedStore) -> Result<(), SynthError> {
  let mut seen: HashMap<&str, Site> = HashMap::new();
  for resource in &sealed.resources {
    validate_name(resource.name()).map_err(|source| SynthError::InvalidName {
      what: "resource",
      site: resource.site(),
      source,
    })?;
    if let Some(first) = seen.insert(resource.name(), resource.site()) {
      return Err(SynthError::DuplicateName {
        what: "resource",
        name: resource.name().to_string(),
        first,
        second: resource.site(),
      });
    }
    for (property, value) in resource.properties() {
      value.check_renderable().map_err(|source| SynthError::InvalidProperty {
        resource: resource.name().to_string(),
        property: property.clone(),
        source,
      })?;
    }
    for (_, placeholder) in resource.references() {
      validate_key_path(&placeholder.path).map_err(|source| SynthError::InvalidKeyPath {
        resource: resource.name().to_string(),
        source,
      })?;
    }
  }

  let mut seen: HashMap<&str, Site> = HashMap::new();
  for variable in &sealed.variables {
    validate_name(variable.name()).map_err(|source| SynthError::InvalidName {
      what: "variable",
      site: variable.site(),
      source,
    })?;
    if variable.name().starts_with(INTERNAL_KEY_PREFIX) {
      return Err(SynthError::InvalidName {
        what: "variable",
        site: variable.site(),
        source: PlaceholderError::InvalidName {
          name: variable.name().to_string(),
          reason: "the '__stratus' prefix is reserved for internal outputs",
        },
      });
    }
    if let Some(first) = seen.insert(variable.name(), variable.site()) {
      return Err(SynthError::DuplicateName {
        what: "variable",
        name: variable.name().to_string(),
        first,
        second: variable.site(),
      });
    }
    for placeholder in variable.output().references() {
      validate_key_path(&placeholder.path).map_err(|source| SynthError::InvalidKeyPath {
        resource: placeholder.resource.clone(),
        source,
      })?;
    }
  }

  Ok(())
}

fn check_artifacts(sealed: &SealedStore, builds: &BuildGraph) -> Result<(), GraphError> {
  let consumers = sealed
    .resources
    .iter()
    .map(|r| (r.name(), r.artifacts()))
    .chain(sealed.variables.iter().map(|v| (v.name(), v.output().artifacts())))
    .chain(
      sealed
        .invokes
        .iter()
        .map(|op| (op.resource(), op.needs().iter().cloned().collect())),
    );

  for (consumer, keys) in consumers {
    if let Some(artifact) = keys.into_iter().find(|key| builds.producer(key).is_none()) {
      return Err(GraphError::UnknownArtifact {
        resource: consumer.to_string(),
        artifact,
      });
    }
  }
  Ok(())
}

fn build_failure(failure: BuildFailure, report: &BuildReport, resources: &[Resource], variables: &[Variable]) -> SynthError {
  let skipped = report.skipped.iter().map(|s| s.resource.clone()).collect();
  let consumes_missing = |keys: std::collections::BTreeSet<String>| keys.iter().any(|k| report.missing.contains(k));

  let mut blocked: Vec<String> = resources
    .iter()
    .filter(|r| consumes_missing(r.artifacts()))
    .map(|r| r.name().to_string())
    .chain(
      variables
        .iter()
        .filter(|v| consumes_missing(v.output().artifacts()))
        .map(|v| v.name().to_string()),
    )
    .collect();
  blocked.sort();
  blocked.dedup();

  SynthError::BuildFailed {
    resource: failure.resource,
    source: failure.error,
    skipped,
    blocked,
  }
}

/// A rendered program plus everything needed to deploy it.
#[derive(Debug)]
pub struct Synthesis {
  pub program: Program,
  pub hash: ObjectHash,
  pub graph: ReferenceGraph,
  pub builds: BuildReport,
  context: Arc<Context>,
  variables: Vec<Variable>,
  invokes: Vec<Operation>,
}

impl Synthesis {
  pub fn context(&self) -> &Arc<Context> {
    &self.context
  }

  pub fn variables(&self) -> &[Variable] {
    &self.variables
  }

  pub fn invokes(&self) -> &[Operation] {
    &self.invokes
  }

  /// Write the program file into the stage work directory.
  pub async fn write_program(&self) -> Result<PathBuf, ProgramError> {
    self.program.write_to(self.context.work_dir()).await
  }

  async fn bootstrap(&self) -> Result<(), DeployError> {
    self
      .context
      .home()
      .bootstrap(&self.context)
      .await
      .map_err(DeployError::Home)
  }

  pub async fn preview(&self, engine: &dyn Engine) -> Result<String, DeployError> {
    self.bootstrap().await?;
    engine
      .preview(&self.program, &self.context)
      .await
      .map_err(|source| DeployError::Engine {
        action: "preview",
        source,
      })
  }

  /// Apply the program, then run invokes and record the resolved outputs.
  ///
  /// Invokes run one at a time in registration order; the first failure
  /// stops the queue. Nothing is rolled back.
  pub async fn deploy(self, engine: &dyn Engine) -> Result<DeploymentRecord, DeployError> {
    let Synthesis {
      program,
      hash,
      context,
      variables,
      invokes,
      ..
    } = self;

    context.home().bootstrap(&context).await.map_err(DeployError::Home)?;

    info!(stack = %context.stack(), engine = engine.name(), hash = %hash, "applying program");
    let engine_outputs = engine
      .apply(&program, &context)
      .await
      .map_err(|source| DeployError::Engine { action: "apply", source })?;

    for invoke in invokes {
      let resource = invoke.resource().to_string();
      debug!(resource = %resource, "running invoke");
      if let Err(source) = invoke.run(context.clone()).await {
        warn!(resource = %resource, error = %source, "invoke failed, stopping");
        return Err(DeployError::PostApply { resource, source });
      }
    }

    let resolver = outputs::resolver_for(&engine_outputs, context.artifacts());
    let mut resolved: BTreeMap<String, Value> = BTreeMap::new();
    for variable in &variables {
      let value = variable
        .output()
        .resolve(&resolver)
        .map_err(|source| DeployError::Resolve {
          variable: variable.name().to_string(),
          source,
        })?;
      resolved.insert(variable.name().to_string(), value);
    }

    let record = DeploymentRecord::new(hash, resolved);
    context
      .home()
      .put_item(&record, DEPLOYMENT_RECORD_FILE, &context)
      .await
      .map_err(DeployError::Record)?;

    info!(stack = %context.stack(), outputs = record.outputs.len(), "deploy complete");
    Ok(record)
  }

  pub async fn destroy(&self, engine: &dyn Engine) -> Result<(), DeployError> {
    self.bootstrap().await?;
    engine
      .destroy(&self.program, &self.context)
      .await
      .map_err(|source| DeployError::Engine {
        action: "destroy",
        source,
      })?;
    info!(stack = %self.context.stack(), "stack destroyed");
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use tempfile::TempDir;

  use super::*;
  use crate::home::LocalHome;
  use crate::output::Output;

  fn synthesizer(temp: &TempDir) -> Synthesizer {
    let config = SynthConfig {
      parallelism: 2,
      stage: "test".to_string(),
      work_root: temp.path().join("work"),
      backend_url: "file:///state".to_string(),
    };
    Synthesizer::new("demo", Arc::new(LocalHome::new(temp.path().join("home"))), config)
  }

  #[tokio::test]
  async fn duplicate_resource_names_report_both_sites() {
    let temp = TempDir::new().unwrap();
    let store = Store::new();
    let first = Resource::builder("bucket", "aws:s3:Bucket").register(&store).unwrap();
    let second = Resource::builder("bucket", "aws:s3:Bucket").register(&store).unwrap();

    let err = synthesizer(&temp).synthesize(&store).await.unwrap_err();
    match &err {
      SynthError::DuplicateName {
        what,
        name,
        first: a,
        second: b,
      } => {
        assert_eq!(*what, "resource");
        assert_eq!(name, "bucket");
        assert_eq!(*a, first.site());
        assert_eq!(*b, second.site());
        assert_ne!(a.line(), b.line());
      }
      other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.category(), FailureCategory::Configuration);
  }

  #[tokio::test]
  async fn invalid_names_and_key_paths_are_rejected() {
    let temp = TempDir::new().unwrap();
    let store = Store::new();
    Resource::builder("my bucket", "aws:s3:Bucket").register(&store).unwrap();
    let err = synthesizer(&temp).synthesize(&store).await.unwrap_err();
    assert!(matches!(err, SynthError::InvalidName { what: "resource", .. }));

    let store = Store::new();
    Resource::builder("bucket", "aws:s3:Bucket").register(&store).unwrap();
    Resource::builder("fn", "aws:lambda:Function")
      .property("role", Output::<String>::reference("bucket", "a..b"))
      .register(&store)
      .unwrap();
    let err = synthesizer(&temp).synthesize(&store).await.unwrap_err();
    assert!(matches!(err, SynthError::InvalidKeyPath { ref resource, .. } if resource == "fn"));
  }

  #[tokio::test]
  async fn unproduced_artifact_is_configuration_error() {
    let temp = TempDir::new().unwrap();
    let store = Store::new();
    Resource::builder("image", "docker:Image")
      .property("uri", Output::<String>::artifact("image.uri"))
      .register(&store)
      .unwrap();

    let err = synthesizer(&temp).synthesize(&store).await.unwrap_err();
    assert!(matches!(
      err,
      SynthError::Graph(GraphError::UnknownArtifact { ref resource, ref artifact })
        if resource == "image" && artifact == "image.uri"
    ));
  }

  #[tokio::test]
  async fn sealed_store_cannot_be_synthesized_twice() {
    let temp = TempDir::new().unwrap();
    let store = Store::new();
    let synth = synthesizer(&temp);
    synth.synthesize(&store).await.unwrap();
    let err = synth.synthesize(&store).await.unwrap_err();
    assert!(matches!(err, SynthError::Store(StoreError::AlreadySealed)));
  }

  #[tokio::test]
  async fn deferred_transform_in_property_is_rejected() {
    let temp = TempDir::new().unwrap();
    let store = Store::new();
    let bucket = Resource::builder("bucket", "aws:s3:Bucket").register(&store).unwrap();
    Resource::builder("fn", "aws:lambda:Function")
      .property("role", bucket.key_path::<String>("arn").map(|arn: String| format!("{arn}/*")))
      .register(&store)
      .unwrap();

    let err = synthesizer(&temp).synthesize(&store).await.unwrap_err();
    assert_eq!(err.category(), FailureCategory::Configuration);
    match err {
      SynthError::InvalidProperty {
        resource,
        property,
        source: OutputError::DeferredTransform { resources },
      } => {
        assert_eq!(resource, "fn");
        assert_eq!(property, "role");
        assert_eq!(resources, vec!["bucket"]);
      }
      other => panic!("unexpected error: {other}"),
    }
  }

  #[tokio::test]
  async fn missing_deployment_record_is_none() {
    let temp = TempDir::new().unwrap();
    assert!(synthesizer(&temp).last_deployment().await.unwrap().is_none());
  }

  #[test]
  fn categories_map_to_exit_codes() {
    let codes: Vec<u8> = [
      FailureCategory::Configuration,
      FailureCategory::Build,
      FailureCategory::Home,
      FailureCategory::Apply,
      FailureCategory::PostApply,
    ]
    .into_iter()
    .map(FailureCategory::exit_code)
    .collect();
    assert_eq!(codes, vec![2, 3, 4, 5, 6]);
  }
}
