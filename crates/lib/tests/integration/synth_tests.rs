//! Declaration and synthesis scenarios.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::json;
use stratus_lib::consts::PROGRAM_FILE;
use stratus_lib::graph::GraphError;
use stratus_lib::{
  Context, DeployError, FailureCategory, Operation, Output, OutputError, Project, Resource, Store, SynthConfig,
  SynthError, Synthesizer, TaskError, Variable,
};
use tempfile::TempDir;

use super::common::{Events, RecordingEngine, local_home, string_map, synthesizer, test_config};

struct BucketAndFunction;

#[async_trait]
impl Project for BucketAndFunction {
  fn name(&self) -> &str {
    "shop"
  }

  async fn declare(&self, store: Arc<Store>) -> Result<(), TaskError> {
    let bucket = Resource::builder("api-bucket", "aws:s3:Bucket")
      .property("forceDestroy", true)
      .register(&store)?;
    let function = Resource::builder("api", "aws:lambda:Function")
      .property("runtime", "provided.al2023")
      .property("role", bucket.key_path::<String>("arn"))
      .register(&store)?;

    Variable::new(&store, "bucket_arn", &bucket.key_path::<String>("arn"))?;
    Variable::new(
      &store,
      "function_host",
      &function
        .key_path::<String>("url")
        .map(|url: String| url.trim_start_matches("fake://").to_string()),
    )?;
    Ok(())
  }
}

#[tokio::test]
async fn bucket_and_function_end_to_end() {
  let temp = TempDir::new().unwrap();
  let synth = synthesizer(&temp);

  let synthesis = synth.run(&BucketAndFunction).await.unwrap();
  assert!(synthesis.graph.contains_edge("api", "api-bucket"));
  assert_eq!(synthesis.graph.edges(), vec![("api".to_string(), "api-bucket".to_string())]);

  let function = synthesis.program.resource("api").unwrap();
  assert_eq!(function.properties["role"], json!("${api-bucket.arn}"));
  assert_eq!(synthesis.program.outputs["bucket_arn"], json!("${api-bucket.arn}"));
  assert!(synthesis.program.outputs.contains_key("__stratus.api.url"));
  assert!(!synthesis.program.outputs.contains_key("function_host"));

  let events = Events::default();
  let engine = RecordingEngine::new(events.clone());
  let record = synthesis.deploy(&engine).await.unwrap();

  assert_eq!(engine.applied(), 1);
  assert_eq!(
    record.outputs,
    string_map(&[("bucket_arn", "fake://api-bucket/arn"), ("function_host", "api/url")])
  );
  assert_eq!(synth.last_deployment().await.unwrap(), Some(record));
}

#[tokio::test]
async fn reference_cycle_emits_no_program() {
  let temp = TempDir::new().unwrap();
  let store = Store::new();
  Resource::builder("a", "test:Thing")
    .property("peer", Output::<String>::reference("b", "id"))
    .register(&store)
    .unwrap();
  Resource::builder("b", "test:Thing")
    .property("peer", Output::<String>::reference("a", "id"))
    .register(&store)
    .unwrap();

  let synth = synthesizer(&temp);
  let err = synth.synthesize(&store).await.unwrap_err();

  assert!(matches!(
    err,
    SynthError::Graph(GraphError::CyclicDependency { ref cycle }) if cycle == &["a", "b", "a"]
  ));
  assert!(!synth.work_dir().join(PROGRAM_FILE).exists());
}

#[tokio::test]
async fn unknown_reference_is_reported_with_property() {
  let temp = TempDir::new().unwrap();
  let store = Store::new();
  Resource::builder("api", "aws:lambda:Function")
    .property("role", Output::<String>::reference("missing-role", "arn"))
    .register(&store)
    .unwrap();

  let err = synthesizer(&temp).synthesize(&store).await.unwrap_err();
  assert_eq!(
    err.to_string(),
    "resource 'api' property 'role' references unknown resource 'missing-role'"
  );
}

#[tokio::test]
async fn duplicate_variable_names_report_both_sites() {
  let temp = TempDir::new().unwrap();
  let store = Store::new();
  let first = Variable::new(&store, "url", &Output::literal("https://a.example.com".to_string())).unwrap();
  let second = Variable::new(&store, "url", &Output::literal("https://b.example.com".to_string())).unwrap();

  let err = synthesizer(&temp).synthesize(&store).await.unwrap_err();
  let message = err.to_string();
  assert!(message.contains(&first.site().to_string()), "{message}");
  assert!(message.contains(&second.site().to_string()), "{message}");
}

struct ManyTasks;

#[async_trait]
impl Project for ManyTasks {
  fn name(&self) -> &str {
    "fleet"
  }

  async fn declare(&self, store: Arc<Store>) -> Result<(), TaskError> {
    let mut tasks = tokio::task::JoinSet::new();
    for task in 0..8 {
      let store = store.clone();
      tasks.spawn(async move {
        for i in 0..25 {
          Resource::builder(format!("t{task}-r{i}"), "test:Thing").register(&store)?;
          tokio::task::yield_now().await;
        }
        Ok::<(), stratus_lib::StoreError>(())
      });
    }
    while let Some(joined) = tasks.join_next().await {
      joined??;
    }
    Ok(())
  }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_declaration_keeps_every_resource() {
  let temp = TempDir::new().unwrap();
  let synthesis = synthesizer(&temp).run(&ManyTasks).await.unwrap();

  assert_eq!(synthesis.program.resources.len(), 200);
  for task in 0..8 {
    let prefix = format!("t{task}-");
    let order: Vec<&str> = synthesis
      .program
      .resources
      .iter()
      .map(|r| r.name.as_str())
      .filter(|name| name.starts_with(&prefix))
      .collect();
    let expected: Vec<String> = (0..25).map(|i| format!("t{task}-r{i}")).collect();
    assert_eq!(order, expected);
  }
}

#[tokio::test]
async fn literal_placeholder_text_is_escaped() {
  let temp = TempDir::new().unwrap();
  let store = Store::new();
  Resource::builder("site", "aws:s3:BucketObject")
    .property("content", "price: ${amount}")
    .register(&store)
    .unwrap();

  let synthesis = synthesizer(&temp).synthesize(&store).await.unwrap();
  assert_eq!(
    synthesis.program.resources[0].properties["content"],
    json!("price: $${amount}")
  );
  assert_eq!(synthesis.graph.len(), 1);
  assert_eq!(synthesis.graph.edge_count(), 0);
}

#[tokio::test]
async fn variable_referencing_undeclared_resource_is_rejected() {
  let temp = TempDir::new().unwrap();
  let store = Store::new();
  Resource::builder("api", "aws:lambda:Function").register(&store).unwrap();
  Variable::new(&store, "ghost_url", &Output::<String>::reference("ghost", "url")).unwrap();

  let synth = synthesizer(&temp);
  let err = synth.synthesize(&store).await.unwrap_err();

  assert_eq!(err.category(), FailureCategory::Configuration);
  assert!(matches!(
    err,
    SynthError::Graph(GraphError::UnknownVariableReference { ref variable, ref target })
      if variable == "ghost_url" && target == "ghost"
  ));
  assert!(!synth.work_dir().join(PROGRAM_FILE).exists());
}

#[tokio::test]
async fn configuration_error_stops_before_builds() {
  let temp = TempDir::new().unwrap();
  let store = Store::new();
  let runs = Arc::new(AtomicUsize::new(0));

  let counter = runs.clone();
  store
    .register_build(
      Operation::new("image", move |_ctx: Arc<Context>| async move {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok::<(), TaskError>(())
      })
      .producing("image.uri"),
    )
    .unwrap();
  let bucket = Resource::builder("bucket", "aws:s3:Bucket").register(&store).unwrap();
  Resource::builder("fn", "aws:lambda:Function")
    .property("imageUri", Output::<String>::artifact("image.uri"))
    .property("role", bucket.key_path::<String>("arn").map(|arn: String| arn.to_uppercase()))
    .register(&store)
    .unwrap();

  let err = synthesizer(&temp).synthesize(&store).await.unwrap_err();

  assert!(matches!(
    err,
    SynthError::InvalidProperty { source: OutputError::DeferredTransform { .. }, .. }
  ));
  assert_eq!(runs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn reserved_variable_prefix_is_rejected() {
  let temp = TempDir::new().unwrap();
  let store = Store::new();
  let bucket = Resource::builder("bucket", "aws:s3:Bucket").register(&store).unwrap();
  Variable::new(&store, "__stratus_url", &bucket.key_path::<String>("url")).unwrap();

  let err = synthesizer(&temp).synthesize(&store).await.unwrap_err();

  assert!(matches!(err, SynthError::InvalidName { what: "variable", .. }));
  assert!(err.to_string().contains("'__stratus' prefix is reserved"), "{err}");
}

#[tokio::test]
async fn stage_with_path_separators_is_rejected() {
  let temp = TempDir::new().unwrap();
  let config = SynthConfig {
    stage: "../prod".to_string(),
    ..test_config(&temp)
  };
  let synth = Synthesizer::new("shop", local_home(&temp), config);

  let store = Store::new();
  Resource::builder("bucket", "aws:s3:Bucket").register(&store).unwrap();
  let err = synth.synthesize(&store).await.unwrap_err();
  assert!(matches!(err, SynthError::InvalidStack { .. }));
  assert_eq!(err.category(), FailureCategory::Configuration);
  assert!(!temp.path().join("work").join("prod").exists());

  let err = synth.last_deployment().await.unwrap_err();
  assert!(matches!(err, DeployError::Synth(SynthError::InvalidStack { .. })));
}
