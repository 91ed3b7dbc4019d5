//! Builds, apply and invokes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::json;
use stratus_lib::home::{CloudClient, InMemoryCloud, ObjectStoreHome};
use stratus_lib::schedule::BuildError;
use stratus_lib::{
  Context, DeployError, FailureCategory, HomeProviderExt, Operation, Output, Resource, Store, SynthError,
  Synthesizer, TaskError, Variable,
};
use tempfile::TempDir;

use super::common::{Events, RecordingEngine, synthesizer, test_config};

fn invoke(events: &Events, name: &'static str) -> Operation {
  let events = events.clone();
  Operation::new(name, move |_| async move {
    events.push(format!("invoke:{name}"));
    Ok(())
  })
}

fn image_build() -> Operation {
  Operation::new("api-image", |ctx: Arc<Context>| async move {
    let dockerfile = ctx.work_dir().join("Dockerfile");
    tokio::fs::create_dir_all(ctx.work_dir()).await?;
    tokio::fs::write(&dockerfile, "FROM scratch\n").await?;
    ctx.set_artifact("api-image.uri", "registry.example.com/api:abc123")?;
    Ok::<(), TaskError>(())
  })
  .producing("api-image.uri")
}

#[tokio::test]
async fn build_artifacts_render_into_properties_and_variables() {
  let temp = TempDir::new().unwrap();
  let store = Store::new();
  store.register_build(image_build()).unwrap();
  Resource::builder("api", "aws:lambda:Function")
    .property("imageUri", Output::<String>::artifact("api-image.uri"))
    .register(&store)
    .unwrap();
  Variable::new(&store, "image", &Output::<String>::artifact("api-image.uri")).unwrap();

  let synthesis = synthesizer(&temp).synthesize(&store).await.unwrap();
  assert_eq!(synthesis.builds.completed, vec!["api-image"]);
  assert_eq!(
    synthesis.program.resources[0].properties["imageUri"],
    json!("registry.example.com/api:abc123")
  );
  assert!(synthesis.context().work_dir().join("Dockerfile").is_file());

  let record = synthesis.deploy(&RecordingEngine::new(Events::default())).await.unwrap();
  assert_eq!(record.outputs["image"], json!("registry.example.com/api:abc123"));
}

#[tokio::test]
async fn failing_build_blocks_apply_and_invokes() {
  let temp = TempDir::new().unwrap();
  let events = Events::default();
  let unrelated_ran = Arc::new(AtomicBool::new(false));

  let store = Store::new();
  store
    .register_build(
      Operation::new("base", |_| async { Err(TaskError::from("docker daemon unreachable")) }).producing("base.digest"),
    )
    .unwrap();
  store
    .register_build(
      Operation::new("api-image", |_| async { Ok(()) })
        .needing("base.digest")
        .producing("api-image.uri"),
    )
    .unwrap();
  let flag = unrelated_ran.clone();
  store
    .register_build(Operation::new("site", move |_| async move {
      flag.store(true, Ordering::SeqCst);
      Ok(())
    }))
    .unwrap();
  Resource::builder("api", "aws:lambda:Function")
    .property("imageUri", Output::<String>::artifact("api-image.uri"))
    .register(&store)
    .unwrap();
  store.register_invoke(invoke(&events, "seed")).unwrap();

  let synth = synthesizer(&temp);
  let err = synth.synthesize(&store).await.unwrap_err();

  assert_eq!(err.category(), FailureCategory::Build);
  match &err {
    SynthError::BuildFailed {
      resource,
      source,
      skipped,
      blocked,
    } => {
      assert_eq!(resource, "base");
      assert!(matches!(source, BuildError::Task(_)));
      assert_eq!(skipped, &["api-image"]);
      assert_eq!(blocked, &["api"]);
    }
    other => panic!("unexpected error: {other}"),
  }
  assert!(err.to_string().contains("docker daemon unreachable"));
  assert!(unrelated_ran.load(Ordering::SeqCst));
  assert!(events.snapshot().is_empty());
}

#[tokio::test]
async fn invokes_run_in_order_after_apply() {
  let temp = TempDir::new().unwrap();
  let events = Events::default();
  let store = Store::new();
  Resource::builder("table", "aws:dynamodb:Table").register(&store).unwrap();
  store.register_invoke(invoke(&events, "migrate")).unwrap();
  store.register_invoke(invoke(&events, "seed")).unwrap();

  let synthesis = synthesizer(&temp).synthesize(&store).await.unwrap();
  assert!(events.snapshot().is_empty());

  synthesis.deploy(&RecordingEngine::new(events.clone())).await.unwrap();
  assert_eq!(events.snapshot(), vec!["apply", "invoke:migrate", "invoke:seed"]);
}

#[tokio::test]
async fn invoke_failure_is_post_apply() {
  let temp = TempDir::new().unwrap();
  let events = Events::default();
  let store = Store::new();
  Resource::builder("table", "aws:dynamodb:Table").register(&store).unwrap();
  store.register_invoke(invoke(&events, "migrate")).unwrap();
  store
    .register_invoke(Operation::new("seed", |_| async {
      Err(TaskError::from("conditional check failed"))
    }))
    .unwrap();
  store.register_invoke(invoke(&events, "notify")).unwrap();

  let synth = synthesizer(&temp);
  let synthesis = synth.synthesize(&store).await.unwrap();
  let err = synthesis.deploy(&RecordingEngine::new(events.clone())).await.unwrap_err();

  assert_eq!(err.category(), FailureCategory::PostApply);
  assert_eq!(err.category().exit_code(), 6);
  assert!(matches!(err, DeployError::PostApply { ref resource, .. } if resource == "seed"));
  assert!(err.to_string().starts_with("infrastructure was applied"));
  assert_eq!(events.snapshot(), vec!["apply", "invoke:migrate"]);
  assert!(synth.last_deployment().await.unwrap().is_none());
}

#[tokio::test]
async fn apply_failure_runs_no_invokes() {
  let temp = TempDir::new().unwrap();
  let events = Events::default();
  let store = Store::new();
  Resource::builder("table", "aws:dynamodb:Table").register(&store).unwrap();
  store.register_invoke(invoke(&events, "seed")).unwrap();

  let synthesis = synthesizer(&temp).synthesize(&store).await.unwrap();
  let err = synthesis.deploy(&RecordingEngine::failing(events.clone())).await.unwrap_err();

  assert_eq!(err.category(), FailureCategory::Apply);
  assert!(err.to_string().contains("quota exceeded"));
  assert_eq!(events.snapshot(), vec!["apply"]);
}

#[tokio::test]
async fn deployment_record_holds_only_public_outputs() {
  let temp = TempDir::new().unwrap();
  let store = Store::new();
  let api = Resource::builder("api", "aws:apigateway:RestApi").register(&store).unwrap();
  Variable::new(
    &store,
    "endpoint",
    &api.key_path::<String>("url").map(|url: String| format!("{url}/v1")),
  )
  .unwrap();

  let synth = synthesizer(&temp);
  let synthesis = synth.synthesize(&store).await.unwrap();
  assert!(synthesis.program.outputs.keys().any(|k| k.starts_with("__stratus")));

  synthesis.deploy(&RecordingEngine::new(Events::default())).await.unwrap();
  let record = synth.last_deployment().await.unwrap().unwrap();
  assert_eq!(record.outputs.keys().collect::<Vec<_>>(), vec!["endpoint"]);
  assert_eq!(record.public_outputs()["endpoint"], json!("fake://api/url/v1"));
}

#[tokio::test]
async fn invokes_can_store_home_items() {
  let temp = TempDir::new().unwrap();
  let cloud = InMemoryCloud::new("123456789012");
  let home = Arc::new(ObjectStoreHome::new(cloud));
  let synth = Synthesizer::new("shop", home.clone(), test_config(&temp));

  let store = Store::new();
  Resource::builder("api", "aws:apigateway:RestApi").register(&store).unwrap();
  store
    .register_invoke(Operation::new("api", |ctx: Arc<Context>| async move {
      ctx.home().put_item(&json!({ "ready": true }), "api-status.json", &ctx).await?;
      Ok::<(), TaskError>(())
    }))
    .unwrap();

  let synthesis = synth.synthesize(&store).await.unwrap();
  synthesis.deploy(&RecordingEngine::new(Events::default())).await.unwrap();

  assert_eq!(home.client().bucket_names(), vec!["stratus-assets-123456789012"]);
  assert!(
    home
      .client()
      .get_object("stratus-assets-123456789012", "shop/test/api-status.json")
      .await
      .is_ok()
  );
  assert!(synth.last_deployment().await.unwrap().is_some());
}
