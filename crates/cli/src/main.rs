//! `stratus`: a demonstration project.
//!
//! Declares an asset bucket, a container image built locally, a function
//! running that image with access to the bucket behind a public URL, and an
//! invoke that records the deployed image in the home once the stack is up.

use std::collections::BTreeMap;
use std::process::ExitCode;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use stratus_lib::util::hash::hash_bytes;
use stratus_lib::{
  Context, HomeProviderExt, Operation, Output, Project, PropertyValue, Resource, Store, TaskError, Variable, interpolate,
};

const REGISTRY: &str = "registry.example.com/stratus-demo";

const DOCKERFILE: &str = "FROM public.ecr.aws/lambda/provided:al2023\nCOPY bootstrap ${LAMBDA_RUNTIME_DIR}\nCMD [\"handler\"]\n";

struct Demo;

#[async_trait]
impl Project for Demo {
  fn name(&self) -> &str {
    "stratus-demo"
  }

  async fn declare(&self, store: Arc<Store>) -> Result<(), TaskError> {
    let assets = Resource::builder("assets", "aws:s3:Bucket")
      .property("forceDestroy", true)
      .register(&store)?;

    store.register_build(
      Operation::new("api-image", |ctx: Arc<Context>| async move {
        let dir = ctx.work_dir().join("api-image");
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join("Dockerfile"), DOCKERFILE).await?;

        let digest = hash_bytes(DOCKERFILE.as_bytes());
        ctx.set_artifact("api-image.uri", &format!("{REGISTRY}/api:{}", &digest.0[..12]))?;
        Ok::<(), TaskError>(())
      })
      .producing("api-image.uri"),
    )?;

    let role = Resource::builder("api-role", "aws:iam:Role")
      .property(
        "assumeRolePolicy",
        json!({
          "Version": "2012-10-17",
          "Statement": [{
            "Effect": "Allow",
            "Principal": { "Service": "lambda.amazonaws.com" },
            "Action": "sts:AssumeRole",
          }],
        }),
      )
      .register(&store)?;

    Resource::builder("api-assets-policy", "aws:iam:RolePolicy")
      .property("role", role.id())
      .property("resource", interpolate!(&assets.key_path::<String>("arn"), "/*"))
      .register(&store)?;

    let variables = BTreeMap::from([("ASSETS_BUCKET".to_string(), assets.key_path::<String>("bucket"))]);
    let environment = BTreeMap::from([("variables".to_string(), PropertyValue::from(variables))]);
    let api = Resource::builder("api", "aws:lambda:Function")
      .property("packageType", "Image")
      .property("imageUri", Output::<String>::artifact("api-image.uri"))
      .property("role", role.key_path::<String>("arn"))
      .property("environment", environment)
      .register(&store)?;

    let api_url = Resource::builder("api-url", "aws:lambda:FunctionUrl")
      .property("functionName", api.key_path::<String>("name"))
      .property("authorizationType", "NONE")
      .register(&store)?;

    store.register_invoke(Operation::new("api-url", |ctx: Arc<Context>| async move {
      let image = ctx.artifact_as::<String>("api-image.uri")?;
      ctx
        .home()
        .put_item(&json!({ "image": image, "stage": ctx.stage() }), "endpoints.json", &ctx)
        .await?;
      Ok::<(), TaskError>(())
    }))?;

    Variable::new(&store, "assets_bucket", &assets.key_path::<String>("bucket"))?;
    Variable::new(&store, "image", &Output::<String>::artifact("api-image.uri"))?;
    Variable::new(
      &store,
      "api_url",
      &api_url
        .key_path::<String>("functionUrl")
        .map(|url: String| url.trim_end_matches('/').to_string()),
    )?;
    Ok(())
  }
}

fn main() -> ExitCode {
  stratus_cli::run(Demo)
}
