//! Boundary to a cloud provider's object-storage and identity APIs.
//!
//! The core treats the provider SDK as an opaque request/response client and
//! adds no retry policy of its own.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result of a caller-identity lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
  pub account: Option<String>,
  pub arn: Option<String>,
  pub user_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CloudError {
  #[error("transport error: {0}")]
  Transport(String),

  #[error("authentication failed: {0}")]
  Auth(String),

  #[error("bucket '{0}' does not exist")]
  NoSuchBucket(String),

  #[error("no object '{key}' in bucket '{bucket}'")]
  NoSuchKey { bucket: String, key: String },

  #[error("bucket '{0}' already exists")]
  BucketAlreadyExists(String),

  #[error("bucket '{0}' is already owned by you")]
  BucketAlreadyOwnedByYou(String),

  #[error("{code}: {message}")]
  Service { code: String, message: String },
}

/// The subset of a cloud SDK a home backend needs.
#[async_trait]
pub trait CloudClient: Send + Sync {
  async fn caller_identity(&self) -> Result<CallerIdentity, CloudError>;

  async fn create_bucket(&self, bucket: &str) -> Result<(), CloudError>;

  async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), CloudError>;

  async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, CloudError>;
}
