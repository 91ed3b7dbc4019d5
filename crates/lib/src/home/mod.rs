//! Pluggable state backends.
//!
//! A home provider persists small items (deployment records, build metadata)
//! across runs and supplies the passphrase that protects the engine's state.
//! Items are JSON documents stored under a key derived from the stack:
//! `<project>/<stage>/<file name>`.
//!
//! # Backends
//!
//! - [`LocalHome`]: a directory on the local filesystem
//! - [`ObjectStoreHome`]: an object-storage bucket reached through a
//!   [`CloudClient`]
//!
//! [`InMemoryCloud`] is an in-memory [`CloudClient`] for development and
//! tests.

pub mod cloud;
pub mod local;
pub mod memory;
pub mod object_store;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

use crate::context::Context;
use crate::placeholder::validate_name;

pub use cloud::{CallerIdentity, CloudClient, CloudError};
pub use local::LocalHome;
pub use memory::InMemoryCloud;
pub use object_store::ObjectStoreHome;

#[derive(Debug, Error)]
pub enum HomeError {
  #[error("home item not found: {key}")]
  NotFound { key: String },

  #[error("invalid home key '{key}': {reason}")]
  InvalidKey { key: String, reason: &'static str },

  #[error("home transport error: {0}")]
  Transport(String),

  #[error("home authentication error: {0}")]
  Auth(String),

  #[error("failed to decode home item {key}: {source}")]
  Decode {
    key: String,
    #[source]
    source: serde_json::Error,
  },

  #[error("failed to encode home item: {0}")]
  Encode(#[source] serde_json::Error),

  #[error("home I/O error at {path}: {source}")]
  Io {
    path: std::path::PathBuf,
    #[source]
    source: std::io::Error,
  },
}

impl HomeError {
  /// Missing items are an expected condition, not a failure.
  pub fn is_not_found(&self) -> bool {
    matches!(self, HomeError::NotFound { .. })
  }
}

/// Capability contract every state backend implements.
#[async_trait]
pub trait HomeProvider: Send + Sync {
  /// Short backend name for logs.
  fn name(&self) -> &'static str;

  /// Prepare the backend. Idempotent: an existing backend is not an error.
  async fn bootstrap(&self, context: &Context) -> Result<(), HomeError>;

  /// A deterministic secret derived from the caller's identity.
  async fn passphrase(&self, context: &Context) -> Result<String, HomeError>;

  async fn put_object(&self, key: &str, body: Vec<u8>) -> Result<(), HomeError>;

  async fn get_object(&self, key: &str) -> Result<Vec<u8>, HomeError>;
}

/// Build the storage key for `file_name` in the context's stack.
pub fn contextual_key(file_name: &str, context: &Context) -> Result<String, HomeError> {
  let invalid = |reason| HomeError::InvalidKey {
    key: file_name.to_string(),
    reason,
  };

  if file_name.is_empty() {
    return Err(invalid("file name is empty"));
  }
  if file_name.starts_with('/') || file_name.contains('\\') {
    return Err(invalid("file name must be a relative '/'-separated path"));
  }
  if file_name.split('/').any(|part| part.is_empty() || part == "." || part == "..") {
    return Err(invalid("file name has an empty, '.' or '..' component"));
  }

  let stack = context.stack();
  for segment in [&stack.project, &stack.stage] {
    if validate_name(segment).is_err() {
      return Err(HomeError::InvalidKey {
        key: format!("{}/{}/{}", stack.project, stack.stage, file_name),
        reason: "project and stage must be non-empty names of ASCII letters, digits, '-' and '_'",
      });
    }
  }
  Ok(format!("{}/{}/{}", stack.project, stack.stage, file_name))
}

/// Typed item access on top of [`HomeProvider`].
#[async_trait]
pub trait HomeProviderExt: HomeProvider {
  /// Store `item` as JSON under `file_name` for the context's stack.
  async fn put_item<T>(&self, item: &T, file_name: &str, context: &Context) -> Result<(), HomeError>
  where
    T: Serialize + Sync + ?Sized;

  /// Load the item stored under `file_name` for the context's stack.
  async fn get_item<T>(&self, file_name: &str, context: &Context) -> Result<T, HomeError>
  where
    T: DeserializeOwned + Send;
}

#[async_trait]
impl<H: HomeProvider + ?Sized> HomeProviderExt for H {
  async fn put_item<T>(&self, item: &T, file_name: &str, context: &Context) -> Result<(), HomeError>
  where
    T: Serialize + Sync + ?Sized,
  {
    let key = contextual_key(file_name, context)?;
    let body = serde_json::to_vec_pretty(item).map_err(HomeError::Encode)?;
    debug!(home = self.name(), key = %key, bytes = body.len(), "putting home item");
    self.put_object(&key, body).await
  }

  async fn get_item<T>(&self, file_name: &str, context: &Context) -> Result<T, HomeError>
  where
    T: DeserializeOwned + Send,
  {
    let key = contextual_key(file_name, context)?;
    debug!(home = self.name(), key = %key, "getting home item");
    let body = self.get_object(&key).await?;
    serde_json::from_slice(&body).map_err(|source| HomeError::Decode { key, source })
  }
}
