//! Object-storage home.
//!
//! Items live in a bucket named `stratus-assets-<account>`, where the account
//! is looked up once through the client's caller identity and cached. The
//! passphrase is the account id. Mutating calls go through a single writer
//! lock so bootstrap and puts never interleave.

use async_trait::async_trait;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info};

use super::cloud::{CloudClient, CloudError};
use super::{HomeError, HomeProvider};
use crate::consts::ASSETS_BUCKET_PREFIX;
use crate::context::Context;

impl From<CloudError> for HomeError {
  fn from(err: CloudError) -> Self {
    match err {
      CloudError::NoSuchKey { key, .. } => HomeError::NotFound { key },
      CloudError::Auth(message) => HomeError::Auth(message),
      other => HomeError::Transport(other.to_string()),
    }
  }
}

pub struct ObjectStoreHome<C> {
  client: C,
  account: OnceCell<String>,
  writer: Mutex<()>,
}

impl<C: CloudClient> ObjectStoreHome<C> {
  pub fn new(client: C) -> Self {
    Self {
      client,
      account: OnceCell::new(),
      writer: Mutex::new(()),
    }
  }

  pub fn client(&self) -> &C {
    &self.client
  }

  /// The caller's account id, looked up on first use.
  pub async fn account(&self) -> Result<&str, HomeError> {
    let account = self
      .account
      .get_or_try_init(|| async {
        let identity = self.client.caller_identity().await?;
        identity
          .account
          .filter(|account| !account.is_empty())
          .ok_or_else(|| HomeError::Auth("caller identity has no account".to_string()))
      })
      .await?;
    Ok(account.as_str())
  }

  pub async fn bucket(&self) -> Result<String, HomeError> {
    Ok(format!("{ASSETS_BUCKET_PREFIX}-{}", self.account().await?))
  }
}

#[async_trait]
impl<C: CloudClient> HomeProvider for ObjectStoreHome<C> {
  fn name(&self) -> &'static str {
    "object-store"
  }

  async fn bootstrap(&self, _context: &Context) -> Result<(), HomeError> {
    let bucket = self.bucket().await?;
    let _writer = self.writer.lock().await;
    match self.client.create_bucket(&bucket).await {
      Ok(()) => {
        info!(bucket = %bucket, "created assets bucket");
        Ok(())
      }
      Err(CloudError::BucketAlreadyExists(_) | CloudError::BucketAlreadyOwnedByYou(_)) => {
        debug!(bucket = %bucket, "assets bucket already exists");
        Ok(())
      }
      Err(e) => Err(e.into()),
    }
  }

  async fn passphrase(&self, _context: &Context) -> Result<String, HomeError> {
    Ok(self.account().await?.to_string())
  }

  async fn put_object(&self, key: &str, body: Vec<u8>) -> Result<(), HomeError> {
    let bucket = self.bucket().await?;
    let _writer = self.writer.lock().await;
    self.client.put_object(&bucket, key, body).await?;
    Ok(())
  }

  async fn get_object(&self, key: &str) -> Result<Vec<u8>, HomeError> {
    let bucket = self.bucket().await?;
    Ok(self.client.get_object(&bucket, key).await?)
  }
}
