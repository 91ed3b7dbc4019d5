//! In-memory cloud client.
//!
//! [`InMemoryCloud`] implements [`CloudClient`] over process memory. State is
//! lost when the process exits, so it is only suitable for development and
//! tests.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use super::cloud::{CallerIdentity, CloudClient, CloudError};

#[derive(Debug, Default)]
pub struct InMemoryCloud {
  identity: CallerIdentity,
  buckets: RwLock<HashMap<String, HashMap<String, Vec<u8>>>>,
}

fn poison_err<T>(_: PoisonError<T>) -> CloudError {
  CloudError::Transport("lock poisoned".to_string())
}

impl InMemoryCloud {
  /// A cloud whose caller belongs to `account`.
  pub fn new(account: impl Into<String>) -> Self {
    Self::with_identity(CallerIdentity {
      account: Some(account.into()),
      ..CallerIdentity::default()
    })
  }

  pub fn with_identity(identity: CallerIdentity) -> Self {
    Self {
      identity,
      buckets: RwLock::new(HashMap::new()),
    }
  }

  /// Names of existing buckets, sorted.
  pub fn bucket_names(&self) -> Vec<String> {
    let buckets = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
    let mut names: Vec<String> = buckets.keys().cloned().collect();
    names.sort();
    names
  }

  pub fn object_count(&self, bucket: &str) -> usize {
    let buckets = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
    buckets.get(bucket).map_or(0, HashMap::len)
  }
}

#[async_trait]
impl CloudClient for InMemoryCloud {
  async fn caller_identity(&self) -> Result<CallerIdentity, CloudError> {
    Ok(self.identity.clone())
  }

  async fn create_bucket(&self, bucket: &str) -> Result<(), CloudError> {
    let mut buckets = self.buckets.write().map_err(poison_err)?;
    if buckets.contains_key(bucket) {
      return Err(CloudError::BucketAlreadyOwnedByYou(bucket.to_string()));
    }
    buckets.insert(bucket.to_string(), HashMap::new());
    Ok(())
  }

  async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), CloudError> {
    let mut buckets = self.buckets.write().map_err(poison_err)?;
    let objects = buckets
      .get_mut(bucket)
      .ok_or_else(|| CloudError::NoSuchBucket(bucket.to_string()))?;
    objects.insert(key.to_string(), body);
    Ok(())
  }

  async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, CloudError> {
    let buckets = self.buckets.read().map_err(poison_err)?;
    let objects = buckets
      .get(bucket)
      .ok_or_else(|| CloudError::NoSuchBucket(bucket.to_string()))?;
    objects.get(key).cloned().ok_or_else(|| CloudError::NoSuchKey {
      bucket: bucket.to_string(),
      key: key.to_string(),
    })
  }
}
