//! Filesystem home.
//!
//! # Storage Layout
//!
//! ```text
//! {root}/
//! └── <project>/<stage>/<file name>   # one JSON document per item
//! ```
//!
//! Writes are atomic (temp file in the same directory, then rename).

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use super::{HomeError, HomeProvider};
use crate::config::data_dir;
use crate::consts::APP_NAME;
use crate::context::Context;
use crate::util::hash::hash_bytes;

/// Directory name for the local home within the data directory.
const HOME_DIR: &str = "home";

#[derive(Debug, Clone)]
pub struct LocalHome {
  root: PathBuf,
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> HomeError + '_ {
  move |source| HomeError::Io {
    path: path.to_path_buf(),
    source,
  }
}

impl LocalHome {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  /// A home at the default location (`<data dir>/home`).
  pub fn default_home() -> Self {
    Self::new(data_dir().join(HOME_DIR))
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  fn object_path(&self, key: &str) -> Result<PathBuf, HomeError> {
    if key.is_empty() || key.split('/').any(|part| part.is_empty() || part == "." || part == "..") {
      return Err(HomeError::InvalidKey {
        key: key.to_string(),
        reason: "key has an empty, '.' or '..' component",
      });
    }
    Ok(key.split('/').fold(self.root.clone(), |path, part| path.join(part)))
  }
}

fn write_atomic(path: &Path, body: &[u8]) -> Result<(), HomeError> {
  let parent = path.parent().unwrap_or(Path::new("."));
  std::fs::create_dir_all(parent).map_err(io_err(parent))?;

  let mut temp = tempfile::NamedTempFile::new_in(parent).map_err(io_err(parent))?;
  temp.write_all(body).map_err(io_err(temp.path()))?;
  temp.persist(path).map_err(|e| HomeError::Io {
    path: path.to_path_buf(),
    source: e.error,
  })?;
  Ok(())
}

#[async_trait]
impl HomeProvider for LocalHome {
  fn name(&self) -> &'static str {
    "local"
  }

  async fn bootstrap(&self, _context: &Context) -> Result<(), HomeError> {
    tokio::fs::create_dir_all(&self.root).await.map_err(io_err(&self.root))?;
    info!(root = %self.root.display(), "local home ready");
    Ok(())
  }

  async fn passphrase(&self, _context: &Context) -> Result<String, HomeError> {
    let root = match tokio::fs::canonicalize(&self.root).await {
      Ok(path) => path,
      Err(e) if e.kind() == io::ErrorKind::NotFound => self.root.clone(),
      Err(e) => return Err(io_err(&self.root)(e)),
    };
    let seed = format!("{APP_NAME}:{}", root.display());
    Ok(hash_bytes(seed.as_bytes()).0)
  }

  async fn put_object(&self, key: &str, body: Vec<u8>) -> Result<(), HomeError> {
    let path = self.object_path(key)?;
    debug!(path = %path.display(), "writing home object");
    tokio::task::spawn_blocking(move || write_atomic(&path, &body))
      .await
      .map_err(|e| HomeError::Transport(format!("write task failed: {e}")))?
  }

  async fn get_object(&self, key: &str) -> Result<Vec<u8>, HomeError> {
    let path = self.object_path(key)?;
    match tokio::fs::read(&path).await {
      Ok(body) => Ok(body),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Err(HomeError::NotFound { key: key.to_string() }),
      Err(e) => Err(io_err(&path)(e)),
    }
  }
}

#[cfg(test)]
mod tests {
  use serde::{Deserialize, Serialize};
  use tempfile::TempDir;

  use super::*;
  use crate::context::Stack;
  use crate::home::HomeProviderExt;

  #[derive(Debug, PartialEq, Serialize, Deserialize)]
  struct Record {
    digest: String,
    size: u64,
  }

  fn setup() -> (TempDir, LocalHome, Context) {
    let temp = TempDir::new().unwrap();
    let home = LocalHome::new(temp.path().join("home"));
    let context = Context::new(
      Stack::new("demo", "test"),
      std::sync::Arc::new(home.clone()),
      temp.path().join("work"),
    );
    (temp, home, context)
  }

  #[tokio::test]
  async fn bootstrap_is_idempotent() {
    let (_temp, home, context) = setup();
    home.bootstrap(&context).await.unwrap();
    home.bootstrap(&context).await.unwrap();
    assert!(home.root().is_dir());
  }

  #[tokio::test]
  async fn item_round_trip() {
    let (_temp, home, context) = setup();
    let record = Record {
      digest: "sha256:abc".to_string(),
      size: 42,
    };

    home.put_item(&record, "build.json", &context).await.unwrap();
    let loaded: Record = home.get_item("build.json", &context).await.unwrap();
    assert_eq!(loaded, record);
    assert!(home.root().join("demo").join("test").join("build.json").is_file());
  }

  #[tokio::test]
  async fn overwrite_replaces_item() {
    let (_temp, home, context) = setup();
    home.put_item(&1u32, "counter.json", &context).await.unwrap();
    home.put_item(&2u32, "counter.json", &context).await.unwrap();
    let value: u32 = home.get_item("counter.json", &context).await.unwrap();
    assert_eq!(value, 2);
  }

  #[tokio::test]
  async fn missing_item_is_not_found() {
    let (_temp, home, context) = setup();
    let result: Result<Record, _> = home.get_item("missing.json", &context).await;
    let err = result.unwrap_err();
    assert!(err.is_not_found(), "unexpected error: {err}");
  }

  #[tokio::test]
  async fn corrupt_item_is_decode_error() {
    let (_temp, home, context) = setup();
    home
      .put_object("demo/test/bad.json", b"not json".to_vec())
      .await
      .unwrap();
    let result: Result<Record, _> = home.get_item("bad.json", &context).await;
    let err = result.unwrap_err();
    assert!(matches!(err, HomeError::Decode { .. }));
  }

  #[tokio::test]
  async fn passphrase_is_deterministic_per_root() {
    let (_temp, home, context) = setup();
    home.bootstrap(&context).await.unwrap();
    let first = home.passphrase(&context).await.unwrap();
    let second = home.passphrase(&context).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.len(), 64);

    let (_other_temp, other, other_context) = setup();
    assert_ne!(first, other.passphrase(&other_context).await.unwrap());
  }

  #[tokio::test]
  async fn raw_keys_cannot_escape_root() {
    let (_temp, home, _context) = setup();
    let err = home.put_object("../escape", vec![]).await.unwrap_err();
    assert!(matches!(err, HomeError::InvalidKey { .. }));
  }
}
