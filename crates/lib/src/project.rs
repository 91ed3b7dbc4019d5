//! User programs.

use std::sync::Arc;

use async_trait::async_trait;

use crate::home::{HomeProvider, LocalHome};
use crate::operation::TaskError;
use crate::store::Store;

/// A program that declares infrastructure into a [`Store`].
///
/// `declare` may spawn tasks that register concurrently; it must not return
/// before they have finished.
#[async_trait]
pub trait Project: Send + Sync {
  fn name(&self) -> &str;

  /// Where state and deployment records live.
  fn home(&self) -> Arc<dyn HomeProvider> {
    Arc::new(LocalHome::default_home())
  }

  async fn declare(&self, store: Arc<Store>) -> Result<(), TaskError>;
}
