//! Test fixtures for stratus-lib.

use std::sync::Arc;

use tempfile::TempDir;

use crate::context::{Context, Stack};
use crate::home::LocalHome;

/// A context for stack `demo/test` backed by a local home in a temp dir.
///
/// Keep the returned `TempDir` alive for as long as the context is used.
pub fn test_context() -> (TempDir, Context) {
  let temp = TempDir::new().unwrap();
  let home = LocalHome::new(temp.path().join("home"));
  let context = Context::new(Stack::new("demo", "test"), Arc::new(home), temp.path().join("work"));
  (temp, context)
}
