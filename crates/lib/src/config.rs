//! Paths and synthesis settings.
//!
//! Everything is environment-driven so a user program needs no config file:
//!
//! - `STRATUS_DATA_DIR` overrides the data directory, otherwise
//!   `$XDG_DATA_HOME/stratus` or `~/.local/share/stratus`
//! - `STRATUS_STAGE` selects the stage (default `development`)
//! - `STRATUS_PARALLELISM` bounds concurrent builds (default: available CPUs)
//! - `STRATUS_BACKEND_URL` points the engine at its state backend
//!   (default `file://<data dir>/state`)

use std::path::PathBuf;

use tracing::warn;

use crate::consts::{APP_NAME, DEFAULT_STAGE, ENV_BACKEND_URL, ENV_DATA_DIR, ENV_PARALLELISM, ENV_STAGE};

/// Returns the user's home directory.
#[cfg(windows)]
pub fn user_home_dir() -> PathBuf {
  std::env::var("USERPROFILE")
    .map(PathBuf::from)
    .unwrap_or_else(|_| std::env::temp_dir())
}

/// Returns the user's home directory.
#[cfg(not(windows))]
pub fn user_home_dir() -> PathBuf {
  std::env::var("HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| std::env::temp_dir())
}

/// Returns the directory for data files for the application.
#[cfg(windows)]
pub fn data_dir() -> PathBuf {
  if let Ok(dir) = std::env::var(ENV_DATA_DIR) {
    return PathBuf::from(dir);
  }
  std::env::var("APPDATA")
    .map(PathBuf::from)
    .unwrap_or_else(|_| user_home_dir())
    .join(APP_NAME)
}

/// Returns the directory for data files for the application.
#[cfg(not(windows))]
pub fn data_dir() -> PathBuf {
  if let Ok(dir) = std::env::var(ENV_DATA_DIR) {
    return PathBuf::from(dir);
  }
  let data_home = std::env::var("XDG_DATA_HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| user_home_dir().join(".local").join("share"));
  data_home.join(APP_NAME)
}

/// Settings for one synthesis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthConfig {
  /// Maximum number of builds to run in parallel.
  pub parallelism: usize,

  pub stage: String,

  /// Root for per-stack work directories (`<root>/<project>/<stage>`).
  pub work_root: PathBuf,

  /// State backend handed to the engine.
  pub backend_url: String,
}

impl Default for SynthConfig {
  fn default() -> Self {
    let data = data_dir();
    Self {
      parallelism: num_cpus(),
      stage: DEFAULT_STAGE.to_string(),
      work_root: data.join("work"),
      backend_url: format!("file://{}", data.join("state").display()),
    }
  }
}

impl SynthConfig {
  /// Defaults overridden by `STRATUS_*` environment variables.
  pub fn from_env() -> Self {
    let mut config = Self::default();

    if let Ok(stage) = std::env::var(ENV_STAGE)
      && !stage.trim().is_empty()
    {
      config.stage = stage.trim().to_string();
    }

    if let Ok(raw) = std::env::var(ENV_PARALLELISM) {
      match raw.trim().parse::<usize>() {
        Ok(n) if n > 0 => config.parallelism = n,
        _ => warn!(value = %raw, "ignoring invalid parallelism setting"),
      }
    }

    if let Ok(url) = std::env::var(ENV_BACKEND_URL)
      && !url.trim().is_empty()
    {
      config.backend_url = url.trim().to_string();
    }

    config
  }

  /// The work directory for one stack.
  pub fn work_dir(&self, project: &str) -> PathBuf {
    self.work_root.join(project).join(&self.stage)
  }
}

/// Get the number of CPUs for default parallelism.
fn num_cpus() -> usize {
  std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4)
}
