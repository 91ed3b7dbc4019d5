mod deploy;
mod outputs;
mod preview;
mod remove;
mod synth;

pub use deploy::cmd_deploy;
pub use outputs::cmd_outputs;
pub use preview::cmd_preview;
pub use remove::cmd_remove;
pub use synth::cmd_synth;

use stratus_lib::{PulumiEngine, SynthConfig};

/// The engine every engine-backed command drives.
fn engine(config: &SynthConfig) -> PulumiEngine {
  PulumiEngine::new(config.backend_url.clone())
}
