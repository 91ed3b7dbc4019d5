//! stratus-lib: infrastructure declared as code, synthesized for an engine.
//!
//! User code declares [`Resource`]s whose properties may hold deferred
//! [`Output`]s, exports [`Variable`]s, and queues build and invoke
//! [`Operation`]s into a [`Store`]. The [`Synthesizer`] turns a sealed store
//! into a [`Program`] for a provisioning [`Engine`]:
//!
//! - `output`, `placeholder`: deferred values and the `${resource.path}` syntax
//! - `resource`, `variable`, `store`, `operation`: the declaration surface
//! - `graph`, `schedule`: dependency graphs and wave-based build execution
//! - `context`, `home`: what deferred work runs against
//! - `program`, `engine`, `synth`, `outputs`: synthesis and deployment

pub mod config;
pub mod consts;
pub mod context;
pub mod engine;
pub mod graph;
pub mod home;
pub mod operation;
pub mod output;
pub mod outputs;
pub mod placeholder;
pub mod program;
pub mod project;
pub mod resource;
pub mod schedule;
pub mod store;
pub mod synth;
pub mod util;
pub mod variable;

pub use config::SynthConfig;
pub use context::{Context, Stack};
pub use engine::{Engine, EngineError, EngineOutputs, PulumiEngine};
pub use home::{HomeError, HomeProvider, HomeProviderExt, LocalHome};
pub use operation::{Operation, OperationKind, TaskError};
pub use output::{Output, OutputError};
pub use outputs::DeploymentRecord;
pub use program::Program;
pub use project::Project;
pub use resource::{PropertyValue, Resource};
pub use store::{Store, StoreError};
pub use synth::{DeployError, FailureCategory, SynthError, Synthesis, Synthesizer};
pub use variable::Variable;
