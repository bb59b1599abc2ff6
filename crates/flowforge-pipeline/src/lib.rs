//! Flowforge Pipeline - generate, validate, refine, deploy
//!
//! Drives a natural-language product description to a deployed,
//! machine-validated conversational flow:
//! - Strictly ordered phases with advisory progress reporting
//! - An iterative validate-and-refine loop bounded by a retry cap
//! - Script resolution that never lets a critical script slip past deploy
//! - A post-deployment health probe that is advisory, never blocking
//! - Resumable caching so generation cost is never paid twice
//!
//! External collaborators (generator, validator/deployer, script store,
//! session runtime, exporter, brand lookup) sit behind async traits in
//! [`remote`]; the learning subsystem lives in `flowforge-learn`.

#![warn(unreachable_pub)]

pub mod cancel;
pub mod config;
pub mod error;
pub mod health;
pub mod orchestrator;
pub mod progress;
pub mod refine;
pub mod remote;
pub mod result;
pub mod scripts;

pub use cancel::CancelToken;
pub use config::{DeployCredentials, PipelineConfig};
pub use error::PipelineError;
pub use health::{HealthProbe, HealthReport, HealthStatus};
pub use orchestrator::{Pipeline, PipelineBuilder, PipelineRequest};
pub use progress::{NoopProgress, Phase, PhaseTimings, ProgressSink, ProgressUpdate};
pub use refine::{RefineLoop, RefineOutcome, RefinePhase};
pub use remote::{
    BrandAssetLookup, DeployTarget, Environment, FlowDeployer, FlowGenerator, GeneratedFlow,
    GenerationRequest, MessageAuthor, MessageSnapshot, RemoteError, ScriptStore, SessionMessage,
    SessionRuntime, SheetExporter, ValidationOutcome,
};
pub use result::{CachedGeneration, FailedRow, PipelineFailure, PipelineSuccess, RunId};
pub use scripts::{ResolvedScripts, ScriptResolver};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
