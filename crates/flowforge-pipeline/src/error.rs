//! Pipeline error taxonomy
//!
//! Only generation failure, a critical script miss, deployment rejection,
//! and authentication expiry terminate a run. Everything else is recorded
//! and carried forward on the result.

use crate::progress::Phase;
use crate::remote::RemoteError;
use crate::result::FailedRow;
use flowforge_graph::GraphError;

/// Main pipeline error type
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Preflight found an internally inconsistent script registry
    #[error("preflight failed: {0}")]
    Preflight(String),

    /// Deployment credential absent
    #[error("deployment credential missing: {0}")]
    CredentialMissing(String),

    /// Deployment credential malformed
    #[error("deployment credential malformed: {0}")]
    CredentialMalformed(String),

    /// Generator produced no usable graph
    #[error("generation failed: {0}")]
    GenerationFailed(String),

    /// Graph text could not be parsed
    #[error("graph error: {0}")]
    Graph(#[from] GraphError),

    /// Critical scripts unresolved after bundle and remote store
    #[error("critical scripts missing: {}", missing.join(", "))]
    CriticalScriptsMissing {
        /// Unresolved critical identifiers
        missing: Vec<String>,
    },

    /// Deployer rejected the graph
    #[error("deployment rejected: {message}")]
    DeploymentRejected {
        /// Summary of the rejection
        message: String,
        /// Structured per-row diagnostics
        failed_rows: Vec<FailedRow>,
    },

    /// Deployment credential expired mid-run
    #[error("deployment authentication expired")]
    AuthenticationExpired,

    /// An external call exceeded its bound
    #[error("operation timed out after {duration_secs}s")]
    Timeout {
        /// The configured bound
        duration_secs: u64,
    },

    /// Caller abandoned the run
    #[error("pipeline cancelled during {phase}")]
    Cancelled {
        /// Phase boundary where cancellation was observed
        phase: Phase,
    },

    /// Collaborator transport failure
    #[error("remote call failed: {0}")]
    Remote(#[from] RemoteError),
}

impl PipelineError {
    /// Whether this error terminates the pipeline
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Timeout { .. } | Self::Remote(_))
    }

    /// Whether a retry without regeneration could succeed
    #[inline]
    #[must_use]
    pub fn is_resumable(&self) -> bool {
        matches!(
            self,
            Self::CriticalScriptsMissing { .. }
                | Self::DeploymentRejected { .. }
                | Self::AuthenticationExpired
                | Self::Timeout { .. }
                | Self::Remote(_)
                | Self::Cancelled { .. }
        )
    }
}
