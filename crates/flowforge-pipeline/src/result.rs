//! Terminal result contract
//!
//! A run ends in [`PipelineSuccess`] or [`PipelineFailure`]. Both carry the
//! per-phase timing table; failure additionally carries the best available
//! graph, structured failed-row diagnostics, and the cached generation
//! artifact so a retry never re-pays generation cost.

use crate::error::PipelineError;
use crate::health::HealthReport;
use crate::progress::PhaseTimings;
use crate::remote::GenerationRequest;
use flowforge_graph::ValidationError;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unique pipeline run identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RunId(pub Ulid);

impl RunId {
    /// Generate a new run id
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The single cached intermediate artifact for retry-without-regeneration.
///
/// Scoped to one run/request and threaded explicitly through the retry
/// path - never process-global state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedGeneration {
    /// The request the graph was generated for
    pub request: GenerationRequest,
    /// Generated tabular graph text
    pub graph_text: String,
    /// Node count reported at generation time
    pub node_count: usize,
}

/// Per-row diagnostics from a rejected validation/deployment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedRow {
    /// Node number, if reported
    pub node_num: Option<i32>,
    /// Row number, if reported
    pub row_num: Option<usize>,
    /// Field-level error messages: (field, message)
    pub field_errors: Vec<(String, String)>,
}

impl FailedRow {
    /// Group raw validation errors into per-row diagnostics.
    #[must_use]
    pub fn group(errors: &[ValidationError]) -> Vec<Self> {
        let mut rows: Vec<FailedRow> = Vec::new();
        for error in errors {
            let field = error.field.clone().unwrap_or_else(|| "-".to_string());
            let entry = rows
                .iter_mut()
                .find(|r| r.node_num == error.node_num && r.row_num == error.row_num);
            match entry {
                Some(row) => row.field_errors.push((field, error.description.clone())),
                None => rows.push(FailedRow {
                    node_num: error.node_num,
                    row_num: error.row_num,
                    field_errors: vec![(field, error.description.clone())],
                }),
            }
        }
        rows
    }
}

/// Terminal success
#[derive(Debug, Clone)]
pub struct PipelineSuccess {
    /// Run identifier
    pub run_id: RunId,
    /// Deployed tabular graph text
    pub graph_text: String,
    /// Node count of the deployed graph
    pub node_count: usize,
    /// Deployment/version id from the deployer
    pub deployment_id: String,
    /// Widget/session channel id, when provisioning succeeded
    pub widget_id: Option<String>,
    /// Advisory health result
    pub health: HealthReport,
    /// Best-effort export link
    pub export_link: Option<String>,
    /// Best-effort brand logo URL used for widget theming
    pub logo_url: Option<String>,
    /// Errors the refine loop could not clear (deployed anyway)
    pub residual_errors: Vec<ValidationError>,
    /// Whether residual errors warrant human review
    pub needs_human_review: bool,
    /// Per-phase duration table
    pub timings: PhaseTimings,
}

/// Terminal failure, with everything needed to resume cheaply
#[derive(Debug)]
pub struct PipelineFailure {
    /// Run identifier
    pub run_id: RunId,
    /// The terminating error
    pub error: PipelineError,
    /// Human-readable summary
    pub message: String,
    /// Best available graph text, if any
    pub residual_graph: Option<String>,
    /// Structured per-row diagnostics, if the failure carried any
    pub failed_rows: Vec<FailedRow>,
    /// Cached generation artifact for retry-without-regeneration
    pub cached_generation: Option<CachedGeneration>,
    /// Per-phase duration table up to the failure
    pub timings: PhaseTimings,
}

impl std::fmt::Display for PipelineFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for PipelineFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}
