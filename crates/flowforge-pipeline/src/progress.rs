//! Phases, advisory progress, and the per-phase timing table

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Pipeline phases in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Registry and credential checks before any generation cost
    Preflight,
    /// Candidate graph generation (skippable on resume)
    Generate,
    /// Iterative validation and refinement
    ValidateRefine,
    /// Script scan and resolution
    ResolveScripts,
    /// Deployment of the accepted graph and script bundle
    Deploy,
    /// Best-effort widget provisioning
    ProvisionWidget,
    /// Post-deployment health probe
    HealthProbe,
    /// Best-effort spreadsheet export
    Export,
    /// Terminal state
    Done,
}

impl Phase {
    /// Overall progress span covered by this phase
    #[must_use]
    pub fn span(self) -> (u8, u8) {
        match self {
            Self::Preflight => (0, 5),
            Self::Generate => (5, 30),
            Self::ValidateRefine => (30, 55),
            Self::ResolveScripts => (55, 65),
            Self::Deploy => (65, 80),
            Self::ProvisionWidget => (80, 85),
            Self::HealthProbe => (85, 95),
            Self::Export => (95, 99),
            Self::Done => (99, 100),
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Preflight => "preflight",
            Self::Generate => "generate",
            Self::ValidateRefine => "validate-refine",
            Self::ResolveScripts => "resolve-scripts",
            Self::Deploy => "deploy",
            Self::ProvisionWidget => "provision-widget",
            Self::HealthProbe => "health-probe",
            Self::Export => "export",
            Self::Done => "done",
        };
        write!(f, "{name}")
    }
}

/// One advisory progress report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    /// Current phase
    pub phase: Phase,
    /// Monotonic overall progress, 0-100
    pub percent: u8,
    /// Short message
    pub message: String,
    /// Optional detail line
    pub detail: Option<String>,
}

/// Advisory progress consumer.
///
/// Reports never influence control flow; a sink that panics or blocks is the
/// caller's problem, not the pipeline's.
pub trait ProgressSink: Send + Sync {
    /// Receive one progress update
    fn report(&self, update: ProgressUpdate);
}

/// Sink that drops every update
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn report(&self, _update: ProgressUpdate) {}
}

/// Per-phase duration table, always emitted with the terminal result
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTimings {
    entries: Vec<(Phase, Duration)>,
}

impl PhaseTimings {
    /// Create an empty table
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a phase's duration
    #[inline]
    pub fn record(&mut self, phase: Phase, duration: Duration) {
        self.entries.push((phase, duration));
    }

    /// Recorded entries in execution order
    #[inline]
    #[must_use]
    pub fn entries(&self) -> &[(Phase, Duration)] {
        &self.entries
    }

    /// Duration recorded for a phase, if any
    #[must_use]
    pub fn duration_of(&self, phase: Phase) -> Option<Duration> {
        self.entries.iter().find(|(p, _)| *p == phase).map(|(_, d)| *d)
    }

    /// Total wall time across recorded phases
    #[must_use]
    pub fn total(&self) -> Duration {
        self.entries.iter().map(|(_, d)| *d).sum()
    }
}

impl std::fmt::Display for PhaseTimings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (phase, duration) in &self.entries {
            writeln!(f, "{phase:>16}  {}ms", duration.as_millis())?;
        }
        write!(f, "{:>16}  {}ms", "total", self.total().as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_spans_are_monotonic() {
        let phases = [
            Phase::Preflight,
            Phase::Generate,
            Phase::ValidateRefine,
            Phase::ResolveScripts,
            Phase::Deploy,
            Phase::ProvisionWidget,
            Phase::HealthProbe,
            Phase::Export,
            Phase::Done,
        ];
        let mut last_end = 0;
        for phase in phases {
            let (start, end) = phase.span();
            assert_eq!(start, last_end, "phase {phase} span must abut the prior");
            assert!(end >= start);
            last_end = end;
        }
        assert_eq!(last_end, 100);
    }

    #[test]
    fn timings_table() {
        let mut timings = PhaseTimings::new();
        timings.record(Phase::Preflight, Duration::from_millis(3));
        timings.record(Phase::Generate, Duration::from_millis(1200));

        assert_eq!(timings.duration_of(Phase::Generate), Some(Duration::from_millis(1200)));
        assert_eq!(timings.total(), Duration::from_millis(1203));

        let rendered = timings.to_string();
        assert!(rendered.contains("generate"));
        assert!(rendered.contains("total"));
    }
}
