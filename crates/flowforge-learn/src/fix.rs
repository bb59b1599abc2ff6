//! Remediations and their rolling confidence
//!
//! A [`FixAttempt`] ties one remediation to one error signature and carries
//! the counters confidence is derived from. "Proven" requires both a minimum
//! confidence and a minimum applied count, so one lucky success cannot count
//! as proof.

use crate::signature::ErrorSignature;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A remediation tied to one error signature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixAttempt {
    /// Signature of the error this fix addresses
    pub signature: ErrorSignature,
    /// Human-readable description of the remediation
    pub description: String,
    /// Serialized structural diff of the remediation, if recorded
    pub diff_summary: Option<String>,
    /// Category of the error at the time the fix was recorded
    pub category: String,
    /// Times the fix was applied
    pub applied: u32,
    /// Times the error disappeared on the following validation pass
    pub success: u32,
    /// Times the error persisted
    pub failure: u32,
    /// When the fix was last applied
    pub last_applied: Option<DateTime<Utc>>,
}

impl FixAttempt {
    /// Create an unapplied fix record
    #[inline]
    #[must_use]
    pub fn new(
        signature: ErrorSignature,
        description: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            signature,
            description: description.into(),
            diff_summary: None,
            category: category.into(),
            applied: 0,
            success: 0,
            failure: 0,
            last_applied: None,
        }
    }

    /// Attach a serialized diff
    #[inline]
    #[must_use]
    pub fn with_diff(mut self, diff_summary: impl Into<String>) -> Self {
        self.diff_summary = Some(diff_summary.into());
        self
    }

    /// Record one application and its outcome
    pub fn record_outcome(&mut self, succeeded: bool) {
        self.applied += 1;
        if succeeded {
            self.success += 1;
        } else {
            self.failure += 1;
        }
        self.last_applied = Some(Utc::now());
    }

    /// success / applied, 0.0 when never applied
    #[inline]
    #[must_use]
    pub fn confidence(&self) -> f64 {
        if self.applied == 0 {
            0.0
        } else {
            f64::from(self.success) / f64::from(self.applied)
        }
    }

    /// Whether the fix meets both the confidence and applied-count bars
    #[inline]
    #[must_use]
    pub fn is_proven(&self, min_confidence: f64, min_applied: u32) -> bool {
        self.applied >= min_applied && self.confidence() >= min_confidence
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowforge_graph::ValidationError;

    fn fix() -> FixAttempt {
        let e = ValidationError::new("message exceeds 80 characters").with_field("message");
        FixAttempt::new(ErrorSignature::of(&e), "shorten the message", "LENGTH_CONSTRAINT")
    }

    #[test]
    fn confidence_is_success_over_applied() {
        let mut f = fix();
        f.applied = 4;
        f.success = 3;
        f.failure = 1;
        assert!((f.confidence() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn unapplied_fix_has_zero_confidence() {
        assert_eq!(fix().confidence(), 0.0);
    }

    #[test]
    fn proven_requires_applied_minimum() {
        let mut f = fix();
        f.applied = 4;
        f.success = 3;

        assert!(f.is_proven(0.75, 3));
        assert!(f.is_proven(0.75, 4));
        // Confidence alone is not proof.
        assert!(!f.is_proven(0.75, 5));
        assert!(!f.is_proven(0.76, 3));
    }

    #[test]
    fn one_lucky_success_is_not_proof() {
        let mut f = fix();
        f.record_outcome(true);
        assert_eq!(f.confidence(), 1.0);
        assert!(!f.is_proven(0.8, 3));
    }

    #[test]
    fn record_outcome_updates_counters() {
        let mut f = fix();
        f.record_outcome(true);
        f.record_outcome(false);
        f.record_outcome(true);

        assert_eq!(f.applied, 3);
        assert_eq!(f.success, 2);
        assert_eq!(f.failure, 1);
        assert!(f.last_applied.is_some());
    }
}
