//! Narrow interface to the external pattern/fix store
//!
//! The store is the durable side of the learning subsystem: pattern and fix
//! records outlive any single pipeline run. The core only reads and writes
//! through this trait, which keeps the store swappable for an in-memory
//! stub in tests.

use crate::fix::FixAttempt;
use crate::signature::ErrorSignature;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[cfg(test)]
use mockall::automock;

/// Transport-level failures talking to the store
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    /// Network or service failure
    #[error("transport failure: {0}")]
    Transport(String),

    /// Credential rejected
    #[error("repository credential rejected")]
    Unauthorized,

    /// Response could not be interpreted
    #[error("malformed repository response: {0}")]
    Malformed(String),
}

/// A pattern observation to record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPattern {
    /// Error signature
    pub signature: ErrorSignature,
    /// Coarse category
    pub category: String,
    /// Normalized description
    pub description: String,
    /// Field name, if the error carried one
    pub field: Option<String>,
}

/// One fix application outcome to record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixOutcome {
    /// Error signature the fix addresses
    pub signature: ErrorSignature,
    /// Remediation description
    pub description: String,
    /// Serialized structural diff, if available
    pub diff_summary: Option<String>,
    /// Category of the error
    pub category: String,
    /// Whether the error disappeared on the following pass
    pub succeeded: bool,
}

/// A ranked pattern record returned by `errors_to_avoid`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPattern {
    /// Error signature
    pub signature: ErrorSignature,
    /// Coarse category
    pub category: String,
    /// Normalized description
    pub description: String,
    /// Times the pattern has been observed
    pub occurrences: u32,
    /// Known-fix text, if one is on record
    pub known_fix: Option<String>,
    /// Last observation time
    pub last_seen: DateTime<Utc>,
}

/// The four degrade-gracefully operations of the external store.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait FixRepository: Send + Sync {
    /// Record one observation of an error pattern
    async fn log_pattern(&self, pattern: NewPattern) -> Result<(), RepositoryError>;

    /// Record one fix application and its outcome
    async fn log_fix(&self, outcome: FixOutcome) -> Result<(), RepositoryError>;

    /// Ranked patterns worth steering generation away from
    async fn errors_to_avoid(&self, limit: usize) -> Result<Vec<ErrorPattern>, RepositoryError>;

    /// Fix records for the given signatures
    async fn known_fixes(
        &self,
        signatures: &[ErrorSignature],
    ) -> Result<Vec<FixAttempt>, RepositoryError>;

    /// Fixes meeting both the confidence and applied-count bars
    async fn proven_fixes(
        &self,
        min_confidence: f64,
        min_applied: u32,
        limit: usize,
    ) -> Result<Vec<FixAttempt>, RepositoryError>;
}
