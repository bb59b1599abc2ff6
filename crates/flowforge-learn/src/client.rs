//! Degrade-gracefully client over the fix repository
//!
//! Repository transport failures must never fail a pipeline run; they only
//! degrade learning quality. Every operation here swallows errors into a
//! neutral value, feeds the shared transport backoff, and logs what it
//! skipped or lost.

use crate::backoff::{BackoffPolicy, TransportBackoff};
use crate::category::categorize;
use crate::fix::FixAttempt;
use crate::repository::{ErrorPattern, FixOutcome, FixRepository, NewPattern};
use crate::signature::{ErrorSignature, normalized_text};
use flowforge_graph::ValidationError;
use std::sync::Arc;

/// Category label for fixes submitted by a human reviewer
pub const HUMAN_IDENTIFIED: &str = "HUMAN_IDENTIFIED";

/// Client wrapper owning the backoff state for one repository connection.
#[derive(Clone)]
pub struct LearningClient {
    repository: Arc<dyn FixRepository>,
    backoff: Arc<TransportBackoff>,
}

impl LearningClient {
    /// Create with the default backoff policy
    #[must_use]
    pub fn new(repository: Arc<dyn FixRepository>) -> Self {
        Self::with_policy(repository, BackoffPolicy::default())
    }

    /// Create with an explicit backoff policy
    #[must_use]
    pub fn with_policy(repository: Arc<dyn FixRepository>, policy: BackoffPolicy) -> Self {
        Self {
            repository,
            backoff: Arc::new(TransportBackoff::new(policy)),
        }
    }

    /// Normalize, categorize, and record one validator error.
    ///
    /// Returns the signature and category so callers can reuse them.
    pub async fn note_error(&self, error: &ValidationError) -> (ErrorSignature, String) {
        let signature = ErrorSignature::of(error);
        let category = categorize(error);

        let pattern = NewPattern {
            signature: signature.clone(),
            category: category.clone(),
            description: normalized_text(error),
            field: error.field.clone(),
        };
        self.call("log_pattern", (), |repo| async move {
            repo.log_pattern(pattern).await
        })
        .await;

        (signature, category)
    }

    /// Record one fix application outcome
    pub async fn record_fix_outcome(&self, outcome: FixOutcome) {
        self.call("log_fix", (), |repo| async move { repo.log_fix(outcome).await })
            .await;
    }

    /// Ranked patterns worth steering generation away from
    pub async fn errors_to_avoid(&self, limit: usize) -> Vec<ErrorPattern> {
        self.call("errors_to_avoid", Vec::new(), |repo| async move {
            repo.errors_to_avoid(limit).await
        })
        .await
    }

    /// Fix records for the given signatures
    pub async fn known_fixes(&self, signatures: Vec<ErrorSignature>) -> Vec<FixAttempt> {
        self.call("known_fixes", Vec::new(), |repo| async move {
            repo.known_fixes(&signatures).await
        })
        .await
    }

    /// Fixes meeting both the confidence and applied-count bars
    pub async fn proven_fixes(
        &self,
        min_confidence: f64,
        min_applied: u32,
        limit: usize,
    ) -> Vec<FixAttempt> {
        self.call("proven_fixes", Vec::new(), |repo| async move {
            repo.proven_fixes(min_confidence, min_applied, limit).await
        })
        .await
    }

    /// Ingest a human-identified fix.
    ///
    /// Goes through the same pattern/fix pair as automatic learning, with a
    /// distinguished category and a forced success, so it gains parity with
    /// auto-proven fixes as applications accumulate.
    pub async fn submit_human_fix(&self, error: &ValidationError, fix_description: &str) {
        let signature = ErrorSignature::of(error);

        let pattern = NewPattern {
            signature: signature.clone(),
            category: HUMAN_IDENTIFIED.to_string(),
            description: normalized_text(error),
            field: error.field.clone(),
        };
        self.call("log_pattern", (), |repo| async move {
            repo.log_pattern(pattern).await
        })
        .await;

        let outcome = FixOutcome {
            signature,
            description: fix_description.to_string(),
            diff_summary: None,
            category: HUMAN_IDENTIFIED.to_string(),
            succeeded: true,
        };
        self.call("log_fix", (), |repo| async move { repo.log_fix(outcome).await })
            .await;
    }

    /// Current consecutive transport failure count (diagnostics)
    #[must_use]
    pub fn transport_failures(&self) -> u32 {
        self.backoff.failures()
    }

    async fn call<T, F, Fut>(&self, operation: &str, neutral: T, f: F) -> T
    where
        F: FnOnce(Arc<dyn FixRepository>) -> Fut,
        Fut: std::future::Future<Output = Result<T, crate::repository::RepositoryError>>,
    {
        if !self.backoff.should_attempt() {
            tracing::debug!(operation, "repository backoff active, skipping call");
            return neutral;
        }
        match f(Arc::clone(&self.repository)).await {
            Ok(value) => {
                self.backoff.record_success();
                value
            }
            Err(err) => {
                self.backoff.record_failure();
                tracing::warn!(operation, error = %err, "repository call failed, continuing without it");
                neutral
            }
        }
    }
}

impl std::fmt::Debug for LearningClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LearningClient")
            .field("transport_failures", &self.backoff.failures())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{MockFixRepository, RepositoryError};

    fn length_error() -> ValidationError {
        ValidationError::new("message exceeds 80 characters on node 12")
            .with_node(12)
            .with_field("message")
    }

    #[tokio::test]
    async fn note_error_logs_pattern() {
        let mut repo = MockFixRepository::new();
        repo.expect_log_pattern()
            .withf(|p: &NewPattern| p.category == "LENGTH_CONSTRAINT" && p.field.as_deref() == Some("message"))
            .times(1)
            .returning(|_| Ok(()));

        let client = LearningClient::new(Arc::new(repo));
        let (signature, category) = client.note_error(&length_error()).await;

        assert!(signature.as_str().starts_with("err_"));
        assert_eq!(category, "LENGTH_CONSTRAINT");
        assert_eq!(client.transport_failures(), 0);
    }

    #[tokio::test]
    async fn transport_failures_degrade_gracefully() {
        let mut repo = MockFixRepository::new();
        repo.expect_errors_to_avoid()
            .returning(|_| Err(RepositoryError::Transport("down".to_string())));

        let client = LearningClient::new(Arc::new(repo));
        let patterns = client.errors_to_avoid(10).await;

        assert!(patterns.is_empty());
        assert_eq!(client.transport_failures(), 1);
    }

    #[tokio::test]
    async fn backoff_trips_after_three_failures_and_resets_on_success() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let mut repo = MockFixRepository::new();
        let fail = Arc::new(AtomicBool::new(true));
        let fail_flag = Arc::clone(&fail);
        repo.expect_known_fixes().returning(move |_| {
            if fail_flag.load(Ordering::Relaxed) {
                Err(RepositoryError::Transport("down".to_string()))
            } else {
                Ok(Vec::new())
            }
        });
        // Three failures trip the limiter.
        let client = LearningClient::with_policy(
            Arc::new(repo),
            BackoffPolicy {
                failure_threshold: 3,
                // Always attempt so the success path can reset the counter.
                attempt_probability: 1.0,
            },
        );

        for _ in 0..3 {
            client.known_fixes(Vec::new()).await;
        }
        assert_eq!(client.transport_failures(), 3);

        fail.store(false, Ordering::Relaxed);
        client.known_fixes(Vec::new()).await;
        assert_eq!(client.transport_failures(), 0);
    }

    #[tokio::test]
    async fn tripped_backoff_skips_calls() {
        let mut repo = MockFixRepository::new();
        // The repository is never reached once the limiter is tripped with
        // zero attempt probability.
        repo.expect_proven_fixes().times(3).returning(|_, _, _| {
            Err(RepositoryError::Transport("down".to_string()))
        });

        let client = LearningClient::with_policy(
            Arc::new(repo),
            BackoffPolicy {
                failure_threshold: 3,
                attempt_probability: 0.0,
            },
        );

        for _ in 0..3 {
            client.proven_fixes(0.8, 3, 5).await;
        }
        // Skipped: the mock's times(3) would fail on a fourth call.
        let fixes = client.proven_fixes(0.8, 3, 5).await;
        assert!(fixes.is_empty());
    }

    #[tokio::test]
    async fn human_fix_is_logged_with_forced_success() {
        let mut repo = MockFixRepository::new();
        repo.expect_log_pattern()
            .withf(|p: &NewPattern| p.category == HUMAN_IDENTIFIED)
            .times(1)
            .returning(|_| Ok(()));
        repo.expect_log_fix()
            .withf(|o: &FixOutcome| o.succeeded && o.category == HUMAN_IDENTIFIED)
            .times(1)
            .returning(|_| Ok(()));

        let client = LearningClient::new(Arc::new(repo));
        client
            .submit_human_fix(&length_error(), "shorten the welcome message")
            .await;
    }
}
